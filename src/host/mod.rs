//! Host-level introspection.
//!
//! Reads what the database cannot report about itself: physical memory,
//! kernel overcommit policy and the WAL archive status directory. All
//! reads go through the [`FileSystem`] trait so the logic can be tested
//! against an in-memory tree.

pub mod mock;
mod probe;

pub use mock::MockFs;
pub use probe::{
    Overcommit, count_ready_segments, parse_meminfo_total, read_overcommit, read_total_memory,
};

use std::io;
use std::path::{Path, PathBuf};

/// Abstraction for filesystem operations.
pub trait FileSystem {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }
}
