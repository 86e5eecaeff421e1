//! In-memory filesystem for tests.

use super::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem.
///
/// Stores files and directories in memory so host probes can be tested
/// without a real `/proc` or data directory.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content. Parent directories are created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// A Linux host with 16 GiB of RAM and default overcommit settings.
    pub fn linux_host() -> Self {
        let mut fs = Self::new();
        fs.add_file(
            "/proc/meminfo",
            "MemTotal:       16384000 kB\nMemFree:         8192000 kB\nMemAvailable:   12288000 kB\n",
        );
        fs.add_file("/proc/sys/vm/overcommit_memory", "0\n");
        fs.add_file("/proc/sys/vm/overcommit_ratio", "50\n");
        fs
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();
        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }
        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        let mut entries: Vec<PathBuf> = entries.into_iter().collect();
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_creates_parents() {
        let mut fs = MockFs::new();
        fs.add_file("/pgdata/pg_wal/archive_status/0001.ready", "");
        let ready = fs.read_dir(Path::new("/pgdata/pg_wal/archive_status")).unwrap();
        assert_eq!(ready, vec![PathBuf::from("/pgdata/pg_wal/archive_status/0001.ready")]);
        assert!(fs.read_dir(Path::new("/pgdata")).is_ok());
    }

    #[test]
    fn read_dir_lists_direct_children_only() {
        let mut fs = MockFs::new();
        fs.add_file("/a/b/c", "");
        fs.add_file("/a/d", "");
        let entries = fs.read_dir(Path::new("/a")).unwrap();
        assert_eq!(entries, vec![PathBuf::from("/a/b"), PathBuf::from("/a/d")]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/nonexistent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
