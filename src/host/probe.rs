//! Probes for memory, kernel overcommit and WAL archive backlog.

use std::io;
use std::path::Path;

use serde::Serialize;

use super::FileSystem;

/// Kernel memory overcommit policy (`/proc/sys/vm/overcommit_*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Overcommit {
    /// 0 = heuristic, 1 = always, 2 = strict accounting.
    pub memory: i64,
    /// Percentage of RAM counted towards the commit limit in mode 2.
    pub ratio: i64,
}

/// Extracts `MemTotal` from `/proc/meminfo` content, in bytes.
pub fn parse_meminfo_total(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Total physical memory of this host, in bytes.
pub fn read_total_memory(fs: &dyn FileSystem) -> Option<u64> {
    fs.read_to_string(Path::new("/proc/meminfo"))
        .ok()
        .as_deref()
        .and_then(parse_meminfo_total)
}

/// Current kernel overcommit settings of this host.
pub fn read_overcommit(fs: &dyn FileSystem) -> Option<Overcommit> {
    let read = |name: &str| -> Option<i64> {
        fs.read_to_string(&Path::new("/proc/sys/vm").join(name))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    };
    Some(Overcommit {
        memory: read("overcommit_memory")?,
        ratio: read("overcommit_ratio")?,
    })
}

/// Counts `.ready` markers (segments waiting for `archive_command`).
pub fn count_ready_segments(fs: &dyn FileSystem, archive_status: &Path) -> io::Result<i64> {
    let entries = fs.read_dir(archive_status)?;
    Ok(entries
        .iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "ready"))
        .count() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockFs;

    #[test]
    fn meminfo_total_in_bytes() {
        assert_eq!(
            parse_meminfo_total("MemTotal:       16384000 kB\nMemFree: 1 kB\n"),
            Some(16_384_000 * 1024)
        );
        assert_eq!(parse_meminfo_total("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn reads_memory_and_overcommit_from_proc() {
        let fs = MockFs::linux_host();
        assert_eq!(read_total_memory(&fs), Some(16_384_000 * 1024));
        assert_eq!(
            read_overcommit(&fs),
            Some(Overcommit {
                memory: 0,
                ratio: 50
            })
        );
    }

    #[test]
    fn overcommit_missing_on_non_linux() {
        assert_eq!(read_overcommit(&MockFs::new()), None);
    }

    #[test]
    fn counts_only_ready_markers() {
        let mut fs = MockFs::new();
        let dir = Path::new("/pgdata/pg_wal/archive_status");
        fs.add_file(dir.join("000000010000000000000001.ready"), "");
        fs.add_file(dir.join("000000010000000000000002.ready"), "");
        fs.add_file(dir.join("000000010000000000000000.done"), "");
        assert_eq!(count_ready_segments(&fs, dir).unwrap(), 2);
    }

    #[test]
    fn missing_archive_dir_is_error() {
        let fs = MockFs::new();
        assert!(count_ready_segments(&fs, Path::new("/nope")).is_err());
    }
}
