//! PostgreSQL version handling.
//!
//! Version numbers are compared structurally instead of as strings.
//! Before 10 a release line is two numbers (`9.6`) and the patch is the
//! third (`9.6.24`); from 10 on the line is one number (`13`) and the
//! patch is the second (`13.1`). `server_version_num` encodes both
//! schemes (`90624`, `130001`), so it is the preferred source.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Server version as (major, minor, patch).
///
/// For 10+ `minor` is always 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PgVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PgVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Decodes `server_version_num` (e.g. `90624`, `130001`).
    pub fn from_num(num: i32) -> Option<Self> {
        if num <= 0 {
            return None;
        }
        let num = num as u32;
        if num >= 100_000 {
            Some(Self::new(num / 10_000, 0, num % 10_000))
        } else {
            Some(Self::new(num / 10_000, (num / 100) % 100, num % 100))
        }
    }

    /// Parses the leading numeric part of `server_version`
    /// (`"13.1 (Debian 13.1-1)"`, `"9.6.24"`, `"16beta2"`).
    pub fn parse(s: &str) -> Option<Self> {
        let head = s.split_whitespace().next()?;
        let mut parts = head.split('.').map(|p| {
            let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });
        let major = parts.next()??;
        let second = parts.next().flatten().unwrap_or(0);
        if major >= 10 {
            Some(Self::new(major, 0, second))
        } else {
            let patch = parts.next().flatten().unwrap_or(0);
            Some(Self::new(major, second, patch))
        }
    }

    /// The release line this version belongs to (`9.6`, `13`).
    pub fn line(&self) -> ReleaseLine {
        ReleaseLine::new(self.major, self.minor)
    }

    /// True if this version is at or above the `major.minor` release line.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        self.line() >= ReleaseLine::new(major, minor)
    }

    /// Re-encodes as `server_version_num`.
    pub fn num(&self) -> i32 {
        if self.major >= 10 {
            (self.major * 10_000 + self.patch) as i32
        } else {
            (self.major * 10_000 + self.minor * 100 + self.patch) as i32
        }
    }
}

impl fmt::Display for PgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.major >= 10 {
            write!(f, "{}.{}", self.major, self.patch)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// A major release line: `9.6`, `13`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ReleaseLine {
    pub major: u32,
    pub minor: u32,
}

impl ReleaseLine {
    pub const fn new(major: u32, minor: u32) -> Self {
        if major >= 10 {
            Self { major, minor: 0 }
        } else {
            Self { major, minor }
        }
    }
}

impl fmt::Display for ReleaseLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.major >= 10 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Hardcoded knowledge about published releases.
///
/// Goes stale as soon as a new release ships, which is why `updated` is
/// carried along and checked against the current date.
#[derive(Clone, Debug)]
pub struct VersionTable {
    /// Oldest release line still supported by the community.
    pub min_supported: ReleaseLine,
    /// Newest release line.
    pub latest: ReleaseLine,
    /// Latest patch number per release line.
    pub latest_patches: Vec<(ReleaseLine, u32)>,
    /// Day the table was last brought up to date.
    pub updated: NaiveDate,
}

impl VersionTable {
    pub fn latest_patch(&self, line: ReleaseLine) -> Option<u32> {
        self.latest_patches
            .iter()
            .find(|(l, _)| *l == line)
            .map(|(_, p)| *p)
    }

    /// Days between `updated` and `today` (negative if `today` is earlier).
    pub fn age_days(&self, today: NaiveDate) -> i64 {
        (today - self.updated).num_days()
    }
}

impl Default for VersionTable {
    /// Releases as of the 2025-11-13 out-of-cycle update.
    fn default() -> Self {
        Self {
            min_supported: ReleaseLine::new(14, 0),
            latest: ReleaseLine::new(18, 0),
            latest_patches: vec![
                (ReleaseLine::new(18, 0), 1),
                (ReleaseLine::new(17, 0), 7),
                (ReleaseLine::new(16, 0), 11),
                (ReleaseLine::new(15, 0), 15),
                (ReleaseLine::new(14, 0), 20),
                (ReleaseLine::new(13, 0), 23),
                (ReleaseLine::new(12, 0), 22),
                (ReleaseLine::new(11, 0), 22),
                (ReleaseLine::new(10, 0), 23),
                (ReleaseLine::new(9, 6), 24),
            ],
            updated: NaiveDate::from_ymd_opt(2025, 11, 13).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_num_decodes_both_schemes() {
        assert_eq!(PgVersion::from_num(90624), Some(PgVersion::new(9, 6, 24)));
        assert_eq!(PgVersion::from_num(130001), Some(PgVersion::new(13, 0, 1)));
        assert_eq!(PgVersion::from_num(0), None);
    }

    #[test]
    fn num_round_trips() {
        assert_eq!(PgVersion::new(9, 5, 3).num(), 90503);
        assert_eq!(PgVersion::new(16, 0, 4).num(), 160004);
    }

    #[test]
    fn parse_handles_distribution_suffix() {
        assert_eq!(
            PgVersion::parse("13.1 (Debian 13.1-1.pgdg100+1)"),
            Some(PgVersion::new(13, 0, 1))
        );
        assert_eq!(PgVersion::parse("9.6.24"), Some(PgVersion::new(9, 6, 24)));
        assert_eq!(PgVersion::parse("16beta2"), Some(PgVersion::new(16, 0, 0)));
        assert_eq!(PgVersion::parse("garbage"), None);
    }

    #[test]
    fn ordering_crosses_numbering_scheme() {
        assert!(PgVersion::new(9, 6, 24) < PgVersion::new(10, 0, 0));
        assert!(PgVersion::new(9, 2, 0) > PgVersion::new(9, 1, 14));
    }

    #[test]
    fn at_least_compares_release_lines() {
        let v = PgVersion::new(9, 2, 4);
        assert!(v.at_least(9, 1));
        assert!(v.at_least(9, 2));
        assert!(!v.at_least(9, 6));
        assert!(PgVersion::new(12, 0, 3).at_least(9, 6));
    }

    #[test]
    fn display_matches_release_naming() {
        assert_eq!(PgVersion::new(9, 6, 24).to_string(), "9.6.24");
        assert_eq!(PgVersion::new(13, 0, 1).to_string(), "13.1");
        assert_eq!(ReleaseLine::new(9, 6).to_string(), "9.6");
        assert_eq!(ReleaseLine::new(13, 4).to_string(), "13");
    }

    #[test]
    fn default_table_knows_latest_line() {
        let table = VersionTable::default();
        assert_eq!(table.latest_patch(table.latest), Some(1));
        assert_eq!(table.latest_patch(ReleaseLine::new(8, 4)), None);
    }
}
