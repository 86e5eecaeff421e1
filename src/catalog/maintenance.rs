//! Maintenance backlog rules: large objects and relation-level counts.

use super::CheckId;
use crate::report::{Finding, Status};

/// `count` is `-1` when orphans cannot be counted (standby, no tool).
pub fn orphaned_large_objects(count: i64) -> Finding {
    let id = CheckId::OrphanedLargeObjects;
    match count {
        n if n < 0 => id.finding(
            Status::NotApplicable,
            "Orphaned large objects cannot be counted here",
        ),
        0 => id.finding(Status::Ok, "No orphaned large objects"),
        n => id.finding(
            Status::Warn,
            format!("{n} orphaned large object(s) found; remove them with vacuumlo"),
        ),
    }
}

/// What a relation-level count check counts, for messages.
pub fn counted_noun(id: CheckId) -> &'static str {
    match id {
        CheckId::Bloat => "bloated table(s)",
        CheckId::UnusedIndexes => "unused index(es)",
        CheckId::FreezeCandidates => "table(s) approaching wraparound freeze",
        CheckId::AnalyzeCandidates => "table(s) with stale statistics",
        _ => "object(s)",
    }
}

/// `0` is OK; anything else warns and asks for a detail listing.
pub fn relation_count(id: CheckId, count: i64) -> Finding {
    let noun = counted_noun(id);
    if count > 0 {
        id.finding(Status::Warn, format!("{count} {noun} found"))
    } else {
        id.finding(Status::Ok, format!("No {noun} found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_object_sentinel() {
        assert_eq!(orphaned_large_objects(-1).status, Status::NotApplicable);
        assert_eq!(orphaned_large_objects(0).status, Status::Ok);
        let f = orphaned_large_objects(12);
        assert_eq!(f.status, Status::Warn);
        assert!(f.message.starts_with("12 orphaned"));
    }

    #[test]
    fn counts() {
        assert_eq!(relation_count(CheckId::Bloat, 0).status, Status::Ok);
        let f = relation_count(CheckId::Bloat, 3);
        assert_eq!(f.status, Status::Warn);
        assert_eq!(f.message, "3 bloated table(s) found");
        assert_eq!(f.check, "bloat");
    }
}
