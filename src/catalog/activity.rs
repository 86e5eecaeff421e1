//! Session and database activity rules.

use super::CheckId;
use crate::report::{Finding, Status};

/// Buffer cache effectiveness, percent. The `+ 1` keeps an idle cluster
/// (no hits, no reads) from dividing by zero.
pub fn cache_ratio(hits: i64, reads: i64) -> f64 {
    hits as f64 / (reads + hits + 1) as f64 * 100.0
}

/// Bands a cache hit ratio. `[70, 90)` stays a warning, labelled moderate.
pub fn evaluate_cache_ratio(ratio: f64) -> (Status, &'static str) {
    if ratio < 70.0 {
        (Status::Warn, "Low")
    } else if ratio < 90.0 {
        (Status::Warn, "Moderate")
    } else {
        (Status::Ok, "High")
    }
}

pub fn cache_hit_ratio(hits: i64, reads: i64) -> Finding {
    let ratio = cache_ratio(hits, reads);
    let (status, band) = evaluate_cache_ratio(ratio);
    CheckId::CacheHitRatio.finding(status, format!("{band} cache hit ratio: {ratio:.2}%"))
}

pub fn connections(current: i64, max_connections: i64, limit_pct: f64) -> Finding {
    let id = CheckId::Connections;
    if max_connections <= 0 {
        return id.finding(Status::NotApplicable, "max_connections is not set");
    }
    let pct = current as f64 / max_connections as f64 * 100.0;
    if pct > limit_pct {
        id.finding(
            Status::Warn,
            format!(
                "{current} of {max_connections} connections in use ({pct:.0}%), greater than {limit_pct}% of max_connections"
            ),
        )
    } else {
        id.finding(
            Status::Ok,
            format!("{current} of {max_connections} connections in use ({pct:.0}%)"),
        )
    }
}

fn session_count(id: CheckId, count: i64, what: &str, limit: &str) -> Finding {
    if count > 0 {
        id.finding(
            Status::Warn,
            format!("{count} {what} for more than {limit}"),
        )
    } else {
        id.finding(Status::Ok, format!("No {what} for more than {limit}"))
    }
}

pub fn idle_in_transaction(count: i64, minutes: i64) -> Finding {
    session_count(
        CheckId::IdleInTransaction,
        count,
        "session(s) idle in transaction",
        &format!("{minutes} minutes"),
    )
}

pub fn long_running_queries(count: i64, minutes: i64) -> Finding {
    session_count(
        CheckId::LongRunningQueries,
        count,
        "active query(s) running",
        &format!("{minutes} minutes"),
    )
}

pub fn blocked_queries(count: i64, seconds: i64) -> Finding {
    session_count(
        CheckId::BlockedQueries,
        count,
        "active query(s) waiting",
        &format!("{seconds} seconds"),
    )
}

/// Cumulative conflict counters. `-1` marks a counter the server does not
/// track (deadlocks and temp files before 9.2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConflictCounts {
    pub conflicts: i64,
    pub deadlocks: i64,
    pub temp_files: i64,
}

impl ConflictCounts {
    fn available(&self) -> impl Iterator<Item = (&'static str, i64)> {
        [
            ("conflicts", self.conflicts),
            ("deadlocks", self.deadlocks),
            ("temp_files", self.temp_files),
        ]
        .into_iter()
        .filter(|(_, n)| *n >= 0)
    }

    pub fn total(&self) -> i64 {
        self.available().map(|(_, n)| n).sum()
    }
}

pub fn database_conflicts(counts: ConflictCounts) -> Finding {
    let id = CheckId::DatabaseConflicts;
    if counts.total() > 0 {
        let items: Vec<String> = counts
            .available()
            .map(|(name, n)| format!("{name}={n}"))
            .collect();
        id.finding(
            Status::Warn,
            format!("Conflicts found since statistics reset: {}", items.join(" ")),
        )
    } else {
        id.finding(Status::Ok, "No conflicts, deadlocks or temp files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_ratio_bands() {
        assert_eq!(evaluate_cache_ratio(69.99).1, "Low");
        assert_eq!(evaluate_cache_ratio(70.0), (Status::Warn, "Moderate"));
        assert_eq!(evaluate_cache_ratio(89.99), (Status::Warn, "Moderate"));
        assert_eq!(evaluate_cache_ratio(90.0), (Status::Ok, "High"));
    }

    #[test]
    fn high_cache_hit_ratio() {
        let f = cache_hit_ratio(950, 50);
        assert_eq!(f.status, Status::Ok);
        assert!(f.message.contains("High cache hit ratio"), "{}", f.message);
    }

    #[test]
    fn idle_cluster_ratio_is_zero() {
        assert_eq!(cache_ratio(0, 0), 0.0);
        assert_eq!(cache_hit_ratio(0, 0).status, Status::Warn);
    }

    #[test]
    fn connections_above_eighty_percent_warn() {
        let f = connections(85, 100, 80.0);
        assert_eq!(f.status, Status::Warn);
        assert!(f.message.contains("greater than 80%"), "{}", f.message);
        assert_eq!(connections(80, 100, 80.0).status, Status::Ok);
    }

    #[test]
    fn session_counts() {
        assert_eq!(idle_in_transaction(0, 10).status, Status::Ok);
        let f = long_running_queries(2, 5);
        assert_eq!(f.status, Status::Warn);
        assert!(f.message.starts_with("2 active"));
        assert!(blocked_queries(1, 30).message.contains("30 seconds"));
    }

    #[test]
    fn conflicts_exclude_unavailable_counters() {
        let old = ConflictCounts {
            conflicts: 0,
            deadlocks: -1,
            temp_files: -1,
        };
        assert_eq!(old.total(), 0);
        assert_eq!(database_conflicts(old).status, Status::Ok);

        let f = database_conflicts(ConflictCounts {
            conflicts: 0,
            deadlocks: 2,
            temp_files: 5,
        });
        assert_eq!(f.status, Status::Warn);
        assert!(f.message.ends_with("conflicts=0 deadlocks=2 temp_files=5"));
    }
}
