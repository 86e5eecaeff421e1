//! WAL, replication, checkpoint and background writer rules.

use super::CheckId;
use crate::config::Thresholds;
use crate::fmt::format_duration;
use crate::report::{Finding, Status};

pub fn archiving(ready: i64, archive_mode: bool, backlog: i64) -> Finding {
    let id = CheckId::Archiving;
    if ready > backlog {
        id.finding(
            Status::Warn,
            format!("Archiving is falling behind: {ready} WAL segments waiting (more than {backlog})"),
        )
    } else if ready == 0 {
        if archive_mode {
            id.finding(Status::Ok, "Archiving is working, no WAL segments waiting")
        } else {
            id.finding(Status::Ok, "Archiving is not enabled")
        }
    } else {
        id.finding(
            Status::Ok,
            format!("Archiving is working, {ready} WAL segments waiting"),
        )
    }
}

/// One row of `pg_stat_replication`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replica {
    pub name: String,
    pub state: String,
}

/// Replication facts as seen from the connected server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicationState {
    Primary { replicas: Vec<Replica> },
    /// Replay lag in seconds; `None` when nothing has been replayed yet.
    Standby { lag_seconds: Option<i64> },
}

pub fn replication(state: &ReplicationState, max_lag_seconds: i64) -> Finding {
    let id = CheckId::Replication;
    match state {
        ReplicationState::Primary { replicas } if replicas.is_empty() => {
            id.finding(Status::Ok, "Primary with no replicas attached")
        }
        ReplicationState::Primary { replicas } => {
            let lagging: Vec<String> = replicas
                .iter()
                .filter(|r| r.state != "streaming")
                .map(|r| format!("{} ({})", r.name, r.state))
                .collect();
            if lagging.is_empty() {
                id.finding(
                    Status::Ok,
                    format!("{} replica(s) streaming", replicas.len()),
                )
            } else {
                id.finding(
                    Status::Warn,
                    format!(
                        "{} of {} replica(s) not streaming: {}",
                        lagging.len(),
                        replicas.len(),
                        lagging.join(", ")
                    ),
                )
            }
        }
        ReplicationState::Standby { lag_seconds: None } => id.finding(
            Status::Ok,
            "Standby has not replayed any transaction yet",
        ),
        ReplicationState::Standby {
            lag_seconds: Some(lag),
        } => {
            if *lag > max_lag_seconds {
                id.finding(
                    Status::Warn,
                    format!(
                        "Standby replay lag is {}, more than {}",
                        format_duration(*lag),
                        format_duration(max_lag_seconds)
                    ),
                )
            } else {
                id.finding(
                    Status::Ok,
                    format!("Standby replay lag is {}", format_duration(*lag)),
                )
            }
        }
    }
}

/// Cumulative checkpointer and background writer counters.
///
/// From 17 on the checkpoint columns come from `pg_stat_checkpointer` and
/// backend writes from `pg_stat_io`; older servers keep everything in
/// `pg_stat_bgwriter`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WriterStats {
    pub checkpoints_timed: i64,
    pub checkpoints_requested: i64,
    /// Milliseconds.
    pub checkpoint_write_time: f64,
    /// Milliseconds.
    pub checkpoint_sync_time: f64,
    pub buffers_checkpoint: i64,
    pub buffers_clean: i64,
    pub maxwritten_clean: i64,
    pub buffers_backend: i64,
    pub buffers_backend_fsync: i64,
}

impl WriterStats {
    pub fn total_checkpoints(&self) -> i64 {
        self.checkpoints_timed + self.checkpoints_requested
    }
}

pub fn checkpoints(stats: &WriterStats, uptime_seconds: i64, t: &Thresholds) -> Finding {
    let id = CheckId::Checkpoints;
    let total = stats.total_checkpoints();
    if total <= 0 {
        return id.finding(Status::Ok, "No checkpoints since server start");
    }
    let avg_minutes = uptime_seconds as f64 / total as f64 / 60.0;
    let avg_duration =
        (stats.checkpoint_write_time + stats.checkpoint_sync_time) / total as f64 / 1000.0;
    let stats_line = format!(
        "{total} checkpoints, one every {avg_minutes:.1} minutes, average duration {avg_duration:.1} seconds"
    );
    if avg_minutes < t.checkpoint_min_minutes {
        id.finding(Status::Warn, format!("Checkpoints too frequent: {stats_line}"))
    } else if avg_minutes > t.checkpoint_max_minutes {
        id.finding(Status::Warn, format!("Checkpoints too infrequent: {stats_line}"))
    } else {
        id.finding(Status::Ok, stats_line)
    }
}

pub fn writer_behavior(stats: &WriterStats, t: &Thresholds) -> Finding {
    let id = CheckId::WriterBehavior;
    let mut notes = Vec::new();

    if stats.buffers_backend_fsync > 0 {
        notes.push(format!(
            "Backends had to fsync {} times themselves; the checkpointer fsync queue overflowed.",
            stats.buffers_backend_fsync
        ));
    }
    let background = stats.buffers_checkpoint + stats.buffers_clean;
    if stats.buffers_backend > background {
        notes.push(format!(
            "Backends wrote {} buffers, more than checkpointer and background writer combined ({}).",
            stats.buffers_backend, background
        ));
    }
    if stats.maxwritten_clean > t.bgwriter_maxwritten {
        notes.push(format!(
            "Background writer stopped early {} times; raise bgwriter_lru_maxpages.",
            stats.maxwritten_clean
        ));
    }
    if stats.checkpoints_requested > stats.checkpoints_timed {
        notes.push(format!(
            "Requested checkpoints ({}) exceed timed checkpoints ({}); raise max_wal_size.",
            stats.checkpoints_requested, stats.checkpoints_timed
        ));
    }
    if stats.buffers_backend > stats.buffers_clean {
        notes.push(format!(
            "Backends cleaned more buffers ({}) than the background writer ({}).",
            stats.buffers_backend, stats.buffers_clean
        ));
    }

    if notes.is_empty() {
        id.finding(Status::Ok, "Background writer and checkpointer keep up with the load")
    } else {
        id.finding(
            Status::Warn,
            format!("{} background writer issue(s):", notes.len()),
        )
        .with_notes(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archiving_messages() {
        assert_eq!(archiving(1001, true, 1000).status, Status::Warn);
        assert_eq!(archiving(1000, true, 1000).status, Status::Ok);
        assert!(archiving(0, false, 1000).message.contains("not enabled"));
        assert!(archiving(0, true, 1000).message.contains("no WAL segments"));
        assert!(archiving(7, true, 1000).message.contains("7 WAL segments waiting"));
    }

    #[test]
    fn replica_not_streaming_warns() {
        let state = ReplicationState::Primary {
            replicas: vec![
                Replica {
                    name: "r1".to_string(),
                    state: "streaming".to_string(),
                },
                Replica {
                    name: "r2".to_string(),
                    state: "catchup".to_string(),
                },
            ],
        };
        let f = replication(&state, 900);
        assert_eq!(f.status, Status::Warn);
        assert!(f.message.contains("r2 (catchup)"));
    }

    #[test]
    fn primary_without_replicas_is_ok() {
        let f = replication(&ReplicationState::Primary { replicas: vec![] }, 900);
        assert_eq!(f.status, Status::Ok);
    }

    #[test]
    fn standby_lag_threshold() {
        let lagging = ReplicationState::Standby {
            lag_seconds: Some(901),
        };
        assert_eq!(replication(&lagging, 900).status, Status::Warn);
        let fine = ReplicationState::Standby {
            lag_seconds: Some(900),
        };
        assert_eq!(replication(&fine, 900).status, Status::Ok);
    }

    #[test]
    fn checkpoint_interval_bands() {
        let t = Thresholds::default();
        let stats = WriterStats {
            checkpoints_timed: 10,
            checkpoints_requested: 2,
            checkpoint_write_time: 60_000.0,
            checkpoint_sync_time: 12_000.0,
            ..WriterStats::default()
        };
        // 12 checkpoints over 2 hours: every 10 minutes, 6 seconds each.
        let f = checkpoints(&stats, 7200, &t);
        assert_eq!(f.status, Status::Ok);
        assert!(f.message.contains("every 10.0 minutes"), "{}", f.message);
        assert!(f.message.contains("6.0 seconds"));

        assert!(checkpoints(&stats, 1200, &t).message.starts_with("Checkpoints too frequent"));
        assert!(checkpoints(&stats, 72_000, &t).message.starts_with("Checkpoints too infrequent"));
        assert_eq!(checkpoints(&WriterStats::default(), 100, &t).status, Status::Ok);
    }

    #[test]
    fn writer_fragments_accumulate_in_one_finding() {
        let t = Thresholds::default();
        let stats = WriterStats {
            checkpoints_timed: 5,
            checkpoints_requested: 9,
            buffers_checkpoint: 100,
            buffers_clean: 50,
            maxwritten_clean: 600_000,
            buffers_backend: 400,
            buffers_backend_fsync: 1,
            ..WriterStats::default()
        };
        let f = writer_behavior(&stats, &t);
        assert_eq!(f.status, Status::Warn);
        assert_eq!(f.notes.len(), 5);

        let healthy = WriterStats {
            checkpoints_timed: 10,
            buffers_checkpoint: 1000,
            buffers_clean: 500,
            buffers_backend: 100,
            ..WriterStats::default()
        };
        let f = writer_behavior(&healthy, &t);
        assert_eq!(f.status, Status::Ok);
        assert!(f.notes.is_empty());
    }
}
