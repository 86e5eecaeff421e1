//! Check runner.
//!
//! [`run_check`] turns one [`CheckId`] into a [`Finding`] (and, for
//! relation-level checks with a non-zero count, a [`DetailSection`]).
//! Gating happens first, then the version-appropriate statements run
//! through the executor and the catalog evaluates the parsed values.
//! A failing check yields a [`Status::Error`] finding and never aborts
//! the caller.

mod large_objects;
mod queries;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::catalog::wal::{Replica, ReplicationState, WriterStats};
use crate::catalog::{CheckId, activity, currency, maintenance, memory, settings, wal};
use crate::config::{ConnectionOptions, Thresholds};
use crate::context::ClusterContext;
use crate::error::CheckError;
use crate::executor::{QueryExecutor, Row};
use crate::fmt::format_bytes;
use crate::host::{FileSystem, count_ready_segments};
use crate::report::{DetailSection, Finding, Status};
use crate::version::VersionTable;

/// Everything a check may read besides the executor.
pub struct CheckEnv<'a> {
    pub ctx: &'a ClusterContext,
    pub thresholds: &'a Thresholds,
    pub versions: &'a VersionTable,
    /// Date the version table's staleness is measured against.
    pub today: NaiveDate,
    pub fs: &'a dyn FileSystem,
    pub conn: &'a ConnectionOptions,
    /// `vacuumlo` binary; orphaned large objects are not counted without it.
    pub vacuumlo: Option<PathBuf>,
}

/// Result of one check.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckOutcome {
    pub finding: Finding,
    pub detail: Option<DetailSection>,
}

impl From<Finding> for CheckOutcome {
    fn from(finding: Finding) -> Self {
        Self {
            finding,
            detail: None,
        }
    }
}

/// Runs one check. Never fails: errors become findings.
pub fn run_check(id: CheckId, env: &CheckEnv, exec: &mut dyn QueryExecutor) -> CheckOutcome {
    if let Some(reason) = id.spec().not_applicable(env.ctx) {
        debug!(check = id.id(), reason = %reason, "check not applicable");
        return id.finding(Status::NotApplicable, reason).into();
    }

    match evaluate(id, env, exec) {
        Ok(outcome) => outcome,
        Err(CheckError::NoRows) => {
            debug!(check = id.id(), "check query returned no rows");
            id.finding(Status::Ok, "No data returned").into()
        }
        Err(e) => {
            warn!(check = id.id(), error = %e, "check failed");
            id.finding(Status::Error, format!("Check failed: {e}")).into()
        }
    }
}

fn evaluate(
    id: CheckId,
    env: &CheckEnv,
    exec: &mut dyn QueryExecutor,
) -> Result<CheckOutcome, CheckError> {
    let ctx = env.ctx;
    let t = env.thresholds;
    let v = ctx.version;

    let finding = match id {
        CheckId::VersionMajor => currency::version_major(
            v,
            env.versions,
            env.today,
            t.version_table_max_age_days,
        ),
        CheckId::VersionMinor => currency::version_minor(
            v,
            env.versions,
            env.today,
            t.version_table_max_age_days,
        ),
        CheckId::MemSharedBuffers => memory::shared_buffers(ctx),
        CheckId::MemWorkMem => memory::work_mem(ctx),
        CheckId::MemMaintenanceWorkMem => memory::maintenance_work_mem(ctx),
        CheckId::MemEffectiveCacheSize => memory::effective_cache_size(ctx),
        CheckId::CacheHitRatio => {
            let row = exec.query_one(queries::cache_hit_query())?;
            activity::cache_hit_ratio(row.i64_or_zero(0)?, row.i64_or_zero(1)?)
        }
        CheckId::Connections => {
            let current = scalar(exec, &queries::connections_query(v))?;
            activity::connections(current, ctx.max_connections, t.connections_pct)
        }
        CheckId::IdleInTransaction => activity::idle_in_transaction(
            scalar(exec, &queries::idle_in_transaction_query(t.idle_in_tx_minutes))?,
            t.idle_in_tx_minutes,
        ),
        CheckId::LongRunningQueries => activity::long_running_queries(
            scalar(exec, &queries::long_running_query(v, t.long_query_minutes))?,
            t.long_query_minutes,
        ),
        CheckId::BlockedQueries => activity::blocked_queries(
            scalar(exec, &queries::blocked_query(v, t.blocked_seconds))?,
            t.blocked_seconds,
        ),
        CheckId::Archiving => archiving(env)?,
        CheckId::Replication => {
            wal::replication(&replication_state(env, exec)?, t.replay_lag_seconds)
        }
        CheckId::DatabaseConflicts => {
            let row = exec.query_one(queries::conflicts_query(v))?;
            activity::database_conflicts(activity::ConflictCounts {
                conflicts: row.i64_or_zero(0)?,
                deadlocks: row.i64_or_zero(1)?,
                temp_files: row.i64_or_zero(2)?,
            })
        }
        CheckId::Checkpoints => wal::checkpoints(&writer_stats(env, exec)?, ctx.uptime_seconds, t),
        CheckId::ConfigSanity => settings::config_sanity(ctx),
        CheckId::WriterBehavior => wal::writer_behavior(&writer_stats(env, exec)?, t),
        CheckId::OrphanedLargeObjects => {
            maintenance::orphaned_large_objects(orphaned_large_objects(env)?)
        }
        CheckId::Bloat
        | CheckId::UnusedIndexes
        | CheckId::FreezeCandidates
        | CheckId::AnalyzeCandidates => return relation_check(id, env, exec),
        CheckId::OvercommitMemory | CheckId::OvercommitRatio => match ctx.overcommit {
            Some(o) if id == CheckId::OvercommitMemory => settings::overcommit_memory(o),
            Some(o) => settings::overcommit_ratio(o),
            None => id.finding(
                Status::NotApplicable,
                "Kernel overcommit settings are not readable on this host",
            ),
        },
    };
    Ok(finding.into())
}

/// First column of the first row as an integer.
fn scalar(exec: &mut dyn QueryExecutor, sql: &str) -> Result<i64, CheckError> {
    exec.query_one(sql)?.i64_or_zero(0)
}

fn archiving(env: &CheckEnv) -> Result<Finding, CheckError> {
    let ctx = env.ctx;
    let Some(ref data_dir) = ctx.data_directory else {
        return Ok(CheckId::Archiving.finding(
            Status::NotApplicable,
            "Data directory is not visible to this user",
        ));
    };
    let wal_dir = if ctx.version.at_least(10, 0) {
        "pg_wal"
    } else {
        "pg_xlog"
    };
    let status_dir = Path::new(data_dir).join(wal_dir).join("archive_status");
    let ready = count_ready_segments(env.fs, &status_dir).map_err(|e| {
        CheckError::Tool(format!("cannot list {}: {}", status_dir.display(), e))
    })?;
    debug!(dir = %status_dir.display(), ready, "counted WAL .ready markers");
    Ok(wal::archiving(
        ready,
        ctx.archive_mode,
        env.thresholds.wal_ready_backlog,
    ))
}

fn replication_state(
    env: &CheckEnv,
    exec: &mut dyn QueryExecutor,
) -> Result<ReplicationState, CheckError> {
    let v = env.ctx.version;
    if env.ctx.is_standby() {
        let lag = exec.query_one(queries::standby_lag_query(v))?.opt_i64(0)?;
        return Ok(ReplicationState::Standby { lag_seconds: lag });
    }
    let replicas = exec
        .query(&queries::replicas_query(v))?
        .iter()
        .map(|row| {
            let name = row.get_str(0)?;
            Ok(Replica {
                name: if name.is_empty() { row.get_str(1)? } else { name },
                state: row.get_str(2)?,
            })
        })
        .collect::<Result<Vec<_>, CheckError>>()?;
    Ok(ReplicationState::Primary { replicas })
}

fn writer_stats(env: &CheckEnv, exec: &mut dyn QueryExecutor) -> Result<WriterStats, CheckError> {
    let row: Row = exec.query_one(queries::writer_stats_query(env.ctx.version))?;
    Ok(WriterStats {
        checkpoints_timed: row.i64_or_zero(0)?,
        checkpoints_requested: row.i64_or_zero(1)?,
        checkpoint_write_time: row.opt_f64(2)?.unwrap_or(0.0),
        checkpoint_sync_time: row.opt_f64(3)?.unwrap_or(0.0),
        buffers_checkpoint: row.i64_or_zero(4)?,
        buffers_clean: row.i64_or_zero(5)?,
        maxwritten_clean: row.i64_or_zero(6)?,
        buffers_backend: row.i64_or_zero(7)?,
        buffers_backend_fsync: row.i64_or_zero(8)?,
    })
}

/// `-1` when the count is not obtainable here.
fn orphaned_large_objects(env: &CheckEnv) -> Result<i64, CheckError> {
    if env.ctx.is_standby() {
        return Ok(-1);
    }
    match env.vacuumlo {
        Some(ref tool) => large_objects::count_orphaned(tool, env.conn),
        None => Ok(-1),
    }
}

/// Why rows of a detail listing are included.
fn criterion(id: CheckId, t: &Thresholds) -> String {
    match id {
        CheckId::Bloat => format!(
            "Tables are listed here because at least {}% is bloated or wasted space exceeds {}.",
            t.bloat_pct,
            format_bytes(t.bloat_bytes.max(0) as u64)
        ),
        CheckId::UnusedIndexes => {
            "Indexes are listed here because they were never scanned and enforce no constraint."
                .to_string()
        }
        CheckId::FreezeCandidates => format!(
            "Tables are listed here because their transaction id age exceeds {}% of autovacuum_freeze_max_age.",
            t.freeze_age_pct
        ),
        _ => format!(
            "Tables are listed here because they were never analyzed or not within {} days.",
            t.analyze_stale_days
        ),
    }
}

fn relation_check(
    id: CheckId,
    env: &CheckEnv,
    exec: &mut dyn QueryExecutor,
) -> Result<CheckOutcome, CheckError> {
    let t = env.thresholds;
    let schema = env.ctx.schema.as_deref();
    let q = match id {
        CheckId::Bloat => queries::bloat_queries(schema, t),
        CheckId::UnusedIndexes => queries::unused_index_queries(schema),
        CheckId::FreezeCandidates => queries::freeze_queries(schema, t),
        _ => queries::analyze_queries(schema, t),
    };

    let count = scalar(exec, &q.count)?;
    let mut finding = maintenance::relation_count(id, count);
    if count <= 0 {
        return Ok(finding.into());
    }

    // The listing is optional: a failure keeps the count finding.
    let detail = match exec.query(&q.detail) {
        Ok(rows) => Some(DetailSection {
            check: id.id(),
            title: capitalize(maintenance::counted_noun(id)),
            criterion: criterion(id, t),
            columns: q.columns.iter().map(|c| c.to_string()).collect(),
            rows: rows.iter().map(Row::to_strings).collect(),
        }),
        Err(e) => {
            warn!(check = id.id(), error = %e, "detail listing failed");
            finding = finding.with_notes(vec![format!("Detail listing unavailable: {e}")]);
            None
        }
    };
    Ok(CheckOutcome { finding, detail })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
