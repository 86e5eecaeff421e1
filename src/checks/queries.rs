//! SQL builders for the diagnostic checks.
//!
//! Builders take the server version and pick the catalog columns that
//! exist on it. Relation-level checks share one core statement between
//! the count and the detail listing so both always agree.

use crate::config::Thresholds;
use crate::version::PgVersion;

/// Quotes a string literal for inclusion in SQL.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Restricts `column` to one schema, or excludes system schemas.
fn schema_filter(column: &str, schema: Option<&str>) -> String {
    match schema {
        Some(name) => format!("{column} = {}", quote_literal(name)),
        None => format!(
            "{column} NOT IN ('pg_catalog', 'information_schema') AND {column} !~ '^pg_toast'"
        ),
    }
}

/// Client sessions only; background workers show up in
/// pg_stat_activity from 10 on.
fn client_backends(version: PgVersion) -> &'static str {
    if version.at_least(10, 0) {
        " AND backend_type = 'client backend'"
    } else {
        ""
    }
}

pub(super) fn cache_hit_query() -> &'static str {
    r#"
        SELECT
            COALESCE(sum(blks_hit), 0)::bigint AS hits,
            COALESCE(sum(blks_read), 0)::bigint AS reads
        FROM pg_stat_database
    "#
}

pub(super) fn connections_query(version: PgVersion) -> String {
    format!(
        "SELECT count(*) AS connections FROM pg_stat_activity WHERE true{}",
        client_backends(version)
    )
}

pub(super) fn idle_in_transaction_query(minutes: i64) -> String {
    format!(
        r#"
        SELECT count(*) AS idle_in_transaction
        FROM pg_stat_activity
        WHERE state IN ('idle in transaction', 'idle in transaction (aborted)')
          AND now() - state_change > interval '{minutes} minutes'
    "#
    )
}

pub(super) fn long_running_query(version: PgVersion, minutes: i64) -> String {
    format!(
        r#"
        SELECT count(*) AS long_running
        FROM pg_stat_activity
        WHERE state = 'active'
          AND pid <> pg_backend_pid()
          AND now() - query_start > interval '{minutes} minutes'{}
    "#,
        client_backends(version)
    )
}

/// 9.6 replaced the `waiting` flag with wait events.
pub(super) fn blocked_query(version: PgVersion, seconds: i64) -> String {
    let waiting = if version.at_least(9, 6) {
        "wait_event IS NOT NULL"
    } else {
        "waiting"
    };
    format!(
        r#"
        SELECT count(*) AS blocked
        FROM pg_stat_activity
        WHERE {waiting}
          AND state = 'active'
          AND now() - query_start > interval '{seconds} seconds'
    "#
    )
}

/// Deadlock and temp file counters appeared in 9.2.
pub(super) fn conflicts_query(version: PgVersion) -> &'static str {
    if version.at_least(9, 2) {
        r#"
        SELECT
            COALESCE(sum(conflicts), 0)::bigint,
            COALESCE(sum(deadlocks), 0)::bigint,
            COALESCE(sum(temp_files), 0)::bigint
        FROM pg_stat_database
    "#
    } else {
        "SELECT COALESCE(sum(conflicts), 0)::bigint, -1::bigint, -1::bigint FROM pg_stat_database"
    }
}

/// Replica states as seen from a primary. 10 renamed `*_location` to
/// `*_lsn`.
pub(super) fn replicas_query(version: PgVersion) -> String {
    let replay = if version.at_least(10, 0) {
        "replay_lsn"
    } else {
        "replay_location"
    };
    format!(
        r#"
        SELECT
            COALESCE(application_name, '') AS name,
            COALESCE(client_addr::text, 'local') AS client,
            COALESCE(state, '') AS replica_state,
            COALESCE({replay}::text, '') AS replay_position
        FROM pg_stat_replication
        ORDER BY application_name
    "#
    )
}

/// Replay lag on a standby, in seconds. A standby that has replayed
/// everything it received is not lagging even if the primary is idle.
pub(super) fn standby_lag_query(version: PgVersion) -> &'static str {
    if version.at_least(10, 0) {
        r#"
        SELECT CASE
            WHEN pg_last_wal_receive_lsn() = pg_last_wal_replay_lsn() THEN 0
            ELSE EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))::bigint
        END AS replay_lag
    "#
    } else {
        r#"
        SELECT CASE
            WHEN pg_last_xlog_receive_location() = pg_last_xlog_replay_location() THEN 0
            ELSE EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))::bigint
        END AS replay_lag
    "#
    }
}

/// Checkpointer and background writer counters.
///
/// PG < 17: all fields in pg_stat_bgwriter.
/// PG 17+:  checkpoint fields from pg_stat_checkpointer, backend writes
///          and fsyncs from pg_stat_io.
pub(super) fn writer_stats_query(version: PgVersion) -> &'static str {
    if version.at_least(17, 0) {
        r#"
        SELECT
            COALESCE(c.num_timed, 0)::bigint AS checkpoints_timed,
            COALESCE(c.num_requested, 0)::bigint AS checkpoints_req,
            COALESCE(c.write_time, 0)::double precision AS checkpoint_write_time,
            COALESCE(c.sync_time, 0)::double precision AS checkpoint_sync_time,
            COALESCE(c.buffers_written, 0)::bigint AS buffers_checkpoint,
            COALESCE(b.buffers_clean, 0)::bigint AS buffers_clean,
            COALESCE(b.maxwritten_clean, 0)::bigint AS maxwritten_clean,
            io.writes AS buffers_backend,
            io.fsyncs AS buffers_backend_fsync
        FROM pg_stat_bgwriter b
        CROSS JOIN pg_stat_checkpointer c
        CROSS JOIN (
            SELECT COALESCE(sum(writes), 0)::bigint AS writes,
                   COALESCE(sum(fsyncs), 0)::bigint AS fsyncs
            FROM pg_stat_io
            WHERE backend_type = 'client backend'
        ) io
    "#
    } else {
        r#"
        SELECT
            COALESCE(checkpoints_timed, 0)::bigint AS checkpoints_timed,
            COALESCE(checkpoints_req, 0)::bigint AS checkpoints_req,
            COALESCE(checkpoint_write_time, 0)::double precision AS checkpoint_write_time,
            COALESCE(checkpoint_sync_time, 0)::double precision AS checkpoint_sync_time,
            COALESCE(buffers_checkpoint, 0)::bigint AS buffers_checkpoint,
            COALESCE(buffers_clean, 0)::bigint AS buffers_clean,
            COALESCE(maxwritten_clean, 0)::bigint AS maxwritten_clean,
            COALESCE(buffers_backend, 0)::bigint AS buffers_backend,
            COALESCE(buffers_backend_fsync, 0)::bigint AS buffers_backend_fsync
        FROM pg_stat_bgwriter
    "#
    }
}

// ============================================================
// Relation-level checks: count + detail listing
// ============================================================

/// Count and detail statements over one shared core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct RelationQueries {
    pub count: String,
    pub detail: String,
    pub columns: &'static [&'static str],
}

impl RelationQueries {
    fn new(core: String, alias: &str, select: &str, order: &str, columns: &'static [&'static str]) -> Self {
        Self {
            count: format!("SELECT count(*) AS {alias} FROM ({core}) c"),
            detail: format!("SELECT {select} FROM ({core}) d ORDER BY {order}"),
            columns,
        }
    }
}

/// Estimated table bloat from pg_class page counts against the row
/// width recorded in pg_stats. Tables of 10 pages or less are ignored.
pub(super) fn bloat_queries(schema: Option<&str>, t: &Thresholds) -> RelationQueries {
    let core = format!(
        r#"
        SELECT schema, relation, pg_size_pretty(total_bytes) AS size,
               bloat_pct, pg_size_pretty(wasted_bytes) AS wasted, wasted_bytes
        FROM (
            SELECT schema, relation, total_bytes, wasted_bytes,
                   round(100.0 * wasted_bytes / NULLIF(total_bytes, 0))::integer AS bloat_pct
            FROM (
                SELECT n.nspname AS schema, c.relname AS relation,
                       c.relpages::bigint * bs.size AS total_bytes,
                       GREATEST(c.relpages - CEIL(GREATEST(c.reltuples, 0) * (28 + COALESCE(w.width, 0)) / (bs.size - 24)), 0)::bigint * bs.size AS wasted_bytes
                FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                CROSS JOIN (SELECT current_setting('block_size')::bigint AS size) bs
                LEFT JOIN (
                    SELECT schemaname, tablename, sum((1 - null_frac) * avg_width) AS width
                    FROM pg_stats
                    GROUP BY schemaname, tablename
                ) w ON w.schemaname = n.nspname AND w.tablename = c.relname
                WHERE c.relkind = 'r' AND c.relpages > 10 AND {filter}
            ) e
        ) b
        WHERE bloat_pct >= {pct} OR wasted_bytes > {bytes}
    "#,
        filter = schema_filter("n.nspname", schema),
        pct = t.bloat_pct,
        bytes = t.bloat_bytes,
    );
    RelationQueries::new(
        core,
        "bloated",
        "schema, relation, size, bloat_pct, wasted",
        "wasted_bytes DESC",
        &["schema", "relation", "size", "bloat_pct", "wasted"],
    )
}

/// Never-scanned indexes that do not enforce a constraint.
pub(super) fn unused_index_queries(schema: Option<&str>) -> RelationQueries {
    let core = format!(
        r#"
        SELECT s.schemaname AS schema, s.relname AS table_name, s.indexrelname AS index_name,
               pg_size_pretty(pg_relation_size(s.indexrelid)) AS size,
               pg_relation_size(s.indexrelid) AS size_bytes
        FROM pg_stat_user_indexes s
        JOIN pg_index i ON i.indexrelid = s.indexrelid
        WHERE s.idx_scan = 0 AND NOT i.indisunique AND NOT i.indisprimary AND {filter}
    "#,
        filter = schema_filter("s.schemaname", schema),
    );
    RelationQueries::new(
        core,
        "unused_indexes",
        "schema, table_name, index_name, size",
        "size_bytes DESC",
        &["schema", "table", "index", "size"],
    )
}

/// Tables whose transaction id age approaches autovacuum_freeze_max_age.
pub(super) fn freeze_queries(schema: Option<&str>, t: &Thresholds) -> RelationQueries {
    let core = format!(
        r#"
        SELECT n.nspname AS schema, c.relname AS table_name,
               age(c.relfrozenxid) AS xid_age,
               round(100.0 * age(c.relfrozenxid) / current_setting('autovacuum_freeze_max_age')::bigint)::integer AS pct_of_max
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'm')
          AND age(c.relfrozenxid) > current_setting('autovacuum_freeze_max_age')::bigint * {pct} / 100
          AND {filter}
    "#,
        pct = t.freeze_age_pct,
        filter = schema_filter("n.nspname", schema),
    );
    RelationQueries::new(
        core,
        "freeze_candidates",
        "schema, table_name, xid_age, pct_of_max",
        "xid_age DESC",
        &["schema", "table", "xid_age", "pct_of_max"],
    )
}

/// Populated tables never analyzed, or not analyzed for a while.
pub(super) fn analyze_queries(schema: Option<&str>, t: &Thresholds) -> RelationQueries {
    let core = format!(
        r#"
        SELECT schemaname AS schema, relname AS table_name, n_live_tup,
               COALESCE(GREATEST(last_analyze, last_autoanalyze)::text, 'never') AS analyzed,
               GREATEST(last_analyze, last_autoanalyze) AS last_analyzed
        FROM pg_stat_user_tables
        WHERE n_live_tup > 0
          AND (GREATEST(last_analyze, last_autoanalyze) IS NULL
               OR GREATEST(last_analyze, last_autoanalyze) < now() - interval '{days} days')
          AND {filter}
    "#,
        days = t.analyze_stale_days,
        filter = schema_filter("schemaname", schema),
    );
    RelationQueries::new(
        core,
        "analyze_candidates",
        "schema, table_name, n_live_tup, analyzed",
        "last_analyzed NULLS FIRST",
        &["schema", "table", "live_rows", "last_analyzed"],
    )
}
