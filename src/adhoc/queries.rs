//! SQL for the ad-hoc actions.

use crate::version::PgVersion;

pub(super) const ACTIVE_SESSIONS: &str = "SELECT count(*) AS active FROM pg_stat_activity WHERE state IN ('active', 'idle in transaction')";

pub(super) const UPTIME: &str = r#"
    SELECT to_char(pg_postmaster_start_time(), 'YYYY-MM-DD HH24:MI:SS') AS starttime,
           (EXTRACT(EPOCH FROM (now() - pg_postmaster_start_time()))::bigint / 60) AS uptime_minutes
"#;

/// Single-line query text of at most `max_len` characters.
fn query_text(column: &str, max_len: usize) -> String {
    format!(
        "regexp_replace(substring({column}, 1, {max_len}), E'[\\n\\r\\t]+', ' ', 'g')"
    )
}

/// Active sessions, longest running first.
pub(super) fn long_queries(max_len: usize) -> String {
    format!(
        r#"
    SELECT COALESCE(datname, '') AS datname, pid, COALESCE(client_addr::text, 'local') AS client_addr,
           COALESCE(usename, '') AS usename, COALESCE(application_name, '') AS app,
           to_char(query_start, 'YYYY-MM-DD HH24:MI:SS') AS query_start,
           EXTRACT(EPOCH FROM (now() - backend_start))::bigint AS conn_secs,
           EXTRACT(EPOCH FROM (now() - query_start))::bigint AS q_secs,
           {query} AS query
    FROM pg_stat_activity
    WHERE state = 'active' AND pid <> pg_backend_pid()
    ORDER BY q_secs DESC
"#,
        query = query_text("query", max_len)
    )
}

/// Blocked/blocking session pairs. Wait event columns exist from 9.6.
pub(super) fn blocked_queries(version: PgVersion, max_len: usize) -> String {
    let (blocked_wait, blocking_wait) = if version.at_least(9, 6) {
        (
            "COALESCE(blocked.wait_event, 'N/A')",
            "COALESCE(blocking.wait_event, 'N/A')",
        )
    } else {
        ("'N/A'", "'N/A'")
    };
    format!(
        r#"
    SELECT COALESCE(blocked.datname, '') AS blocked_db, bl.pid AS blocked_pid,
           COALESCE(blocked.usename, '') AS blocked_user, {blocked_wait} AS blocked_wait_event,
           EXTRACT(EPOCH FROM (now() - blocked.query_start))::bigint AS blocked_secs,
           kl.pid AS blocking_pid, COALESCE(blocking.usename, '') AS blocking_user,
           COALESCE(blocking.state, '') AS blocking_state, {blocking_wait} AS blocking_wait_event,
           EXTRACT(EPOCH FROM (now() - blocking.query_start))::bigint AS blocking_secs,
           {blocked_sql} AS blocked_statement,
           {blocking_sql} AS blocking_statement
    FROM pg_catalog.pg_locks bl
    JOIN pg_catalog.pg_stat_activity blocked ON blocked.pid = bl.pid
    JOIN pg_catalog.pg_locks kl
      ON kl.locktype = bl.locktype
     AND kl.database IS NOT DISTINCT FROM bl.database
     AND kl.relation IS NOT DISTINCT FROM bl.relation
     AND kl.page IS NOT DISTINCT FROM bl.page
     AND kl.tuple IS NOT DISTINCT FROM bl.tuple
     AND kl.virtualxid IS NOT DISTINCT FROM bl.virtualxid
     AND kl.transactionid IS NOT DISTINCT FROM bl.transactionid
     AND kl.classid IS NOT DISTINCT FROM bl.classid
     AND kl.objid IS NOT DISTINCT FROM bl.objid
     AND kl.objsubid IS NOT DISTINCT FROM bl.objsubid
     AND kl.pid <> bl.pid
    JOIN pg_catalog.pg_stat_activity blocking ON blocking.pid = kl.pid
    WHERE NOT bl.granted AND blocked.state = 'active'
"#,
        blocked_sql = query_text("blocked.query", max_len),
        blocking_sql = query_text("blocking.query", max_len),
    )
}

/// Top 20 tables by estimated bloat ratio, fillfactor aware. `relhasoids`
/// is gone from 12 on.
pub(super) fn table_bloat(version: PgVersion, schema: Option<&str>) -> String {
    let oids = if version.at_least(12, 0) {
        "0"
    } else {
        "CASE WHEN tbl.relhasoids THEN 4 ELSE 0 END"
    };
    let schema_filter = match schema {
        Some(name) => format!("ns.nspname = '{}'", name.replace('\'', "''")),
        None => "ns.nspname NOT IN ('pg_catalog', 'information_schema')".to_string(),
    };
    format!(
        r#"
    SELECT schemaname, tblname AS relation, pretty_size,
           ((tblpages - est_tblpages_ff) * bs)::bigint AS bloat_size,
           CASE WHEN tblpages - est_tblpages_ff > 0
                THEN round(100 * (tblpages - est_tblpages_ff) / tblpages::float)
                ELSE 0 END AS bloat_ratio,
           fillfactor
    FROM (
        SELECT ceil(reltuples / ((bs - page_hdr) * fillfactor / (tpl_size * 100))) + ceil(toasttuples / 4) AS est_tblpages_ff,
               tblpages, fillfactor, bs, schemaname, tblname, pretty_size
        FROM (
            SELECT (4 + tpl_hdr_size + tpl_data_size + (2 * ma)
                    - CASE WHEN tpl_hdr_size % ma = 0 THEN ma ELSE tpl_hdr_size % ma END
                    - CASE WHEN ceil(tpl_data_size)::int % ma = 0 THEN ma ELSE ceil(tpl_data_size)::int % ma END) AS tpl_size,
                   (heappages + toastpages) AS tblpages, reltuples, toasttuples, bs, page_hdr,
                   schemaname, tblname, pretty_size, fillfactor
            FROM (
                SELECT ns.nspname AS schemaname, tbl.relname AS tblname, GREATEST(tbl.reltuples, 0) AS reltuples,
                       pg_size_pretty(pg_total_relation_size(tbl.oid)) AS pretty_size,
                       tbl.relpages AS heappages,
                       COALESCE(toast.relpages, 0) AS toastpages,
                       COALESCE(toast.reltuples, 0) AS toasttuples,
                       COALESCE(substring(array_to_string(tbl.reloptions, ' ') FROM 'fillfactor=([0-9]+)')::smallint, 100) AS fillfactor,
                       current_setting('block_size')::numeric AS bs,
                       CASE WHEN version() ~ 'mingw32|64-bit|x86_64|ppc64|ia64|amd64|aarch64' THEN 8 ELSE 4 END AS ma,
                       24 AS page_hdr,
                       23 + CASE WHEN max(COALESCE(s.null_frac, 0)) > 0 THEN (7 + count(*)) / 8 ELSE 0 END + {oids} AS tpl_hdr_size,
                       sum((1 - COALESCE(s.null_frac, 0)) * COALESCE(s.avg_width, 1024)) AS tpl_data_size
                FROM pg_attribute att
                JOIN pg_class tbl ON att.attrelid = tbl.oid
                JOIN pg_namespace ns ON ns.oid = tbl.relnamespace
                JOIN pg_stats s ON s.schemaname = ns.nspname AND s.tablename = tbl.relname
                               AND s.inherited = false AND s.attname = att.attname
                LEFT JOIN pg_class toast ON tbl.reltoastrelid = toast.oid
                WHERE att.attnum > 0 AND NOT att.attisdropped AND tbl.relkind = 'r' AND {schema_filter}
                GROUP BY ns.nspname, tbl.relname, tbl.reltuples, tbl.oid, tbl.relpages,
                         toast.relpages, toast.reltuples, tbl.reloptions{oids_group}
            ) s
        ) s2
    ) s3
    WHERE bs * tblpages > 16384
    ORDER BY bloat_ratio DESC
    LIMIT 20
"#,
        oids_group = if version.at_least(12, 0) {
            ""
        } else {
            ", tbl.relhasoids"
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_queries_truncate_text() {
        assert!(long_queries(200).contains("substring(query, 1, 200)"));
    }

    #[test]
    fn blocked_queries_wait_events_only_on_96_plus() {
        assert!(blocked_queries(PgVersion::new(13, 0, 1), 100).contains("blocked.wait_event"));
        assert!(!blocked_queries(PgVersion::new(9, 5, 25), 100).contains("blocked.wait_event"));
    }

    #[test]
    fn bloat_query_drops_relhasoids_on_12_plus() {
        assert!(!table_bloat(PgVersion::new(12, 0, 1), None).contains("relhasoids"));
        assert!(table_bloat(PgVersion::new(11, 0, 9), None).contains("tbl.relhasoids"));
        assert!(table_bloat(PgVersion::new(13, 0, 1), Some("app")).contains("ns.nspname = 'app'"));
    }
}
