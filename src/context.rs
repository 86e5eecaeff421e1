//! Cluster facts shared by all checks.
//!
//! [`ClusterContext`] is gathered once at startup and read-only afterwards.
//! Any failure while gathering it is fatal to the run.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ConnectionOptions, ReportOptions};
use crate::error::{CheckError, SetupError};
use crate::executor::QueryExecutor;
use crate::host::{FileSystem, Overcommit, read_overcommit, read_total_memory};
use crate::version::PgVersion;

const VERSION_QUERY: &str =
    "SELECT current_setting('server_version_num')::integer, version(), pg_is_in_recovery()";

const SETTINGS_QUERY: &str =
    "SELECT name, setting, COALESCE(unit, '') AS unit FROM pg_settings ORDER BY name";

const UPTIME_QUERY: &str =
    "SELECT EXTRACT(EPOCH FROM (now() - pg_postmaster_start_time()))::bigint";

const REPLICA_COUNT_QUERY: &str = "SELECT count(*) FROM pg_stat_replication";

/// Host name fragments of managed PostgreSQL services.
const MANAGED_HOST_PATTERNS: &[&str] = &[
    "rds.amazonaws.com",
    "database.azure.com",
    "postgres.database.azure.com",
    "cloudsql",
    "alloydb",
];

/// Setting prefixes only managed services expose.
const MANAGED_SETTING_PREFIXES: &[&str] = &["rds.", "azure.", "cloudsql.", "alloydb."];

/// Where the cluster runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    SelfHosted,
    /// Cloud service: no filesystem or OS access.
    Managed,
}

/// Replication role of the connected server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Standby,
}

/// One `pg_settings` entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Setting {
    pub setting: String,
    pub unit: String,
}

impl Setting {
    pub fn new(setting: &str, unit: &str) -> Self {
        Self {
            setting: setting.to_string(),
            unit: unit.to_string(),
        }
    }

    /// Value in bytes for memory settings (`unit` of `8kB`, `kB`, `MB`...).
    pub fn bytes(&self) -> Option<u64> {
        let value: i64 = self.setting.trim().parse().ok()?;
        if value < 0 {
            return None;
        }
        Some(value as u64 * unit_multiplier(&self.unit)?)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.setting.trim().parse().ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.setting.trim().parse().ok()
    }

    pub fn is_on(&self) -> bool {
        matches!(
            self.setting.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "yes" | "1" | "always"
        )
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let unit = unit.trim();
    if unit.is_empty() {
        return Some(1);
    }
    let digits: String = unit.chars().take_while(|c| c.is_ascii_digit()).collect();
    let factor: u64 = if digits.is_empty() {
        1
    } else {
        digits.parse().ok()?
    };
    let base = match &unit[digits.len()..] {
        "B" => 1,
        "kB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024 * 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(factor * base)
}

/// Configured memory parameters, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemorySettings {
    pub shared_buffers: u64,
    pub work_mem: u64,
    pub maintenance_work_mem: u64,
    pub effective_cache_size: u64,
}

/// Immutable snapshot of cluster facts.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterContext {
    pub version: PgVersion,
    /// Full `version()` string.
    pub version_string: String,
    pub host: String,
    pub dbname: String,
    /// Physical memory of the database host, when known.
    pub total_memory: Option<u64>,
    pub memory: MemorySettings,
    pub max_connections: i64,
    pub archive_mode: bool,
    pub data_directory: Option<String>,
    pub flavor: Flavor,
    /// The server runs on the machine executing this program.
    pub local: bool,
    pub role: Role,
    /// Replicas streaming from this server (0 on a standby).
    pub replica_count: i64,
    pub uptime_seconds: i64,
    pub overcommit: Option<Overcommit>,
    /// Restricts relation-level checks to one schema.
    pub schema: Option<String>,
    pub settings: BTreeMap<String, Setting>,
}

impl ClusterContext {
    /// Minimal self-hosted primary context with no settings loaded.
    pub fn new(version: PgVersion) -> Self {
        Self {
            version,
            version_string: format!("PostgreSQL {}", version),
            host: "localhost".to_string(),
            dbname: "postgres".to_string(),
            total_memory: None,
            memory: MemorySettings::default(),
            max_connections: 100,
            archive_mode: false,
            data_directory: None,
            flavor: Flavor::SelfHosted,
            local: true,
            role: Role::Primary,
            replica_count: 0,
            uptime_seconds: 0,
            overcommit: None,
            schema: None,
            settings: BTreeMap::new(),
        }
    }

    /// Queries the server (and, for local self-hosted servers, the OS)
    /// for everything the checks need.
    pub fn gather(
        exec: &mut dyn QueryExecutor,
        fs: &dyn FileSystem,
        conn: &ConnectionOptions,
        opts: &ReportOptions,
    ) -> Result<Self, SetupError> {
        exec.ping()?;

        let row = exec.query_one(VERSION_QUERY)?;
        let version_num = row.get_i64(0)? as i32;
        let version_string = row.get_str(1)?;
        let version = PgVersion::from_num(version_num)
            .or_else(|| PgVersion::parse(version_string.trim_start_matches("PostgreSQL ")))
            .ok_or_else(|| CheckError::Unparsable {
                column: 0,
                value: version_num.to_string(),
            })?;
        let in_recovery = row.get_bool(2)?;

        let mut settings = BTreeMap::new();
        for row in exec.query(SETTINGS_QUERY)? {
            settings.insert(
                row.get_str(0)?,
                Setting {
                    setting: row.get_str(1)?,
                    unit: row.get_str(2)?,
                },
            );
        }

        let uptime_seconds = exec.query_one(UPTIME_QUERY)?.i64_or_zero(0)?;

        let role = if in_recovery {
            Role::Standby
        } else {
            Role::Primary
        };
        let replica_count = match role {
            Role::Primary => exec.query_one(REPLICA_COUNT_QUERY)?.i64_or_zero(0)?,
            Role::Standby => 0,
        };

        let flavor = if opts.force_managed || detect_managed(&conn.host, &settings) {
            Flavor::Managed
        } else {
            Flavor::SelfHosted
        };
        let local = conn.is_local() && flavor == Flavor::SelfHosted;

        let total_memory = match opts.total_memory {
            Some(bytes) => Some(bytes),
            None if local => read_total_memory(fs),
            None => None,
        };
        let overcommit = if local { read_overcommit(fs) } else { None };

        let mem = |name: &str| settings.get(name).and_then(Setting::bytes).unwrap_or(0);
        let memory = MemorySettings {
            shared_buffers: mem("shared_buffers"),
            work_mem: mem("work_mem"),
            maintenance_work_mem: mem("maintenance_work_mem"),
            effective_cache_size: mem("effective_cache_size"),
        };

        let ctx = Self {
            version,
            version_string,
            host: conn.host.clone(),
            dbname: conn.dbname.clone(),
            total_memory,
            memory,
            max_connections: settings
                .get("max_connections")
                .and_then(Setting::as_i64)
                .unwrap_or(100),
            archive_mode: settings.get("archive_mode").is_some_and(Setting::is_on),
            data_directory: settings
                .get("data_directory")
                .map(|s| s.setting.clone())
                .filter(|s| !s.is_empty()),
            flavor,
            local,
            role,
            replica_count,
            uptime_seconds,
            overcommit,
            schema: opts.schema.clone(),
            settings,
        };

        info!(
            version = %ctx.version,
            role = ?ctx.role,
            flavor = ?ctx.flavor,
            replicas = ctx.replica_count,
            "cluster context gathered"
        );
        debug!(
            total_memory = ?ctx.total_memory,
            max_connections = ctx.max_connections,
            archive_mode = ctx.archive_mode,
            data_directory = ?ctx.data_directory,
            "cluster facts"
        );

        Ok(ctx)
    }

    pub fn setting(&self, name: &str) -> Option<&Setting> {
        self.settings.get(name)
    }

    pub fn is_managed(&self) -> bool {
        self.flavor == Flavor::Managed
    }

    pub fn is_standby(&self) -> bool {
        self.role == Role::Standby
    }

    /// True when filesystem and kernel facts of the database host are
    /// reachable from here.
    pub fn has_os_access(&self) -> bool {
        self.local && !self.is_managed()
    }
}

fn detect_managed(host: &str, settings: &BTreeMap<String, Setting>) -> bool {
    let host = host.to_ascii_lowercase();
    MANAGED_HOST_PATTERNS.iter().any(|p| host.contains(p))
        || settings
            .keys()
            .any(|name| MANAGED_SETTING_PREFIXES.iter().any(|p| name.starts_with(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MockExecutor, Value};
    use crate::host::MockFs;

    fn settings_rows() -> Vec<crate::executor::Row> {
        [
            ("archive_mode", "on", ""),
            ("data_directory", "/pgdata", ""),
            ("effective_cache_size", "524288", "8kB"),
            ("maintenance_work_mem", "65536", "kB"),
            ("max_connections", "200", ""),
            ("shared_buffers", "16384", "8kB"),
            ("work_mem", "4096", "kB"),
        ]
        .iter()
        .map(|(n, s, u)| crate::executor::Row::new(vec![(*n).into(), (*s).into(), (*u).into()]))
        .collect()
    }

    fn primary() -> MockExecutor {
        MockExecutor::new()
            .on_row("SELECT 1", vec![Value::Int(1)])
            .on_row(
                "server_version_num",
                vec![
                    Value::Int(130004),
                    "PostgreSQL 13.4 on x86_64-pc-linux-gnu".into(),
                    Value::Bool(false),
                ],
            )
            .on("FROM pg_settings", settings_rows())
            .on_row("pg_postmaster_start_time", vec![Value::Int(86_400)])
            .on_row("pg_stat_replication", vec![Value::Int(2)])
    }

    #[test]
    fn unit_multipliers() {
        assert_eq!(Setting::new("16384", "8kB").bytes(), Some(128 * 1024 * 1024));
        assert_eq!(Setting::new("4096", "kB").bytes(), Some(4 * 1024 * 1024));
        assert_eq!(Setting::new("100", "").bytes(), Some(100));
        assert_eq!(Setting::new("-1", "kB").bytes(), None);
        assert_eq!(Setting::new("5", "furlongs").bytes(), None);
    }

    #[test]
    fn gathers_local_primary() {
        let mut exec = primary();
        let fs = MockFs::linux_host();
        let conn = ConnectionOptions::new("localhost", 5432, "postgres", "postgres");
        let ctx = ClusterContext::gather(&mut exec, &fs, &conn, &ReportOptions::default()).unwrap();

        assert_eq!(ctx.version, PgVersion::new(13, 0, 4));
        assert_eq!(ctx.role, Role::Primary);
        assert_eq!(ctx.replica_count, 2);
        assert_eq!(ctx.max_connections, 200);
        assert!(ctx.archive_mode);
        assert_eq!(ctx.data_directory.as_deref(), Some("/pgdata"));
        assert_eq!(ctx.memory.shared_buffers, 128 * 1024 * 1024);
        assert_eq!(ctx.memory.effective_cache_size, 4 * 1024 * 1024 * 1024);
        assert_eq!(ctx.uptime_seconds, 86_400);
        assert_eq!(ctx.total_memory, Some(16_384_000 * 1024));
        assert!(ctx.overcommit.is_some());
        assert!(ctx.has_os_access());
    }

    #[test]
    fn remote_host_skips_os_facts() {
        let mut exec = primary();
        let fs = MockFs::linux_host();
        let conn = ConnectionOptions::new("db.internal", 5432, "postgres", "postgres");
        let ctx = ClusterContext::gather(&mut exec, &fs, &conn, &ReportOptions::default()).unwrap();
        assert_eq!(ctx.total_memory, None);
        assert_eq!(ctx.overcommit, None);
        assert!(!ctx.has_os_access());
    }

    #[test]
    fn managed_host_detected_by_name() {
        let mut exec = primary();
        let conn = ConnectionOptions::new(
            "prod.cluster-abc.us-east-1.rds.amazonaws.com",
            5432,
            "postgres",
            "postgres",
        );
        let ctx = ClusterContext::gather(&mut exec, &MockFs::new(), &conn, &ReportOptions::default())
            .unwrap();
        assert_eq!(ctx.flavor, Flavor::Managed);
    }

    #[test]
    fn managed_detected_by_setting_prefix() {
        let mut settings = BTreeMap::new();
        settings.insert("rds.extensions".to_string(), Setting::new("", ""));
        assert!(detect_managed("10.0.0.5", &settings));
        assert!(!detect_managed("10.0.0.5", &BTreeMap::new()));
    }

    #[test]
    fn standby_does_not_count_replicas() {
        let mut exec = MockExecutor::new()
            .on_row("SELECT 1", vec![Value::Int(1)])
            .on_row(
                "server_version_num",
                vec![Value::Int(120005), "PostgreSQL 12.5".into(), Value::Bool(true)],
            )
            .on("FROM pg_settings", settings_rows())
            .on_row("pg_postmaster_start_time", vec![Value::Int(60)]);
        let conn = ConnectionOptions::new("localhost", 5432, "postgres", "postgres");
        let ctx = ClusterContext::gather(&mut exec, &MockFs::new(), &conn, &ReportOptions::default())
            .unwrap();
        assert!(ctx.is_standby());
        assert!(!exec.ran("pg_stat_replication"));
    }

    #[test]
    fn failed_ping_is_fatal() {
        let mut exec = MockExecutor::new().fail("SELECT 1", "connection reset");
        let conn = ConnectionOptions::new("localhost", 5432, "postgres", "postgres");
        let err = ClusterContext::gather(&mut exec, &MockFs::new(), &conn, &ReportOptions::default())
            .unwrap_err();
        assert!(matches!(err, SetupError::Context(_)));
    }
}
