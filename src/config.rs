//! Run configuration: connection parameters, thresholds and report options.
//!
//! The binaries fill these from the command line (with libpq environment
//! fallbacks); library code only ever sees the resolved values.

use serde::Serialize;
use std::path::PathBuf;

use crate::error::SetupError;

/// Socket directory the driver connects through when no host is given.
const DEFAULT_SOCKET_DIR: &str = "/var/run/postgresql";

/// TLS negotiation mode for the driver path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

impl SslMode {
    fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
        }
    }
}

/// Resolved connection parameters.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub sslmode: SslMode,
    pub application_name: String,
}

impl ConnectionOptions {
    pub fn new(host: &str, port: u16, dbname: &str, user: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            dbname: dbname.to_string(),
            user: user.to_string(),
            password: std::env::var("PGPASSWORD").ok().filter(|p| !p.is_empty()),
            sslmode: SslMode::Disable,
            application_name: "pgreport".to_string(),
        }
    }

    pub fn with_sslmode(mut self, sslmode: SslMode) -> Self {
        self.sslmode = sslmode;
        self
    }

    pub fn with_application_name(mut self, name: &str) -> Self {
        self.application_name = name.to_string();
        self
    }

    /// Rejects parameters that can never produce a working connection.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.host.trim().is_empty() {
            return Err(SetupError::InvalidParameter(
                "host name must be provided".to_string(),
            ));
        }
        if self.dbname.trim().is_empty() {
            return Err(SetupError::InvalidParameter(
                "database name must be provided".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(SetupError::InvalidParameter("port must be > 0".to_string()));
        }
        Ok(())
    }

    /// Builds a libpq key/value connection string.
    pub fn connection_string(&self) -> String {
        // The driver has no libpq-style default host.
        let host = self.explicit_host().unwrap_or(DEFAULT_SOCKET_DIR);
        let mut parts = vec![format!("host={}", quote_conn_value(host))];
        parts.extend([
            format!("port={}", self.port),
            format!("user={}", quote_conn_value(&self.user)),
            format!("dbname={}", quote_conn_value(&self.dbname)),
            format!(
                "application_name={}",
                quote_conn_value(&self.application_name)
            ),
            format!("sslmode={}", self.sslmode.as_str()),
        ]);
        if let Some(ref password) = self.password {
            parts.push(format!("password={}", quote_conn_value(password)));
        }
        parts.join(" ")
    }

    /// The host to pass to clients, or `None` when it is blank and the
    /// client default (the local socket) applies.
    pub fn explicit_host(&self) -> Option<&str> {
        let host = self.host.trim();
        (!host.is_empty()).then_some(host)
    }

    /// True when the server runs on this machine, which is the only case
    /// where OS-level facts (memory, kernel settings, data directory)
    /// describe the database host.
    pub fn is_local(&self) -> bool {
        let host = self.host.trim();
        host.is_empty()
            || host.starts_with('/')
            || matches!(host, "localhost" | "127.0.0.1" | "::1")
    }
}

/// Quotes a libpq connection value when it contains spaces, quotes or
/// backslashes.
fn quote_conn_value(value: &str) -> String {
    if !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Tunable limits used by the threshold catalog.
///
/// Defaults reproduce the literal values the checks have always used.
#[derive(Clone, Debug, Serialize)]
pub struct Thresholds {
    /// Connection saturation warning, percent of max_connections.
    pub connections_pct: f64,
    /// Idle-in-transaction age, minutes.
    pub idle_in_tx_minutes: i64,
    /// Long-running query age, minutes.
    pub long_query_minutes: i64,
    /// Blocked query wait, seconds.
    pub blocked_seconds: i64,
    /// WAL `.ready` markers before archiving counts as backlogged.
    pub wal_ready_backlog: i64,
    /// Background writer early stops (maxwritten_clean).
    pub bgwriter_maxwritten: i64,
    /// Checkpoints closer together than this are too frequent, minutes.
    pub checkpoint_min_minutes: f64,
    /// Checkpoints further apart than this are too infrequent, minutes.
    pub checkpoint_max_minutes: f64,
    /// Relation counts as bloated above this wasted-space percentage.
    pub bloat_pct: i64,
    /// ...or above this many wasted bytes.
    pub bloat_bytes: i64,
    /// Table counts as a freeze candidate once its xid age passes this
    /// share of autovacuum_freeze_max_age, percent.
    pub freeze_age_pct: i64,
    /// Statistics older than this make a table an analyze candidate, days.
    pub analyze_stale_days: i64,
    /// Standby replay lag warning, seconds.
    pub replay_lag_seconds: i64,
    /// Known-release table older than this forces a version warning, days.
    pub version_table_max_age_days: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            connections_pct: 80.0,
            idle_in_tx_minutes: 10,
            long_query_minutes: 5,
            blocked_seconds: 30,
            wal_ready_backlog: 1000,
            bgwriter_maxwritten: 500_000,
            checkpoint_min_minutes: 5.0,
            checkpoint_max_minutes: 60.0,
            bloat_pct: 20,
            bloat_bytes: 10 * 1024 * 1024 * 1024,
            freeze_age_pct: 90,
            analyze_stale_days: 7,
            replay_lag_seconds: 900,
            version_table_max_age_days: 365,
        }
    }
}

/// Output format of the rendered report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Html,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }
}

/// Options for a full report run.
#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    pub format: OutputFormat,
    /// Explicit destination; defaults to `<tmpdir>/<pid>_report.<ext>`.
    pub output: Option<PathBuf>,
    /// Restrict relation-level checks to one schema.
    pub schema: Option<String>,
    /// Gather and evaluate, but do not write the report file.
    pub dry_run: bool,
    /// Treat the deployment as managed even if detection says otherwise.
    pub force_managed: bool,
    /// Physical memory of the database host in bytes, for hosts this
    /// program cannot inspect.
    pub total_memory: Option<u64>,
    pub thresholds: Thresholds,
}

impl ReportOptions {
    pub fn destination(&self) -> PathBuf {
        match self.output {
            Some(ref path) => path.clone(),
            None => std::env::temp_dir().join(format!(
                "{}_report.{}",
                std::process::id(),
                self.format.extension()
            )),
        }
    }
}

/// Parses a byte size with an optional `K`, `M` or `G` suffix
/// (`"16G"`, `"512M"`, `"1073741824"`).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix(['G', 'g']) {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix(['M', 'm']) {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix(['K', 'k']) {
        (num, 1024)
    } else {
        (s, 1)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|e| format!("invalid size '{}': {}", s, e))
}
