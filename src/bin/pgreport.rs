//! pgreport - PostgreSQL health report.
//!
//! Connects to one database, runs every health check in a fixed order,
//! mirrors each finding to stdout and writes the full report as text,
//! HTML or JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use pgreport::config::{
    ConnectionOptions, OutputFormat, ReportOptions, SslMode, Thresholds, parse_size,
};
use pgreport::controller::RunController;
use pgreport::error::SetupError;
use pgreport::executor::{PostgresExecutor, PsqlExecutor, QueryExecutor, find_in_path};
use pgreport::host::RealFs;
use pgreport::logging::init_logging;

/// How queries reach the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Via {
    /// Native protocol driver.
    Driver,
    /// The `psql` command-line client.
    Psql,
}

/// PostgreSQL health check and maintenance report.
#[derive(Parser)]
#[command(name = "pgreport", about = "PostgreSQL health check and maintenance report", version)]
struct Args {
    /// Database server host or socket directory.
    #[arg(short = 'H', long, env = "PGHOST", default_value = "localhost")]
    host: String,

    /// Database server port.
    #[arg(short, long, env = "PGPORT", default_value = "5432")]
    port: u16,

    /// Database to report on.
    #[arg(short, long, env = "PGDATABASE", default_value = "postgres")]
    dbname: String,

    /// Database user. The password is read from PGPASSWORD.
    #[arg(short = 'U', long, env = "PGUSER", default_value = "postgres")]
    user: String,

    /// TLS mode for the driver connection.
    #[arg(long, value_enum, default_value = "disable")]
    sslmode: SslMode,

    /// Query execution path.
    #[arg(long, value_enum, default_value = "driver")]
    via: Via,

    /// Report format.
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Report file. Defaults to <tmpdir>/<pid>_report.<ext>.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Restrict relation-level checks to one schema.
    #[arg(short, long)]
    schema: Option<String>,

    /// Run all checks but do not write the report file.
    #[arg(long)]
    dry_run: bool,

    /// Treat the server as a managed (cloud) deployment.
    #[arg(long)]
    managed: bool,

    /// Physical memory of the database host (e.g. "64G", "512M") when it
    /// cannot be read locally.
    #[arg(long, value_parser = parse_size)]
    total_memory: Option<u64>,

    /// vacuumlo binary used to count orphaned large objects.
    /// Searched on PATH when omitted.
    #[arg(long)]
    vacuumlo: Option<PathBuf>,

    /// Warn when connections exceed this percentage of max_connections.
    #[arg(long, default_value = "80")]
    connections_pct: f64,

    /// Idle-in-transaction age in minutes.
    #[arg(long, default_value = "10")]
    idle_in_tx_minutes: i64,

    /// Long-running query age in minutes.
    #[arg(long, default_value = "5")]
    long_query_minutes: i64,

    /// Blocked query wait in seconds.
    #[arg(long, default_value = "30")]
    blocked_seconds: i64,

    /// WAL segments waiting for archiving before a warning.
    #[arg(long, default_value = "1000")]
    wal_ready_backlog: i64,

    /// Background writer early stops (maxwritten_clean) before a warning.
    #[arg(long, default_value = "500000")]
    bgwriter_maxwritten: i64,

    /// Minimum expected minutes between checkpoints.
    #[arg(long, default_value = "5")]
    checkpoint_min_minutes: f64,

    /// Maximum expected minutes between checkpoints.
    #[arg(long, default_value = "60")]
    checkpoint_max_minutes: f64,

    /// Bloat percentage that makes a table bloated.
    #[arg(long, default_value = "20")]
    bloat_pct: i64,

    /// Wasted space that makes a table bloated (e.g. "10G").
    #[arg(long, default_value = "10G", value_parser = parse_size)]
    bloat_size: u64,

    /// Transaction age, as a percentage of autovacuum_freeze_max_age,
    /// that makes a table a freeze candidate.
    #[arg(long, default_value = "90")]
    freeze_age_pct: i64,

    /// Days without ANALYZE that make a table an analyze candidate.
    #[arg(long, default_value = "7")]
    analyze_stale_days: i64,

    /// Standby replay lag in seconds before a warning.
    #[arg(long, default_value = "900")]
    replay_lag_seconds: i64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn connection(&self) -> ConnectionOptions {
        ConnectionOptions::new(&self.host, self.port, &self.dbname, &self.user)
            .with_sslmode(self.sslmode)
            .with_application_name("pgreport")
    }

    fn report_options(&self) -> ReportOptions {
        ReportOptions {
            format: self.format,
            output: self.output.clone(),
            schema: self.schema.clone(),
            dry_run: self.dry_run,
            force_managed: self.managed,
            total_memory: self.total_memory,
            thresholds: Thresholds {
                connections_pct: self.connections_pct,
                idle_in_tx_minutes: self.idle_in_tx_minutes,
                long_query_minutes: self.long_query_minutes,
                blocked_seconds: self.blocked_seconds,
                wal_ready_backlog: self.wal_ready_backlog,
                bgwriter_maxwritten: self.bgwriter_maxwritten,
                checkpoint_min_minutes: self.checkpoint_min_minutes,
                checkpoint_max_minutes: self.checkpoint_max_minutes,
                bloat_pct: self.bloat_pct,
                bloat_bytes: i64::try_from(self.bloat_size).unwrap_or(i64::MAX),
                freeze_age_pct: self.freeze_age_pct,
                analyze_stale_days: self.analyze_stale_days,
                replay_lag_seconds: self.replay_lag_seconds,
                ..Thresholds::default()
            },
        }
    }
}

/// Removes `scratch` (if any) and exits with 1 on Ctrl-C.
fn install_interrupt_handler(scratch: Option<PathBuf>) {
    if let Err(e) = ctrlc::set_handler(move || {
        if let Some(ref path) = scratch {
            let _ = std::fs::remove_file(path);
        }
        eprintln!("User-interrupted!");
        std::process::exit(1);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }
}

fn run<E: QueryExecutor>(args: &Args, exec: E) -> Result<(), SetupError> {
    let vacuumlo = args.vacuumlo.clone().or_else(|| {
        let path_var = std::env::var("PATH").unwrap_or_default();
        find_in_path("vacuumlo", &path_var)
    });
    let mut controller =
        RunController::new(args.connection(), args.report_options()).with_vacuumlo(vacuumlo);
    let fs = RealFs::new();
    let mut stdout = std::io::stdout();
    let outcome = controller.run(exec, &fs, &mut stdout)?;
    if let Some(path) = outcome.path {
        info!("report written to {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let conn = args.connection();
    if let Err(e) = conn.validate() {
        eprintln!("pgreport: {}", e);
        return ExitCode::FAILURE;
    }
    let result = match args.via {
        Via::Driver => {
            install_interrupt_handler(None);
            PostgresExecutor::connect(&conn)
                .map_err(SetupError::from)
                .and_then(|exec| run(&args, exec))
        }
        Via::Psql => PsqlExecutor::new(&conn)
            .map_err(SetupError::from)
            .and_then(|exec| {
                install_interrupt_handler(Some(exec.scratch_path().to_path_buf()));
                run(&args, exec)
            }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pgreport: {}", e);
            ExitCode::FAILURE
        }
    }
}
