//! pgcheck - one ad-hoc PostgreSQL check, for cron jobs.
//!
//! Runs a single action (load, longqueries, blockedqueries, uptime or
//! bloat), prints timestamped status lines and mails an alert when
//! something needs attention.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use pgreport::adhoc::{Action, AdhocOptions, AdhocRunner, Outcome, SystemClock};
use pgreport::config::{ConnectionOptions, SslMode};
use pgreport::error::AdhocError;
use pgreport::executor::{PostgresExecutor, QueryExecutor};
use pgreport::logging::init_logging;
use pgreport::notify::{MailCommand, Mailer, PrintMailer};

/// Ad-hoc PostgreSQL checks with mail alerts.
#[derive(Parser)]
#[command(name = "pgcheck", about = "Ad-hoc PostgreSQL checks with mail alerts", version)]
struct Args {
    /// Action to run: load, longqueries, blockedqueries, uptime, bloat.
    #[arg(short, long, value_parser = parse_action)]
    action: Action,

    /// Server name used in status lines and mail subjects.
    #[arg(long)]
    serverid: String,

    /// Database server host or socket directory.
    #[arg(short = 'H', long, env = "PGHOST", default_value = "localhost")]
    host: String,

    /// Database server port.
    #[arg(short, long, env = "PGPORT", default_value = "5432")]
    port: u16,

    /// Database to connect to.
    #[arg(short, long, env = "PGDATABASE", default_value = "postgres")]
    dbname: String,

    /// Database user. The password is read from PGPASSWORD.
    #[arg(short = 'U', long, env = "PGUSER", default_value = "postgres")]
    user: String,

    /// TLS mode for the connection.
    #[arg(long, value_enum, default_value = "disable")]
    sslmode: SslMode,

    /// Number of CPUs of the database host. Required for load checks.
    #[arg(long, default_value = "0")]
    cpus: u32,

    /// Load percentage (active sessions per CPU) considered saturated.
    #[arg(long, default_value = "100")]
    cpumaxpct: i64,

    /// Report queries running longer than this many minutes.
    #[arg(long, default_value = "30")]
    maxmin: i64,

    /// Truncate query text to this many characters.
    #[arg(long, default_value = "9999")]
    maxquerylen: usize,

    /// Report tables with at least this bloat percentage (0-99).
    #[arg(long, default_value = "50")]
    bloatpct: i64,

    /// Restrict the bloat action to one schema.
    #[arg(short, long)]
    schema: Option<String>,

    /// Send mail when an action finds a problem.
    #[arg(long)]
    notify: bool,

    /// Mail recipients.
    #[arg(long = "mail-to", value_delimiter = ',')]
    mail_to: Vec<String>,

    /// Mail sender address.
    #[arg(long = "mail-from", default_value = "postgres@localhost")]
    mail_from: String,

    /// Print mail instead of sending it.
    #[arg(long)]
    dry_run: bool,

    /// Wait for the load to drop before running a non-load action.
    #[arg(long)]
    defer_on_load: bool,

    /// Seconds to sleep between load checks while deferring.
    #[arg(long, default_value = "60")]
    load_sleep: u64,

    /// Give up (TOOLONG) after deferring this many minutes.
    #[arg(long, default_value = "30")]
    max_work_minutes: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_action(s: &str) -> Result<Action, String> {
    s.parse::<Action>().map_err(|e| e.to_string())
}

impl Args {
    fn options(&self) -> AdhocOptions {
        AdhocOptions {
            serverid: self.serverid.clone(),
            action: self.action,
            cpus: self.cpus,
            cpumaxpct: self.cpumaxpct,
            maxmin: self.maxmin,
            maxquerylen: self.maxquerylen,
            bloatpct: self.bloatpct,
            schema: self.schema.clone(),
            notify: self.notify,
            defer_on_load: self.defer_on_load,
            load_sleep: Duration::from_secs(self.load_sleep),
            max_work: Duration::from_secs(self.max_work_minutes * 60),
        }
    }

    /// Mail is needed when notifying, and always for uptime.
    fn validate_mail(&self) -> Result<(), AdhocError> {
        let needs_mail = self.notify || self.action == Action::Uptime;
        if needs_mail && !self.dry_run && self.mail_to.is_empty() {
            return Err(AdhocError::InvalidParameter(format!(
                "--mail-to is required for {}{}",
                self.action,
                if self.notify { " with --notify" } else { "" }
            )));
        }
        Ok(())
    }

    fn mailer(&self) -> Box<dyn Mailer> {
        if self.dry_run {
            Box::new(PrintMailer::new(std::io::stdout()))
        } else {
            Box::new(MailCommand::new(&self.mail_from, &self.mail_to))
        }
    }
}

fn run(args: &Args) -> Result<Outcome, AdhocError> {
    let opts = args.options();
    opts.validate()?;
    args.validate_mail()?;

    let conn = ConnectionOptions::new(&args.host, args.port, &args.dbname, &args.user)
        .with_sslmode(args.sslmode)
        .with_application_name("pgcheck");
    let mut exec = PostgresExecutor::connect(&conn).map_err(|e| AdhocError::Query {
        action: args.action.name(),
        source: e.into(),
    })?;
    let mut mailer = args.mailer();
    let mut clock = SystemClock::new();
    let mut stdout = std::io::stdout();
    AdhocRunner::new(
        &opts,
        &mut exec as &mut dyn QueryExecutor,
        mailer.as_mut(),
        &mut clock,
        &mut stdout,
    )
    .run()
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = ctrlc::set_handler(|| {
        eprintln!("User-interrupted!");
        std::process::exit(1);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    match run(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pgcheck: {}", e);
            ExitCode::FAILURE
        }
    }
}
