//! Ad-hoc actions for cron-style monitoring.
//!
//! Each action runs one query, prints timestamped status lines and,
//! when something is wrong and notification is enabled, sends one mail.
//! Non-load actions can be deferred while the server is saturated; if
//! the load never drops within the work window the action is abandoned
//! with [`Outcome::TooLong`].

mod queries;

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::{AdhocError, CheckError};
use crate::executor::{QueryExecutor, Row};
use crate::fmt::{format_bytes, format_duration, format_uptime_minutes, normalize_for_display, truncate};
use crate::notify::{Mail, Mailer, subject};
use crate::version::PgVersion;

/// Sessions younger than this never count as long or blocked.
const MIN_REPORTED_SECS: i64 = 10;

/// Uptime at or below this many minutes means a recent restart.
const RECENT_RESTART_MINUTES: i64 = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Load,
    LongQueries,
    BlockedQueries,
    Uptime,
    Bloat,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Load => "load",
            Action::LongQueries => "longqueries",
            Action::BlockedQueries => "blockedqueries",
            Action::Uptime => "uptime",
            Action::Bloat => "bloat",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = AdhocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(Action::Load),
            "longqueries" | "longquery" => Ok(Action::LongQueries),
            "blockedqueries" => Ok(Action::BlockedQueries),
            "uptime" => Ok(Action::Uptime),
            "bloat" => Ok(Action::Bloat),
            _ => Err(AdhocError::InvalidParameter(
                "Invalid action.  Valid actions are: load, longqueries, blockedqueries, uptime, bloat"
                    .to_string(),
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdhocOptions {
    /// Name used in every status line and mail subject.
    pub serverid: String,
    pub action: Action,
    /// CPUs of the database host; load is active sessions per CPU.
    pub cpus: u32,
    /// Load percentage above which the server counts as saturated.
    pub cpumaxpct: i64,
    /// Queries running longer than this many minutes are reported.
    pub maxmin: i64,
    /// Query text is cut to this many characters.
    pub maxquerylen: usize,
    /// Tables at or above this bloat percentage are reported.
    pub bloatpct: i64,
    pub schema: Option<String>,
    pub notify: bool,
    pub defer_on_load: bool,
    pub load_sleep: Duration,
    pub max_work: Duration,
}

impl Default for AdhocOptions {
    fn default() -> Self {
        Self {
            serverid: String::new(),
            action: Action::Load,
            cpus: 0,
            cpumaxpct: 100,
            maxmin: 30,
            maxquerylen: 9999,
            bloatpct: 50,
            schema: None,
            notify: false,
            defer_on_load: false,
            load_sleep: Duration::from_secs(60),
            max_work: Duration::from_secs(30 * 60),
        }
    }
}

impl AdhocOptions {
    pub fn validate(&self) -> Result<(), AdhocError> {
        let invalid = |msg: &str| Err(AdhocError::InvalidParameter(msg.to_string()));
        if self.serverid.trim().is_empty() {
            return invalid("Server ID not provided.");
        }
        if (self.action == Action::Load || self.defer_on_load) && self.cpus == 0 {
            return invalid("CPUs not provided: load checks need the number of CPUs (> 0).");
        }
        if self.action == Action::Bloat && !(0..=99).contains(&self.bloatpct) {
            return invalid("Invalid bloat percentage: must be between 0 and 99.");
        }
        if self.maxquerylen == 0 {
            return invalid("Maximum query length must be > 0.");
        }
        if self.maxmin < 0 {
            return invalid("Maximum minutes must not be negative.");
        }
        Ok(())
    }
}

/// How an action ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to report.
    Clear,
    /// `count` problems were reported (and mailed when enabled).
    Alert { count: usize },
    /// Load stayed too high for the whole work window.
    TooLong,
}

/// Time source for status lines and load deferral.
pub trait Clock {
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    fn timestamp(&self) -> String;
    /// Time since the run started.
    fn elapsed(&self) -> Duration;
    fn sleep(&mut self, d: Duration);
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn timestamp(&self) -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Clock that only moves when slept on.
#[derive(Clone, Debug)]
pub struct ManualClock {
    stamp: String,
    elapsed: Duration,
    pub sleeps: usize,
}

impl ManualClock {
    pub fn new(stamp: &str) -> Self {
        Self {
            stamp: stamp.to_string(),
            elapsed: Duration::ZERO,
            sleeps: 0,
        }
    }
}

impl Clock for ManualClock {
    fn timestamp(&self) -> String {
        self.stamp.clone()
    }

    fn elapsed(&self) -> Duration {
        self.elapsed
    }

    fn sleep(&mut self, d: Duration) {
        self.elapsed += d;
        self.sleeps += 1;
    }
}

/// Active sessions per CPU as a whole percentage. The ratio is rounded
/// to two decimals half-to-even, so exact ties like 2.125 go down.
pub fn load_pct(active: i64, cpus: u32) -> i64 {
    if cpus == 0 {
        return 0;
    }
    (active as f64 / cpus as f64 * 100.0).round_ties_even() as i64
}

#[derive(Clone, Copy, Debug)]
struct Load {
    active: i64,
    pct: i64,
}

/// Runs one ad-hoc action.
pub struct AdhocRunner<'a> {
    opts: &'a AdhocOptions,
    exec: &'a mut dyn QueryExecutor,
    mailer: &'a mut dyn Mailer,
    clock: &'a mut dyn Clock,
    out: &'a mut dyn Write,
}

impl<'a> AdhocRunner<'a> {
    pub fn new(
        opts: &'a AdhocOptions,
        exec: &'a mut dyn QueryExecutor,
        mailer: &'a mut dyn Mailer,
        clock: &'a mut dyn Clock,
        out: &'a mut dyn Write,
    ) -> Self {
        Self {
            opts,
            exec,
            mailer,
            clock,
            out,
        }
    }

    pub fn run(&mut self) -> Result<Outcome, AdhocError> {
        self.opts.validate()?;
        let action = self.opts.action;
        info!(action = action.name(), serverid = %self.opts.serverid, "running ad-hoc action");

        if self.opts.defer_on_load && action != Action::Load && !self.wait_for_load()? {
            return self.too_long();
        }

        match action {
            Action::Load => self.load(),
            Action::LongQueries => self.long_queries(),
            Action::BlockedQueries => self.blocked_queries(),
            Action::Uptime => self.uptime(),
            Action::Bloat => self.bloat(),
        }
    }

    /// Timestamped status line on the output.
    fn say(&mut self, msg: &str) -> Result<(), AdhocError> {
        writeln!(self.out, "{} {}", self.clock.timestamp(), msg)?;
        Ok(())
    }

    fn mail(&mut self, metric: &str, body: &str) -> Result<(), AdhocError> {
        let subject = subject(&self.opts.serverid, &self.clock.timestamp(), metric);
        self.mailer.send(&Mail::new(&subject, body))
    }

    fn notify(&mut self, metric: &str, body: &str) -> Result<(), AdhocError> {
        if self.opts.notify {
            self.mail(metric, body)
        } else {
            Ok(())
        }
    }

    fn rows(&mut self, action: Action, sql: &str) -> Result<Vec<Row>, AdhocError> {
        self.exec.query(sql).map_err(|e| query_error(action, e.into()))
    }

    fn server_version(&mut self) -> Result<PgVersion, AdhocError> {
        let action = self.opts.action;
        let row = self
            .exec
            .query_one("SELECT current_setting('server_version_num')")
            .map_err(|e| query_error(action, e))?;
        let num = row.get_i64(0).map_err(|e| query_error(action, e))?;
        PgVersion::from_num(num as i32).ok_or_else(|| {
            query_error(
                action,
                CheckError::Unparsable {
                    column: 0,
                    value: num.to_string(),
                },
            )
        })
    }

    fn measure_load(&mut self) -> Result<Load, AdhocError> {
        let row = self
            .exec
            .query_one(queries::ACTIVE_SESSIONS)
            .map_err(|e| query_error(Action::Load, e))?;
        let active = row.get_i64(0).map_err(|e| query_error(Action::Load, e))?;
        Ok(Load {
            active,
            pct: load_pct(active, self.opts.cpus),
        })
    }

    /// Blocks until the load is acceptable. False once the work window
    /// has run out.
    fn wait_for_load(&mut self) -> Result<bool, AdhocError> {
        loop {
            let load = self.measure_load()?;
            if load.pct <= self.opts.cpumaxpct {
                return Ok(true);
            }
            if self.clock.elapsed() >= self.opts.max_work {
                return Ok(false);
            }
            let msg = format!(
                "{} ** Load {}% above {}%, deferring {} for {} seconds.",
                self.opts.serverid,
                load.pct,
                self.opts.cpumaxpct,
                self.opts.action,
                self.opts.load_sleep.as_secs()
            );
            self.say(&msg)?;
            debug!(load_pct = load.pct, active = load.active, "deferring on load");
            self.clock.sleep(self.opts.load_sleep);
        }
    }

    fn too_long(&mut self) -> Result<Outcome, AdhocError> {
        let msg = format!(
            "{} ** TOOLONG: load stayed above {}% for {} minutes, {} abandoned.",
            self.opts.serverid,
            self.opts.cpumaxpct,
            self.opts.max_work.as_secs() / 60,
            self.opts.action
        );
        warn!(action = self.opts.action.name(), "action abandoned, load too high");
        self.say(&msg)?;
        self.notify("TOOLONG", &msg)?;
        Ok(Outcome::TooLong)
    }

    fn load(&mut self) -> Result<Outcome, AdhocError> {
        let load = self.measure_load()?;
        let o = self.opts;
        let detail = format!(
            "cpumaxpct={} active={} cpus={}",
            o.cpumaxpct, load.active, o.cpus
        );
        if load.pct > o.cpumaxpct {
            let body = format!("{} (LOAD) ** Load {}%: {}", o.serverid, load.pct, detail);
            self.say(&body)?;
            self.notify("load saturation", &body)?;
            Ok(Outcome::Alert { count: 1 })
        } else {
            self.say(&format!(
                "{} ** Acceptable Load {}%: {}",
                o.serverid, load.pct, detail
            ))?;
            Ok(Outcome::Clear)
        }
    }

    fn long_queries(&mut self) -> Result<Outcome, AdhocError> {
        let o = self.opts;
        let rows = self.rows(Action::LongQueries, &queries::long_queries(o.maxquerylen))?;
        let mut entries = Vec::new();
        for row in &rows {
            let q_secs = row
                .i64_or_zero(7)
                .map_err(|e| query_error(Action::LongQueries, e))?;
            if q_secs < MIN_REPORTED_SECS || q_secs as f64 / 60.0 <= o.maxmin as f64 {
                continue;
            }
            entries.push(
                long_query_entry(&o.serverid, row, o.maxquerylen)
                    .map_err(|e| query_error(Action::LongQueries, e))?,
            );
        }
        if entries.is_empty() {
            self.say(&format!(
                "{} ** No long queries > {} minutes.",
                o.serverid, o.maxmin
            ))?;
            return Ok(Outcome::Clear);
        }
        let body = entries.join("\n\n");
        self.say(&format!(
            "{} ** Long Queries Detected = {}",
            o.serverid,
            entries.len()
        ))?;
        writeln!(self.out, "{body}")?;
        self.notify(&format!("long query(s)={}", entries.len()), &body)?;
        Ok(Outcome::Alert {
            count: entries.len(),
        })
    }

    fn blocked_queries(&mut self) -> Result<Outcome, AdhocError> {
        let o = self.opts;
        let version = self.server_version()?;
        let rows = self.rows(
            Action::BlockedQueries,
            &queries::blocked_queries(version, o.maxquerylen),
        )?;
        let mut entries = Vec::new();
        for row in &rows {
            let blocked_secs = row
                .i64_or_zero(4)
                .map_err(|e| query_error(Action::BlockedQueries, e))?;
            if blocked_secs < MIN_REPORTED_SECS {
                continue;
            }
            entries.push(
                blocked_entry(&o.serverid, row, o.maxquerylen)
                    .map_err(|e| query_error(Action::BlockedQueries, e))?,
            );
        }
        if entries.is_empty() {
            self.say(&format!("{} ** No blocked SQL Detected.", o.serverid))?;
            return Ok(Outcome::Clear);
        }
        let body = entries.join("\n\n");
        self.say(&format!(
            "{} ** Blocked SQL Detected = {}",
            o.serverid,
            entries.len()
        ))?;
        writeln!(self.out, "{body}")?;
        self.notify(&format!("blocked query(s)={}", entries.len()), &body)?;
        Ok(Outcome::Alert {
            count: entries.len(),
        })
    }

    /// A recent restart is always mailed, with or without `notify`.
    fn uptime(&mut self) -> Result<Outcome, AdhocError> {
        let o = self.opts;
        let rows = self.rows(Action::Uptime, queries::UPTIME)?;
        let row = rows
            .first()
            .ok_or_else(|| query_error(Action::Uptime, CheckError::NoRows))?;
        let start = row.get_str(0).map_err(|e| query_error(Action::Uptime, e))?;
        let minutes = row.get_i64(1).map_err(|e| query_error(Action::Uptime, e))?;
        let uptime = format_uptime_minutes(minutes);
        if minutes > RECENT_RESTART_MINUTES {
            self.say(&format!(
                "{} ** Server Uptime > 2 hours: Start Time = {}  Uptime = {}",
                o.serverid, start, uptime
            ))?;
            return Ok(Outcome::Clear);
        }
        let metric = format!(
            "Server Uptime < 2 hours.  Server Start = {}  Server Uptime = {}",
            start, uptime
        );
        let body = format!(
            "{} (UPTIME Notification) ** Server restarted recently. Start Time = {}  Uptime = {}",
            o.serverid, start, uptime
        );
        self.mail(&metric, &body)?;
        self.say(&format!(
            "{} ** Server uptime less than 2 hours. Start Time = {}  Uptime = {}",
            o.serverid, start, uptime
        ))?;
        Ok(Outcome::Alert { count: 1 })
    }

    fn bloat(&mut self) -> Result<Outcome, AdhocError> {
        let o = self.opts;
        let version = self.server_version()?;
        let rows = self.rows(
            Action::Bloat,
            &queries::table_bloat(version, o.schema.as_deref()),
        )?;
        let mut entries = Vec::new();
        for row in &rows {
            let ratio = row.i64_or_zero(4).map_err(|e| query_error(Action::Bloat, e))?;
            if ratio < o.bloatpct {
                continue;
            }
            entries.push(bloat_entry(&o.serverid, row, ratio).map_err(|e| query_error(Action::Bloat, e))?);
        }
        if entries.is_empty() {
            self.say(&format!("{} ** No bloat > {}%.", o.serverid, o.bloatpct))?;
            return Ok(Outcome::Clear);
        }
        let body = entries.join("\n");
        self.say(&format!(
            "{} ** Bloated tables detected = {}",
            o.serverid,
            entries.len()
        ))?;
        writeln!(self.out, "{body}")?;
        self.notify(&format!("bloat={}", entries.len()), &body)?;
        Ok(Outcome::Alert {
            count: entries.len(),
        })
    }
}

fn query_error(action: Action, source: CheckError) -> AdhocError {
    AdhocError::Query {
        action: action.name(),
        source,
    }
}

fn sql_text(raw: &str, max_len: usize) -> String {
    truncate(&normalize_for_display(raw), max_len)
}

fn long_query_entry(serverid: &str, row: &Row, max_len: usize) -> Result<String, CheckError> {
    Ok(format!(
        "{} (LONG QUERY) ** db={} -- pid={} -- client={} -- user={} -- app={} -- started={} -- connected {} -- running {}\nquery={}",
        serverid,
        row.get_str(0)?,
        row.get_i64(1)?,
        row.get_str(2)?,
        row.get_str(3)?,
        row.get_str(4)?,
        row.get_str(5)?,
        format_duration(row.i64_or_zero(6)?),
        format_duration(row.i64_or_zero(7)?),
        sql_text(&row.get_str(8)?, max_len),
    ))
}

fn blocked_entry(serverid: &str, row: &Row, max_len: usize) -> Result<String, CheckError> {
    Ok(format!(
        "{sid} (BLOCKED INFO) ** db={} -- pid={} -- user={} -- wait_event={} -- blocked {}\n\
         {sid} (BLOCKING INFO) ** pid={} -- user={} -- state={} -- wait_event={} -- running {}\n\
         blocked_sql={}\nblocking_sql={}",
        row.get_str(0)?,
        row.get_i64(1)?,
        row.get_str(2)?,
        row.get_str(3)?,
        format_duration(row.i64_or_zero(4)?),
        row.get_i64(5)?,
        row.get_str(6)?,
        row.get_str(7)?,
        row.get_str(8)?,
        format_duration(row.i64_or_zero(9)?),
        sql_text(&row.get_str(10)?, max_len),
        sql_text(&row.get_str(11)?, max_len),
        sid = serverid,
    ))
}

fn bloat_entry(serverid: &str, row: &Row, ratio: i64) -> Result<String, CheckError> {
    let bloat_bytes = row.i64_or_zero(3)?.max(0) as u64;
    Ok(format!(
        "{} (BLOAT) ** table={}.{} bloatpct={} bloat_size={} table_size={} fillfactor={}",
        serverid,
        row.get_str(0)?,
        row.get_str(1)?,
        ratio,
        format_bytes(bloat_bytes),
        row.get_str(2)?,
        row.get_str(5)?,
    ))
}
