//! Run controller.
//!
//! Drives one report run through
//! `Init -> ContextBuilt -> ChecksRunning -> Rendered -> Done`.
//! Only failures before the checks start (and failing to persist the
//! report) move the run to `Failed`; individual check failures are part
//! of the report.

use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::catalog::CheckId;
use crate::checks::{CheckEnv, run_check};
use crate::config::{ConnectionOptions, ReportOptions};
use crate::context::ClusterContext;
use crate::error::SetupError;
use crate::executor::QueryExecutor;
use crate::host::FileSystem;
use crate::report::{Report, ReportHeader, Summary};
use crate::version::VersionTable;

/// Run lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    ContextBuilt,
    ChecksRunning,
    Rendered,
    Done,
    Failed,
}

/// What a finished run produced.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub report: Report,
    pub summary: Summary,
    /// Where the report was written; `None` on a dry run.
    pub path: Option<PathBuf>,
}

pub struct RunController {
    state: RunState,
    conn: ConnectionOptions,
    opts: ReportOptions,
    versions: VersionTable,
    today: NaiveDate,
    vacuumlo: Option<PathBuf>,
}

impl RunController {
    pub fn new(conn: ConnectionOptions, opts: ReportOptions) -> Self {
        Self {
            state: RunState::Init,
            conn,
            opts,
            versions: VersionTable::default(),
            today: Local::now().date_naive(),
            vacuumlo: None,
        }
    }

    /// Replaces the known-release table.
    pub fn with_versions(mut self, versions: VersionTable) -> Self {
        self.versions = versions;
        self
    }

    /// Date used for the release table staleness check.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_vacuumlo(mut self, vacuumlo: Option<PathBuf>) -> Self {
        self.vacuumlo = vacuumlo;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    fn fail(&mut self, e: SetupError) -> SetupError {
        error!(error = %e, "run failed");
        self.transition(RunState::Failed);
        e
    }

    /// `Init -> ContextBuilt`: validates parameters, verifies the
    /// execution path and gathers cluster facts.
    pub fn build_context(
        &mut self,
        exec: &mut dyn QueryExecutor,
        fs: &dyn FileSystem,
    ) -> Result<ClusterContext, SetupError> {
        if let Err(e) = self.conn.validate() {
            return Err(self.fail(e));
        }
        info!(
            host = %self.conn.host,
            port = self.conn.port,
            db = %self.conn.dbname,
            via = exec.describe(),
            "connecting"
        );
        match ClusterContext::gather(exec, fs, &self.conn, &self.opts) {
            Ok(ctx) => {
                self.transition(RunState::ContextBuilt);
                Ok(ctx)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `ContextBuilt -> ChecksRunning`: runs every check in catalog order,
    /// mirroring each finding to `out` as it is produced.
    pub fn run_checks(
        &mut self,
        ctx: &ClusterContext,
        exec: &mut dyn QueryExecutor,
        fs: &dyn FileSystem,
        out: &mut dyn Write,
    ) -> Report {
        self.transition(RunState::ChecksRunning);
        let mut report = Report::new(ReportHeader {
            host: ctx.host.clone(),
            dbname: ctx.dbname.clone(),
            version: ctx.version.to_string(),
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        let env = CheckEnv {
            ctx,
            thresholds: &self.opts.thresholds,
            versions: &self.versions,
            today: self.today,
            fs,
            conn: &self.conn,
            vacuumlo: self.vacuumlo.clone(),
        };

        let mut mirror = true;
        for id in CheckId::ALL {
            let outcome = run_check(id, &env, exec);
            let f = &outcome.finding;
            if mirror
                && let Err(e) = writeln!(
                    out,
                    "{} {} [{}]: {}",
                    f.status.marker(),
                    f.title,
                    f.check,
                    f.full_message()
                )
            {
                warn!(error = %e, "cannot mirror findings to stdout, mirroring stopped");
                mirror = false;
            }
            report.push_finding(outcome.finding);
            if let Some(detail) = outcome.detail {
                report.push_detail(detail);
            }
        }
        report
    }

    /// `ChecksRunning -> Rendered`: writes the report unless this is a
    /// dry run.
    pub fn render(&mut self, report: &Report) -> Result<Option<PathBuf>, SetupError> {
        let path = if self.opts.dry_run {
            info!("dry run, report not written");
            None
        } else {
            let path = self.opts.destination();
            if let Err(e) = report.write_to(&path, self.opts.format) {
                return Err(self.fail(SetupError::Io(e)));
            }
            info!(path = %path.display(), format = ?self.opts.format, "report written");
            Some(path)
        };
        self.transition(RunState::Rendered);
        Ok(path)
    }

    /// `Rendered -> Done`: releases the executor and its scratch files.
    pub fn finish<E: QueryExecutor>(&mut self, exec: E) {
        drop(exec);
        self.transition(RunState::Done);
    }

    /// Runs all stages with an owned executor.
    pub fn run<E: QueryExecutor>(
        &mut self,
        mut exec: E,
        fs: &dyn FileSystem,
        out: &mut dyn Write,
    ) -> Result<RunOutcome, SetupError> {
        let ctx = self.build_context(&mut exec, fs)?;
        let report = self.run_checks(&ctx, &mut exec, fs, out);
        let path = self.render(&report)?;
        self.finish(exec);

        let summary = report.summary();
        info!(
            "{} checks, {} warnings, {} errors",
            summary.checks, summary.warnings, summary.errors
        );
        Ok(RunOutcome {
            report,
            summary,
            path,
        })
    }
}
