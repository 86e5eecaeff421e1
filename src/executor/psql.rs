//! Command-line client execution path.
//!
//! Runs `psql` once per query in unaligned, tuples-only mode. Records are
//! NUL-terminated (`-0`) and fields are separated by the ASCII unit
//! separator, so query text containing `|` or line breaks survives intact.
//! Output goes to one scratch file that is reused by every query and
//! removed when the executor is dropped.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::NamedTempFile;
use tracing::trace;

use super::{QueryExecutor, Row, Value};
use crate::config::{ConnectionOptions, SslMode};
use crate::error::ExecError;

const FIELD_SEPARATOR: char = '\u{1f}';
const RECORD_TERMINATOR: char = '\0';

/// Executes queries through the `psql` binary.
pub struct PsqlExecutor {
    program: PathBuf,
    opts: ConnectionOptions,
    scratch: NamedTempFile,
}

impl PsqlExecutor {
    /// Locates `psql` on `PATH` and prepares the scratch file.
    pub fn new(opts: &ConnectionOptions) -> Result<Self, ExecError> {
        let path_var = std::env::var("PATH").unwrap_or_default();
        let program = find_in_path("psql", &path_var).ok_or_else(|| {
            ExecError::ClientMissing("psql is not installed or not on PATH".to_string())
        })?;
        Self::with_program(program, opts)
    }

    /// Uses an explicit client binary.
    pub fn with_program(program: PathBuf, opts: &ConnectionOptions) -> Result<Self, ExecError> {
        let scratch = tempfile::Builder::new()
            .prefix("pgreport_")
            .suffix(".out")
            .tempfile()?;
        Ok(Self {
            program,
            opts: opts.clone(),
            scratch,
        })
    }

    /// Path of the scratch output file.
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    fn command(&self, sql: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-X")
            .arg("-A")
            .arg("-t")
            .arg("-q")
            .arg("-0")
            .arg("-F")
            .arg(FIELD_SEPARATOR.to_string())
            .arg("-v")
            .arg("ON_ERROR_STOP=1");
        if let Some(host) = self.opts.explicit_host() {
            cmd.arg("-h").arg(host);
        }
        cmd.arg("-p")
            .arg(self.opts.port.to_string())
            .arg("-U")
            .arg(&self.opts.user)
            .arg("-d")
            .arg(&self.opts.dbname)
            .arg("-o")
            .arg(self.scratch.path())
            .arg("-c")
            .arg(sql)
            .env("PGAPPNAME", &self.opts.application_name)
            .env(
                "PGSSLMODE",
                match self.opts.sslmode {
                    SslMode::Disable => "disable",
                    SslMode::Prefer => "prefer",
                    SslMode::Require => "require",
                },
            );
        if let Some(ref password) = self.opts.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }
}

impl QueryExecutor for PsqlExecutor {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, ExecError> {
        trace!(sql, "psql");
        let output = self.command(sql).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = stderr.trim();
            // psql exits with 2 when the connection itself fails.
            return Err(if output.status.code() == Some(2) {
                ExecError::Connection(msg.to_string())
            } else {
                ExecError::Query(msg.to_string())
            });
        }

        let text = std::fs::read_to_string(self.scratch.path())?;
        Ok(parse_unaligned(&text))
    }

    fn describe(&self) -> &'static str {
        "psql"
    }
}

/// Parses `psql -A -t -0` output: NUL-terminated records, unit-separator
/// fields, empty fields are NULL. PostgreSQL text never contains NUL, so
/// a record terminator always ends a row.
pub(crate) fn parse_unaligned(text: &str) -> Vec<Row> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    if body.is_empty() {
        return Vec::new();
    }
    let body = body.strip_suffix(RECORD_TERMINATOR).unwrap_or(body);
    body.split(RECORD_TERMINATOR)
        .map(|record| {
            Row::new(
                record
                    .split(FIELD_SEPARATOR)
                    .map(|field| {
                        if field.is_empty() {
                            Value::Null
                        } else {
                            Value::Text(field.to_string())
                        }
                    })
                    .collect(),
            )
        })
        .collect()
}

/// Finds an executable named `name` in a `PATH`-style list.
pub fn find_in_path(name: &str, path_var: &str) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_separated_rows() {
        let rows = parse_unaligned("950\u{1f}50\u{1f}94.85\u{0}10\u{1f}\u{1f}t\u{0}");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_i64(0).unwrap(), 950);
        assert_eq!(rows[0].get_f64(2).unwrap(), 94.85);
        assert!(rows[1].values()[1].is_null());
        assert!(rows[1].get_bool(2).unwrap());
    }

    #[test]
    fn pipes_in_fields_do_not_split_columns() {
        let rows = parse_unaligned("42\u{1f}app\u{1f}SELECT a || b FROM t\u{1f}15\u{0}");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 4);
        assert_eq!(rows[0].get_str(2).unwrap(), "SELECT a || b FROM t");
        assert_eq!(rows[0].get_i64(3).unwrap(), 15);
    }

    #[test]
    fn line_breaks_in_fields_do_not_split_rows() {
        let text = concat!(
            "42\u{1f}app\u{1f}SELECT 1\nFROM t\u{1f}15\u{0}",
            "7\u{1f}cron\u{1f}VACUUM\u{1f}1\u{0}",
        );
        let rows = parse_unaligned(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_str(2).unwrap(), "SELECT 1\nFROM t");
        assert_eq!(rows[1].get_i64(0).unwrap(), 7);
    }

    #[test]
    fn single_null_column_is_one_row() {
        let rows = parse_unaligned("\u{0}");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].values()[0].is_null());
    }

    #[test]
    fn empty_output_is_no_rows() {
        assert!(parse_unaligned("").is_empty());
        assert!(parse_unaligned("\n").is_empty());
    }

    #[test]
    fn find_in_path_locates_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("psql");
        std::fs::write(&bin, "").unwrap();
        let path_var = std::env::join_paths([Path::new("/nonexistent"), dir.path()])
            .unwrap()
            .into_string()
            .unwrap();
        assert_eq!(find_in_path("psql", &path_var), Some(bin));
        assert_eq!(find_in_path("pg_dump", &path_var), None);
    }

    #[test]
    fn scratch_file_removed_on_drop() {
        let opts = ConnectionOptions::new("localhost", 5432, "postgres", "postgres");
        let exec = PsqlExecutor::with_program(PathBuf::from("/bin/false"), &opts).unwrap();
        let path = exec.scratch_path().to_path_buf();
        assert!(path.exists());
        drop(exec);
        assert!(!path.exists());
    }
}
