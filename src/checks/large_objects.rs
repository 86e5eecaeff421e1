//! Orphaned large object count via `vacuumlo` in dry-run mode.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::config::ConnectionOptions;
use crate::error::CheckError;

/// Extracts the count from `vacuumlo -n -v` output
/// (`Would remove 3 large objects from database "sales".`).
pub(crate) fn parse_vacuumlo_output(output: &str) -> Option<i64> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Would remove ")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Arguments for a dry run against `conn`. `-h` is left out for a blank
/// host so vacuumlo connects through the default socket.
pub(crate) fn vacuumlo_args(conn: &ConnectionOptions) -> Vec<String> {
    let mut args = vec!["-n".to_string(), "-v".to_string()];
    if let Some(host) = conn.explicit_host() {
        args.extend(["-h".to_string(), host.to_string()]);
    }
    args.extend([
        "-p".to_string(),
        conn.port.to_string(),
        "-U".to_string(),
        conn.user.clone(),
        "-w".to_string(),
        conn.dbname.clone(),
    ]);
    args
}

/// Runs `vacuumlo` without removing anything and returns the number of
/// orphaned large objects it found.
pub(crate) fn count_orphaned(vacuumlo: &Path, conn: &ConnectionOptions) -> Result<i64, CheckError> {
    let mut cmd = Command::new(vacuumlo);
    cmd.args(vacuumlo_args(conn));
    if let Some(ref password) = conn.password {
        cmd.env("PGPASSWORD", password);
    }
    debug!(tool = %vacuumlo.display(), db = %conn.dbname, "running vacuumlo dry run");

    let output = cmd
        .output()
        .map_err(|e| CheckError::Tool(format!("{}: {}", vacuumlo.display(), e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CheckError::Tool(format!(
            "vacuumlo exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    parse_vacuumlo_output(&stdout).ok_or_else(|| CheckError::Unparsable {
        column: 0,
        value: stdout.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dry_run_summary() {
        let out = "Connected to database \"sales\"\n\
                   Test run: no large objects will be removed!\n\
                   Checking data in public.docs\n\
                   Would remove 3 large objects from database \"sales\".\n";
        assert_eq!(parse_vacuumlo_output(out), Some(3));
        assert_eq!(parse_vacuumlo_output("Would remove 0 large objects"), Some(0));
        assert_eq!(parse_vacuumlo_output("nothing here"), None);
    }

    #[test]
    fn blank_host_omits_host_flag() {
        let conn = ConnectionOptions::new("", 5432, "sales", "postgres");
        let args = vacuumlo_args(&conn);
        assert!(!args.iter().any(|a| a == "-h"));
        assert_eq!(args, ["-n", "-v", "-p", "5432", "-U", "postgres", "-w", "sales"]);

        let conn = ConnectionOptions::new("db1", 5432, "sales", "postgres");
        assert_eq!(&vacuumlo_args(&conn)[2..4], ["-h", "db1"]);
    }

    #[test]
    fn missing_tool_is_tool_error() {
        let conn = ConnectionOptions::new("localhost", 5432, "x", "postgres");
        assert!(matches!(
            count_orphaned(Path::new("/nonexistent/vacuumlo"), &conn),
            Err(CheckError::Tool(_))
        ));
    }
}
