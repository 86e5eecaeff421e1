//! Version currency rules.

use chrono::NaiveDate;

use super::CheckId;
use crate::report::{Finding, Status};
use crate::version::{PgVersion, VersionTable};

/// Note added when the release table itself may be outdated.
fn staleness_note(table: &VersionTable, today: NaiveDate, max_age_days: i64) -> Option<String> {
    let age = table.age_days(today);
    (age > max_age_days).then(|| {
        format!(
            "Release data is {age} days old (updated {}); newer releases may exist.",
            table.updated
        )
    })
}

fn finish(id: CheckId, status: Status, message: String, stale: Option<String>) -> Finding {
    match stale {
        Some(note) => id.finding(Status::Warn, message).with_notes(vec![note]),
        None => id.finding(status, message),
    }
}

pub fn version_major(
    version: PgVersion,
    table: &VersionTable,
    today: NaiveDate,
    max_age_days: i64,
) -> Finding {
    let line = version.line();
    let (status, message) = if line < table.min_supported {
        (
            Status::Warn,
            format!(
                "Unsupported major version {line}: upgrade ASAP (oldest supported is {})",
                table.min_supported
            ),
        )
    } else if line < table.latest {
        (
            Status::Warn,
            format!(
                "Major version {line} is supported, consider upgrading to {}",
                table.latest
            ),
        )
    } else {
        (Status::Ok, format!("Major version {line} is the latest"))
    };
    finish(
        CheckId::VersionMajor,
        status,
        message,
        staleness_note(table, today, max_age_days),
    )
}

pub fn version_minor(
    version: PgVersion,
    table: &VersionTable,
    today: NaiveDate,
    max_age_days: i64,
) -> Finding {
    let line = version.line();
    let (status, message) = match table.latest_patch(line) {
        Some(latest) if version.patch < latest => {
            let target = PgVersion::new(line.major, line.minor, latest);
            (
                Status::Warn,
                format!("Minor version {version} is behind {target}: apply the latest patch release"),
            )
        }
        Some(_) => (Status::Ok, format!("Minor version {version} is current")),
        None if line > table.latest => (
            Status::Ok,
            format!("Version {version} is newer than the known releases"),
        ),
        None => (
            Status::Warn,
            format!("No patch information for release line {line}"),
        ),
    };
    finish(
        CheckId::VersionMinor,
        status,
        message,
        staleness_note(table, today, max_age_days),
    )
}
