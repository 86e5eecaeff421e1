//! Report assembly and rendering.
//!
//! A [`Report`] is an append-only list of [`Finding`]s followed by
//! [`DetailSection`]s. Findings keep insertion order, which is the fixed
//! check order; they are never sorted by severity so consumers can rely
//! on stable positions.

mod html;
mod text;

use std::io;
use std::path::Path;

use serde::Serialize;

use crate::config::OutputFormat;

/// Outcome class of a finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    /// Advisory, never pass/fail (memory recommendations).
    Info,
    /// Check does not apply to this server or deployment.
    NotApplicable,
    Warn,
    /// The check itself failed to run.
    Error,
}

impl Status {
    /// Fixed-width plain-text marker.
    pub fn marker(&self) -> &'static str {
        match self {
            Status::Ok => "[ OK ]",
            Status::Info => "[INFO]",
            Status::NotApplicable => "[ NA ]",
            Status::Warn => "[WARN]",
            Status::Error => "[ERR ]",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Info => "INFO",
            Status::NotApplicable => "N/A",
            Status::Warn => "WARN",
            Status::Error => "ERROR",
        }
    }
}

/// Result of one check.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    pub check: &'static str,
    pub title: &'static str,
    pub status: Status,
    pub message: String,
    /// Extra message fragments (one per violated rule for multi-rule checks).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Finding {
    pub fn new(check: &'static str, title: &'static str, status: Status, message: impl Into<String>) -> Self {
        Self {
            check,
            title,
            status,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }

    /// All message text on one line.
    pub fn full_message(&self) -> String {
        if self.notes.is_empty() {
            self.message.clone()
        } else {
            format!("{} {}", self.message, self.notes.join(" "))
        }
    }
}

/// Tabular listing appended after the findings.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetailSection {
    pub check: &'static str,
    pub title: String,
    /// One line stating why rows are listed.
    pub criterion: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Report metadata shown in the header line.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReportHeader {
    pub host: String,
    pub dbname: String,
    pub version: String,
    pub generated_at: String,
}

/// Count of findings per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub checks: usize,
    pub warnings: usize,
    pub errors: usize,
}

/// Ordered findings plus detail listings.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Report {
    pub header: ReportHeader,
    pub findings: Vec<Finding>,
    pub details: Vec<DetailSection>,
}

impl Report {
    pub fn new(header: ReportHeader) -> Self {
        Self {
            header,
            findings: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn push_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn push_detail(&mut self, detail: DetailSection) {
        self.details.push(detail);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            checks: self.findings.len(),
            warnings: self
                .findings
                .iter()
                .filter(|f| f.status == Status::Warn)
                .count(),
            errors: self
                .findings
                .iter()
                .filter(|f| f.status == Status::Error)
                .count(),
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => text::render(self),
            OutputFormat::Html => html::render(self),
            OutputFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
        }
    }

    /// Renders and writes the report to `path`.
    pub fn write_to(&self, path: &Path, format: OutputFormat) -> io::Result<()> {
        std::fs::write(path, self.render(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn sample() -> Report {
        let mut report = Report::new(ReportHeader {
            host: "db1".to_string(),
            dbname: "sales".to_string(),
            version: "13.4".to_string(),
            generated_at: "2026-01-02 03:04:05".to_string(),
        });
        report.push_finding(Finding::new(
            "cache_hit_ratio",
            "Cache hit ratio",
            Status::Ok,
            "High cache hit ratio: 94.85%",
        ));
        report.push_finding(
            Finding::new(
                "config_sanity",
                "Configuration",
                Status::Warn,
                "Configuration issues found:",
            )
            .with_notes(vec!["autovacuum is off.".to_string(), "log_checkpoints is off.".to_string()]),
        );
        report.push_finding(Finding::new(
            "archiving",
            "WAL archiving",
            Status::Error,
            "query failed: permission denied",
        ));
        report.push_detail(DetailSection {
            check: "bloat",
            title: "Bloated tables/indexes".to_string(),
            criterion: "listed because at least 20% is bloated".to_string(),
            columns: vec!["relation".to_string(), "bloat_pct".to_string()],
            rows: vec![vec!["public.orders".to_string(), "42".to_string()]],
        });
        report
    }

    #[test]
    fn summary_counts_warnings_and_errors() {
        assert_eq!(
            sample().summary(),
            Summary {
                checks: 3,
                warnings: 1,
                errors: 1
            }
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let report = sample();
        for format in [OutputFormat::Text, OutputFormat::Html, OutputFormat::Json] {
            assert_eq!(report.render(format), report.render(format));
        }
    }

    #[test]
    fn text_and_html_keep_same_check_order() {
        let report = sample();
        let text = report.render(OutputFormat::Text);
        let html = report.render(OutputFormat::Html);
        let titles = ["Cache hit ratio", "Configuration", "WAL archiving"];
        for body in [&text, &html] {
            let positions: Vec<usize> = titles
                .iter()
                .map(|t| body.find(t).unwrap_or(usize::MAX))
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        }
    }

    #[test]
    fn json_carries_check_ids() {
        let json = sample().render(OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["findings"][1]["check"], "config_sanity");
        assert_eq!(value["findings"][1]["status"], "warn");
    }

    #[test]
    fn write_to_persists_rendered_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1234_report.txt");
        let report = sample();
        report.write_to(&path, OutputFormat::Text).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            report.render(OutputFormat::Text)
        );
    }
}
