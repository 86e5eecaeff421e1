//! Plain-text rendering.

use std::fmt::Write;

use super::{DetailSection, Report};

const RULE: &str = "==============================================================================";

pub(super) fn render(report: &Report) -> String {
    let mut out = String::new();
    let h = &report.header;
    let _ = writeln!(
        out,
        "PostgreSQL health report  host={}  db={}  version={}  generated={}",
        h.host, h.dbname, h.version, h.generated_at
    );
    let _ = writeln!(out, "{}", RULE);

    for finding in &report.findings {
        let _ = writeln!(
            out,
            "{} {} [{}]: {}",
            finding.status.marker(),
            finding.title,
            finding.check,
            finding.message
        );
        for note in &finding.notes {
            let _ = writeln!(out, "       - {}", note);
        }
    }

    let summary = report.summary();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "{} checks, {} warnings, {} errors",
        summary.checks, summary.warnings, summary.errors
    );

    for detail in &report.details {
        out.push('\n');
        render_detail(&mut out, detail);
    }

    out
}

/// Renders a detail listing as an aligned `psql`-style table.
fn render_detail(out: &mut String, detail: &DetailSection) {
    let _ = writeln!(out, "{}", detail.title);
    let _ = writeln!(out, "{}", detail.criterion);

    let mut widths: Vec<usize> = detail.columns.iter().map(|c| c.chars().count()).collect();
    for row in &detail.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                format!(" {:<width$} ", cell, width = *w)
            })
            .collect::<Vec<_>>()
            .join("|")
            .trim_end()
            .to_string()
    };

    let _ = writeln!(out, "{}", line(&detail.columns));
    let _ = writeln!(
        out,
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    for row in &detail.rows {
        let _ = writeln!(out, "{}", line(row));
    }
    let _ = writeln!(
        out,
        "({} row{})",
        detail.rows.len(),
        if detail.rows.len() == 1 { "" } else { "s" }
    );
}
