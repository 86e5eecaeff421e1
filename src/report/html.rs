//! HTML rendering: a minimal page with a fixed stylesheet.

use std::fmt::Write;

use super::{DetailSection, Report, Status};

const STYLE: &str = "\
body { font-family: Arial, Helvetica, sans-serif; font-size: 13px; color: #222; }
h1 { font-size: 18px; }
h2 { font-size: 15px; margin-top: 24px; }
table { border-collapse: collapse; margin-bottom: 12px; }
th, td { border: 1px solid #999; padding: 3px 8px; text-align: left; vertical-align: top; }
th { background: #ddd; }
td.ok { color: #1a7f37; font-weight: bold; }
td.warn { color: #c62828; font-weight: bold; }
td.info { color: #1565c0; }
td.na { color: #777; }
td.error { color: #fff; background: #c62828; font-weight: bold; }
p.criterion { font-style: italic; }
";

fn css_class(status: Status) -> &'static str {
    match status {
        Status::Ok => "ok",
        Status::Info => "info",
        Status::NotApplicable => "na",
        Status::Warn => "warn",
        Status::Error => "error",
    }
}

/// Escapes text for HTML element content and attribute values.
pub(super) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub(super) fn render(report: &Report) -> String {
    let mut out = String::new();
    let h = &report.header;

    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(out, "<title>PostgreSQL health report: {}</title>", escape(&h.host));
    let _ = writeln!(out, "<style>\n{}</style>\n</head>\n<body>", STYLE);
    let _ = writeln!(
        out,
        "<h1>PostgreSQL health report  host={}  db={}  version={}  generated={}</h1>",
        escape(&h.host),
        escape(&h.dbname),
        escape(&h.version),
        escape(&h.generated_at)
    );

    out.push_str("<table>\n<tr><th>Check</th><th>Status</th><th>Details</th></tr>\n");
    for finding in &report.findings {
        let _ = write!(
            out,
            "<tr id=\"{}\"><td>{}</td><td class=\"{}\">{}</td><td>{}",
            escape(finding.check),
            escape(finding.title),
            css_class(finding.status),
            finding.status.label(),
            escape(&finding.message)
        );
        for note in &finding.notes {
            let _ = write!(out, "<br>{}", escape(note));
        }
        out.push_str("</td></tr>\n");
    }
    out.push_str("</table>\n");

    let summary = report.summary();
    let _ = writeln!(
        out,
        "<p>{} checks, {} warnings, {} errors</p>",
        summary.checks, summary.warnings, summary.errors
    );

    for detail in &report.details {
        render_detail(&mut out, detail);
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn render_detail(out: &mut String, detail: &DetailSection) {
    let _ = writeln!(out, "<h2>{}</h2>", escape(&detail.title));
    let _ = writeln!(out, "<p class=\"criterion\">{}</p>", escape(&detail.criterion));
    out.push_str("<table>\n<tr>");
    for col in &detail.columns {
        let _ = write!(out, "<th>{}</th>", escape(col));
    }
    out.push_str("</tr>\n");
    for row in &detail.rows {
        out.push_str("<tr>");
        for cell in row {
            let _ = write!(out, "<td>{}</td>", escape(cell));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
}
