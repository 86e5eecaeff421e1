//! Shared formatting helpers for report messages and ad-hoc output.

/// Format byte count as human-readable size: `"1.5 GiB"`, `"512 B"`.
pub fn format_bytes(bytes: u64) -> String {
    let f = bytes as f64;
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GiB", f / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", f / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", f / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds: `"3m 5s"`, `"2d 4h"`, `"0s"` for `<= 0`.
pub fn format_duration(secs: i64) -> String {
    if secs <= 0 {
        return "0s".to_string();
    }
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Format an uptime given in whole minutes the way alert mails show it:
/// days above 3000 minutes, hours above 300, minutes otherwise.
pub fn format_uptime_minutes(minutes: i64) -> String {
    if minutes <= 0 {
        "< 1 minute".to_string()
    } else if minutes > 3000 {
        format!("{} days", minutes / 1440)
    } else if minutes > 300 {
        format!("{} hours", minutes / 60)
    } else {
        format!("{} minutes", minutes)
    }
}

/// Truncate to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Single-line rendering of query text: control whitespace becomes a
/// space and runs of spaces collapse into one.
pub fn normalize_for_display(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        let ch = if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch };
        if ch == ' ' {
            if !prev_space {
                result.push(ch);
            }
            prev_space = true;
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result.trim().to_string()
}
