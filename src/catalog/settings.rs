//! Server configuration and kernel settings rules.

use super::CheckId;
use crate::context::ClusterContext;
use crate::host::Overcommit;
use crate::report::{Finding, Status};

/// Every violated configuration rule adds one note to a single finding.
/// Settings the server does not report are skipped.
pub fn config_sanity(ctx: &ClusterContext) -> Finding {
    let id = CheckId::ConfigSanity;
    let mut notes = Vec::new();
    let off = |name: &str| ctx.setting(name).is_some_and(|s| !s.is_on());
    let int = |name: &str| ctx.setting(name).and_then(|s| s.as_i64());

    if off("autovacuum") {
        notes.push("autovacuum is off.".to_string());
    }
    if let Some(target) = ctx
        .setting("checkpoint_completion_target")
        .and_then(|s| s.as_f64())
        && target <= 0.6
    {
        notes.push(format!(
            "checkpoint_completion_target is {target}, should be above 0.6 (0.9 recommended)."
        ));
    }
    if ctx.version.at_least(9, 3) && off("data_checksums") {
        notes.push("data checksums are disabled.".to_string());
    }
    if ctx.version.at_least(9, 6) && int("idle_in_transaction_session_timeout") == Some(0) {
        notes.push("idle_in_transaction_session_timeout is disabled.".to_string());
    }
    if off("log_checkpoints") {
        notes.push("log_checkpoints is off.".to_string());
    }
    if off("log_lock_waits") {
        notes.push("log_lock_waits is off.".to_string());
    }
    if int("log_min_duration_statement") == Some(-1) {
        notes.push("log_min_duration_statement is disabled.".to_string());
    }
    if int("log_temp_files") == Some(-1) {
        notes.push("log_temp_files is disabled.".to_string());
    }
    if let Some(libs) = ctx.setting("shared_preload_libraries")
        && !libs
            .setting
            .split(',')
            .any(|lib| lib.trim().trim_matches('"') == "pg_stat_statements")
    {
        notes.push("pg_stat_statements is not in shared_preload_libraries.".to_string());
    }
    if let Some(size) = int("track_activity_query_size")
        && size < 8192
    {
        notes.push(format!(
            "track_activity_query_size is {size}, should be at least 8192."
        ));
    }

    if notes.is_empty() {
        id.finding(Status::Ok, "No configuration issues found")
    } else {
        id.finding(
            Status::Warn,
            format!("{} configuration issue(s) found:", notes.len()),
        )
        .with_notes(notes)
    }
}

pub fn overcommit_memory(o: Overcommit) -> Finding {
    let id = CheckId::OvercommitMemory;
    if o.memory == 0 {
        id.finding(
            Status::Warn,
            "vm.overcommit_memory is 0 (heuristic overcommit); the OOM killer may terminate the postmaster. Set it to 2.",
        )
    } else {
        id.finding(Status::Ok, format!("vm.overcommit_memory is {}", o.memory))
    }
}

pub fn overcommit_ratio(o: Overcommit) -> Finding {
    let id = CheckId::OvercommitRatio;
    if o.ratio <= 50 {
        id.finding(
            Status::Warn,
            format!(
                "vm.overcommit_ratio is {}, too conservative for a dedicated database host (80 or more recommended)",
                o.ratio
            ),
        )
    } else {
        id.finding(Status::Ok, format!("vm.overcommit_ratio is {}", o.ratio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Setting;
    use crate::version::PgVersion;

    fn ctx_with(version: PgVersion, settings: &[(&str, &str)]) -> ClusterContext {
        let mut ctx = ClusterContext::new(version);
        for (name, value) in settings {
            ctx.settings
                .insert(name.to_string(), Setting::new(value, ""));
        }
        ctx
    }

    fn healthy() -> Vec<(&'static str, &'static str)> {
        vec![
            ("autovacuum", "on"),
            ("checkpoint_completion_target", "0.9"),
            ("data_checksums", "on"),
            ("idle_in_transaction_session_timeout", "600000"),
            ("log_checkpoints", "on"),
            ("log_lock_waits", "on"),
            ("log_min_duration_statement", "1000"),
            ("log_temp_files", "0"),
            ("shared_preload_libraries", "auto_explain, pg_stat_statements"),
            ("track_activity_query_size", "16384"),
        ]
    }

    #[test]
    fn healthy_configuration_is_ok() {
        let f = config_sanity(&ctx_with(PgVersion::new(16, 0, 2), &healthy()));
        assert_eq!(f.status, Status::Ok, "{:?}", f.notes);
    }

    #[test]
    fn each_violation_adds_a_note() {
        let f = config_sanity(&ctx_with(
            PgVersion::new(16, 0, 2),
            &[
                ("autovacuum", "off"),
                ("checkpoint_completion_target", "0.5"),
                ("log_temp_files", "-1"),
                ("shared_preload_libraries", ""),
                ("track_activity_query_size", "1024"),
            ],
        ));
        assert_eq!(f.status, Status::Warn);
        assert_eq!(f.notes.len(), 5, "{:?}", f.notes);
        assert!(f.message.starts_with("5 configuration"));
    }

    #[test]
    fn version_specific_settings_ignored_on_old_servers() {
        let mut settings = healthy();
        settings.retain(|(n, _)| *n != "data_checksums");
        settings.push(("idle_in_transaction_session_timeout", "0"));
        let f = config_sanity(&ctx_with(PgVersion::new(9, 5, 25), &settings));
        // The later duplicate wins in the map.
        assert_eq!(f.status, Status::Ok, "{:?}", f.notes);

        let f = config_sanity(&ctx_with(PgVersion::new(9, 6, 24), &settings));
        assert_eq!(f.notes, vec!["idle_in_transaction_session_timeout is disabled.".to_string()]);
    }

    #[test]
    fn overcommit_rules() {
        let heuristic = Overcommit { memory: 0, ratio: 50 };
        assert_eq!(overcommit_memory(heuristic).status, Status::Warn);
        assert_eq!(overcommit_ratio(heuristic).status, Status::Warn);
        let strict = Overcommit { memory: 2, ratio: 90 };
        assert_eq!(overcommit_memory(strict).status, Status::Ok);
        assert_eq!(overcommit_ratio(strict).status, Status::Ok);
    }
}
