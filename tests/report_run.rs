use chrono::NaiveDate;

use pgreport::catalog::CheckId;
use pgreport::config::{ConnectionOptions, OutputFormat, ReportOptions};
use pgreport::controller::{RunController, RunOutcome, RunState};
use pgreport::executor::{MockExecutor, Row, Value};
use pgreport::host::MockFs;
use pgreport::report::{Finding, Status};
use pgreport::version::{ReleaseLine, VersionTable};

fn table_2020() -> VersionTable {
    VersionTable {
        min_supported: ReleaseLine::new(9, 6),
        latest: ReleaseLine::new(13, 0),
        latest_patches: vec![
            (ReleaseLine::new(13, 0), 1),
            (ReleaseLine::new(12, 0), 5),
            (ReleaseLine::new(11, 0), 10),
            (ReleaseLine::new(10, 0), 15),
            (ReleaseLine::new(9, 6), 20),
            (ReleaseLine::new(9, 5), 24),
        ],
        updated: NaiveDate::from_ymd_opt(2020, 11, 12).unwrap(),
    }
}

fn setting(name: &str, value: &str, unit: &str) -> Row {
    Row::new(vec![name.into(), value.into(), unit.into()])
}

/// Appends answers for the context and every check to `exec`, so
/// responses scripted by the caller take precedence.
fn cluster(exec: MockExecutor, version_num: i64, version: &str) -> MockExecutor {
    exec.on_row("SELECT 1", vec![Value::Int(1)])
        .on_row(
            "server_version_num",
            vec![Value::Int(version_num), version.into(), Value::Bool(false)],
        )
        .on(
            "FROM pg_settings",
            vec![
                setting("max_connections", "100", ""),
                setting("shared_buffers", "16384", "8kB"),
                setting("work_mem", "4096", "kB"),
                setting("autovacuum", "on", ""),
            ],
        )
        .on_row("pg_postmaster_start_time", vec![Value::Int(864_000)])
        .on_row("count(*) FROM pg_stat_replication", vec![Value::Int(0)])
        .on_row("sum(blks_hit)", vec![Value::Int(950), Value::Int(50)])
        .on_row("AS connections", vec![Value::Int(12)])
        .on_row("AS idle_in_transaction", vec![Value::Int(0)])
        .on_row("AS long_running", vec![Value::Int(0)])
        .on_row("AS blocked", vec![Value::Int(0)])
        .on("AS replica_state", vec![])
        .on_row(
            "sum(conflicts)",
            vec![Value::Int(0), Value::Int(0), Value::Int(0)],
        )
        .on_row(
            "FROM pg_stat_bgwriter",
            vec![
                Value::Int(1440),
                Value::Int(0),
                Value::Float(1_000.0),
                Value::Float(10.0),
                Value::Int(100),
                Value::Int(100),
                Value::Int(0),
                Value::Int(10),
                Value::Int(0),
            ],
        )
        .on_row("AS bloated FROM", vec![Value::Int(0)])
        .on_row("AS unused_indexes FROM", vec![Value::Int(0)])
        .on_row("AS freeze_candidates FROM", vec![Value::Int(0)])
        .on_row("AS analyze_candidates FROM", vec![Value::Int(0)])
}

fn run(exec: MockExecutor) -> (RunOutcome, String) {
    let conn = ConnectionOptions::new("db.internal", 5432, "sales", "monitor");
    let opts = ReportOptions {
        dry_run: true,
        ..ReportOptions::default()
    };
    let mut controller = RunController::new(conn, opts)
        .with_versions(table_2020())
        .with_today(NaiveDate::from_ymd_opt(2020, 12, 1).unwrap());
    let mut out = Vec::new();
    let outcome = controller.run(exec, &MockFs::new(), &mut out).unwrap();
    assert_eq!(controller.state(), RunState::Done);
    (outcome, String::from_utf8(out).unwrap())
}

fn finding<'a>(outcome: &'a RunOutcome, id: CheckId) -> &'a Finding {
    outcome
        .report
        .findings
        .iter()
        .find(|f| f.check == id.id())
        .unwrap()
}

#[test]
fn findings_follow_catalog_order() {
    let (outcome, mirrored) = run(cluster(MockExecutor::new(), 130001, "PostgreSQL 13.1"));
    let ids: Vec<&str> = outcome.report.findings.iter().map(|f| f.check).collect();
    let expected: Vec<&str> = CheckId::ALL.iter().map(|id| id.id()).collect();
    assert_eq!(ids, expected);
    assert_eq!(mirrored.lines().count(), CheckId::ALL.len());
}

#[test]
fn healthy_cache_and_current_version() {
    let (outcome, _) = run(cluster(MockExecutor::new(), 130001, "PostgreSQL 13.1"));
    let cache = finding(&outcome, CheckId::CacheHitRatio);
    assert_eq!(cache.status, Status::Ok);
    assert!(cache.message.contains("High cache hit ratio"));
    assert_eq!(finding(&outcome, CheckId::VersionMajor).status, Status::Ok);
    assert_eq!(finding(&outcome, CheckId::VersionMinor).status, Status::Ok);
    assert_eq!(finding(&outcome, CheckId::Connections).status, Status::Ok);
}

#[test]
fn unsupported_major_version_warns() {
    let (outcome, _) = run(cluster(MockExecutor::new(), 90524, "PostgreSQL 9.5.24"));
    let major = finding(&outcome, CheckId::VersionMajor);
    assert_eq!(major.status, Status::Warn);
    assert!(major.message.contains("upgrade ASAP"));
}

#[test]
fn saturated_connections_warn() {
    let exec = MockExecutor::new().on_row("AS connections", vec![Value::Int(85)]);
    let (outcome, mirrored) = run(cluster(exec, 130001, "PostgreSQL 13.1"));
    let conns = finding(&outcome, CheckId::Connections);
    assert_eq!(conns.status, Status::Warn);
    assert!(conns.message.contains("greater than 80%"));
    assert!(mirrored.contains("[WARN] Connections [connections]:"));
}

#[test]
fn remote_host_skips_os_checks() {
    let (outcome, _) = run(cluster(MockExecutor::new(), 130001, "PostgreSQL 13.1"));
    for id in [CheckId::Archiving, CheckId::OvercommitMemory, CheckId::OvercommitRatio] {
        assert_eq!(finding(&outcome, id).status, Status::NotApplicable, "{id:?}");
    }
}

#[test]
fn no_bloat_means_no_detail_section() {
    let (outcome, _) = run(cluster(MockExecutor::new(), 130001, "PostgreSQL 13.1"));
    assert_eq!(finding(&outcome, CheckId::Bloat).status, Status::Ok);
    assert!(outcome.report.details.is_empty());
}

#[test]
fn bloated_tables_are_listed_after_findings() {
    let row = |name: &str| {
        Row::new(vec![
            "public".into(),
            name.into(),
            "1 GB".into(),
            Value::Int(45),
            "460 MB".into(),
        ])
    };
    let exec = MockExecutor::new()
        .on_row("AS bloated FROM", vec![Value::Int(3)])
        .on(
            "ORDER BY wasted_bytes",
            vec![row("orders"), row("items"), row("events")],
        );
    let (outcome, _) = run(cluster(exec, 130001, "PostgreSQL 13.1"));
    let bloat = finding(&outcome, CheckId::Bloat);
    assert_eq!(bloat.status, Status::Warn);
    assert!(bloat.message.starts_with("3 "));
    assert_eq!(outcome.report.details.len(), 1);
    assert_eq!(outcome.report.details[0].rows.len(), 3);

    let text = outcome.report.render(OutputFormat::Text);
    let last_finding = text.find("vm.overcommit_ratio").unwrap();
    let detail = text.find("Bloated table(s)").unwrap();
    assert!(detail > last_finding);
}

#[test]
fn failing_check_is_one_error_and_run_continues() {
    let exec = MockExecutor::new().fail("sum(blks_hit)", "permission denied for pg_stat_database");
    let (outcome, _) = run(cluster(exec, 130001, "PostgreSQL 13.1"));
    let errors: Vec<&Finding> = outcome
        .report
        .findings
        .iter()
        .filter(|f| f.status == Status::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].check, "cache_hit_ratio");
    assert_eq!(outcome.summary.errors, 1);
    assert_eq!(outcome.report.findings.len(), CheckId::ALL.len());
    assert_eq!(finding(&outcome, CheckId::Connections).status, Status::Ok);
}

#[test]
fn text_and_html_list_checks_in_same_order() {
    let (outcome, _) = run(cluster(MockExecutor::new(), 130001, "PostgreSQL 13.1"));
    let text = outcome.report.render(OutputFormat::Text);
    let html = outcome.report.render(OutputFormat::Html);

    let text_positions: Vec<usize> = CheckId::ALL
        .iter()
        .map(|id| text.find(&format!("{} [{}]:", id.title(), id.id())).unwrap())
        .collect();
    let html_positions: Vec<usize> = CheckId::ALL
        .iter()
        .map(|id| html.find(&format!("<tr id=\"{}\">", id.id())).unwrap())
        .collect();
    assert!(text_positions.windows(2).all(|w| w[0] < w[1]));
    assert!(html_positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn rendering_twice_is_identical() {
    let (outcome, _) = run(cluster(MockExecutor::new(), 130001, "PostgreSQL 13.1"));
    for format in [OutputFormat::Text, OutputFormat::Html, OutputFormat::Json] {
        assert_eq!(outcome.report.render(format), outcome.report.render(format));
    }
}
