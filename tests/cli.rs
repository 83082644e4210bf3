use rusqlite::Connection;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn home_path(home: &TempDir) -> &Path {
    home.path()
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_billing-lens")
}

fn run_cmd(home: &TempDir, args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env("BILLING_LENS_HOME", home_path(home))
        .env_remove("BILLING_LENS_TOKEN")
        .output()
        .expect("run billing-lens command")
}

fn db_path(home: &TempDir) -> PathBuf {
    home.path().join("data").join("billing.sqlite")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Two GCP projects for 2024: alpha (jan 100, feb 50) and beta (jan 25.5).
fn seed_snapshot(home: &TempDir) {
    let conn = Connection::open(db_path(home)).expect("open sqlite");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS line_items (
            id INTEGER PRIMARY KEY,
            platform TEXT NOT NULL,
            project_id TEXT,
            project_name TEXT NOT NULL,
            billing_year INTEGER NOT NULL,
            billing_month TEXT,
            service_description TEXT,
            sku_description TEXT,
            kind TEXT,
            cost TEXT
        );
        CREATE TABLE IF NOT EXISTS project_meta (
            platform TEXT NOT NULL,
            project_name TEXT NOT NULL,
            project_id TEXT,
            project_code TEXT,
            environment TEXT,
            owner TEXT,
            team TEXT,
            PRIMARY KEY (platform, project_name)
        );
        CREATE TABLE IF NOT EXISTS snapshots (
            platform TEXT PRIMARY KEY,
            data_version INTEGER NOT NULL,
            fetched_at TEXT NOT NULL
        );
        "#,
    )
    .expect("create schema");

    let items = [
        ("alpha", "jan", "Compute Engine", "N1 core", "$100.00"),
        ("alpha", "feb", "Compute Engine", "N1 core", "50"),
        ("beta", "jan", "BigQuery", "Analysis", "25.5"),
    ];
    for (project, month, service, sku, cost) in items {
        conn.execute(
            "INSERT INTO line_items (platform, project_name, billing_year, billing_month,
                                     service_description, sku_description, cost)
             VALUES ('GCP', ?1, 2024, ?2, ?3, ?4, ?5)",
            rusqlite::params![project, month, service, sku, cost],
        )
        .expect("insert line item");
    }

    let meta = [
        ("alpha", "ALP", "prod", "ana", "core"),
        ("beta", "BET", "dev", "bo", "data"),
    ];
    for (project, code, env, owner, team) in meta {
        conn.execute(
            "INSERT INTO project_meta (platform, project_name, project_code, environment, owner, team)
             VALUES ('GCP', ?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![project, code, env, owner, team],
        )
        .expect("insert meta");
    }

    conn.execute(
        "INSERT INTO snapshots (platform, data_version, fetched_at)
         VALUES ('GCP', 1, '2024-03-01T00:00:00+00:00')",
        [],
    )
    .expect("insert snapshot");
}

fn seeded_home() -> TempDir {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());
    seed_snapshot(&home);
    home
}

#[test]
fn init_creates_config_and_data_paths() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["init"]);
    assert!(output.status.success());

    assert!(home.path().join("config").exists());
    assert!(home.path().join("data").exists());
    assert!(home.path().join("config").join("config.toml").exists());
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("temp home");

    assert!(run_cmd(&home, &["init"]).status.success());
    let first = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config after first init");

    assert!(run_cmd(&home, &["init"]).status.success());
    let second = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config after second init");

    assert_eq!(first, second);
}

#[test]
fn configure_persists_platform_and_year() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["configure", "--platform", "aws", "--year", "2023"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let saved = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config");
    assert!(saved.contains("platform = \"AWS\""));
    assert!(saved.contains("year = 2023"));
}

#[test]
fn configure_rejects_unknown_platform() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["configure", "--platform", "azure"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unsupported platform"));
}

#[test]
fn overview_csv_export_has_spacer_and_grand_total() {
    let home = seeded_home();
    let output = run_cmd(&home, &["export", "--platform", "GCP", "--year", "2024"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines[0],
        "Project Name,JAN,FEB,MAR,APR,MAY,JUN,JUL,AUG,SEP,OCT,NOV,DEC,Total"
    );
    assert_eq!(lines[1], "\"alpha\",100,50,0,0,0,0,0,0,0,0,0,0,150");
    assert_eq!(lines[2], "\"beta\",25.5,0,0,0,0,0,0,0,0,0,0,0,25.5");
    assert_eq!(lines[3], "");
    assert_eq!(lines[4], "\"Grand Total\",125.5,50,0,0,0,0,0,0,0,0,0,0,175.5");
}

#[test]
fn export_selection_by_code_limits_rows_and_total() {
    let home = seeded_home();
    let output = run_cmd(
        &home,
        &["export", "--kind", "detail", "--year", "2024", "--code", "BET"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    assert!(out.starts_with("Project Name,Project Code,Environment,Owner,Team,Service,SKU,Cost"));
    assert!(out.contains("\"beta\",\"BET\",\"dev\",\"bo\",\"data\",\"BigQuery\",\"Analysis\",25.5"));
    assert!(out.contains("\"beta\",\"BET\",\"dev\",\"bo\",\"data\",\"Subtotal\",,25.5"));
    assert!(out.contains("\"Grand Total\",,,,,,,25.5"));
    assert!(!out.contains("alpha"));
}

#[test]
fn detail_export_for_a_month_skips_projects_without_spend() {
    let home = seeded_home();
    let output = run_cmd(
        &home,
        &["export", "--kind", "detail", "--year", "2024", "--month", "feb"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    assert!(out.contains("\"alpha\",\"ALP\",\"prod\",\"ana\",\"core\",\"Compute Engine\",\"N1 core\",50"));
    assert!(!out.contains("beta"));
}

#[test]
fn report_export_groups_by_team() {
    let home = seeded_home();
    let output = run_cmd(
        &home,
        &["export", "--kind", "report", "--group-by", "team", "--year", "2024"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "Team,TotalCost");
    assert_eq!(lines[1], "\"core\",150");
    assert_eq!(lines[2], "\"data\",25.5");
    assert_eq!(lines[3], "\"Grand Total\",175.5");
}

#[test]
fn json_export_is_structured() {
    let home = seeded_home();
    let output = run_cmd(&home, &["export", "--format", "json", "--year", "2024"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    assert_eq!(parsed["file_stem"], "billing_overview_2024");
    assert_eq!(parsed["body"].as_array().expect("body").len(), 2);
    assert_eq!(parsed["foot"][0][13], 175.5);
}

#[test]
fn data_uri_export_escapes_csv() {
    let home = seeded_home();
    let output = run_cmd(&home, &["export", "--year", "2024", "--data-uri"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    assert!(out.starts_with("data:text/csv;charset=utf-8,Project%20Name,JAN"));
    assert!(out.contains("%22alpha%22,100,50"));
}

#[test]
fn data_uri_requires_csv() {
    let home = seeded_home();
    let output = run_cmd(
        &home,
        &["export", "--year", "2024", "--format", "json", "--data-uri"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--data-uri only applies to csv exports"));
}

#[test]
fn export_to_directory_uses_derived_file_name() {
    let home = seeded_home();
    let target = home.path().join("out");
    fs::create_dir_all(&target).expect("create output dir");

    let output = run_cmd(
        &home,
        &[
            "export",
            "--format",
            "pdf",
            "--year",
            "2024",
            "--output",
            target.to_str().expect("utf8 path"),
        ],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let written = fs::read_to_string(target.join("billing_overview_2024.txt")).expect("read export");
    assert!(written.starts_with("Monthly Billing Overview 2024"));
    assert!(written.contains("Grand Total"));
    assert!(written.contains("$175.50"));
}

#[test]
fn overview_prints_filtered_table() {
    let home = seeded_home();
    let output = run_cmd(
        &home,
        &["overview", "--year", "2024", "--environment", "prod"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    assert!(out.contains("alpha"));
    assert!(!out.contains("beta"));
    assert!(out.contains("$150.00"));
}

#[test]
fn export_without_snapshot_points_to_refresh() {
    let home = seeded_home();
    let output = run_cmd(&home, &["export", "--platform", "AWS", "--year", "2024"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No AWS billing snapshot yet"));
}

#[test]
fn export_rejects_unknown_kind() {
    let home = seeded_home();
    let output = run_cmd(&home, &["export", "--kind", "summary", "--year", "2024"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unsupported export kind"));
}

#[test]
fn budget_needs_a_stored_snapshot_for_actuals() {
    let home = seeded_home();
    let output = run_cmd(&home, &["budget", "--platform", "AWS", "--year", "2024"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No AWS billing snapshot yet"));
}

#[test]
fn budget_rejects_month_with_quarter() {
    let home = seeded_home();
    let output = run_cmd(
        &home,
        &["budget", "--year", "2024", "--month", "jan", "--quarter", "Q1"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Choose either --month or --quarter"));
}
