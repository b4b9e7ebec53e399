use std::process::Command;

use tempfile::tempdir;

const LOAD_SQL: &str = "INSERT INTO stg SELECT * FROM raw; \
                        INSERT INTO mart SELECT * FROM stg JOIN dim ON stg.k = dim.k;";

const REPORT_SQL: &str = "SELECT * FROM mart;";

const PROCEDURES_SQL: &str = r#"
CREATE PROCEDURE fill_buffer() LANGUAGE plpgsql AS $$
BEGIN
    INSERT INTO buf SELECT * FROM src;
END;
$$;

CREATE PROCEDURE drain_buffer() LANGUAGE plpgsql AS $$
BEGIN
    INSERT INTO dst SELECT * FROM buf;
END;
$$;
"#;

fn sqldeps() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_sqldeps"));
    command.env_remove("RUST_LOG");
    command
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|err| panic!("invalid JSON ({err}): {stdout}"))
}

#[test]
fn test_tables_inline_sql_json() {
    let output = sqldeps()
        .args(["tables", "--sql", "INSERT INTO t SELECT * FROM s", "--json"])
        .output()
        .expect("run CLI");

    assert!(output.status.success());
    let report = stdout_json(&output);

    let edges = report["dependencies"]["t"].as_array().expect("edges for t");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["source"], "s");
    assert_eq!(edges[0]["operation"], "insert");
    assert_eq!(report["summary"]["errors"], 0);
}

#[test]
fn test_tables_directory_merges_files() {
    let dir = tempdir().expect("temp dir");
    std::fs::write(dir.path().join("load.sql"), LOAD_SQL).expect("write sql");
    std::fs::write(dir.path().join("report.sql"), REPORT_SQL).expect("write sql");
    std::fs::write(dir.path().join("README.md"), "not sql").expect("write md");

    let output = sqldeps()
        .args(["tables", "--dir", dir.path().to_str().expect("dir path"), "--json"])
        .output()
        .expect("run CLI");

    assert!(output.status.success());
    let report = stdout_json(&output);

    assert_eq!(report["summary"]["units_analyzed"], 2);
    assert!(report["dependencies"]["mart"].is_array());
    assert!(report["dependencies"]["result 0"].is_array());
}

#[test]
fn test_tables_operation_filter_and_output_file() {
    let dir = tempdir().expect("temp dir");
    let report_path = dir.path().join("report.json");

    let output = sqldeps()
        .args([
            "tables",
            "--sql",
            LOAD_SQL,
            "--operations",
            "join",
            "--output",
            report_path.to_str().expect("report path"),
        ])
        .output()
        .expect("run CLI");

    assert!(output.status.success());

    let written = std::fs::read_to_string(&report_path).expect("report written");
    let report: serde_json::Value = serde_json::from_str(&written).expect("valid JSON");
    let edges = report["dependencies"]["mart"].as_array().expect("edges for mart");

    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["source"], "dim");
    assert!(report["dependencies"].get("stg").is_none());
}

#[test]
fn test_fail_on_error_exit_code() {
    let output = sqldeps()
        .args(["tables", "--sql", "INSERT INTO WHERE SELECT FROM", "--fail-on-error"])
        .output()
        .expect("run CLI");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(1), "Expected exit 1, got: {stdout}");
    assert!(stdout.contains("SQL_PARSE_ERROR"), "Expected parse error: {stdout}");
}

#[test]
fn test_parse_error_without_flag_succeeds() {
    let output = sqldeps()
        .args(["tables", "--sql", "INSERT INTO WHERE SELECT FROM"])
        .output()
        .expect("run CLI");

    assert!(output.status.success());
}

#[test]
fn test_columns_json() {
    let output = sqldeps()
        .args([
            "columns",
            "--sql",
            "UPDATE accounts SET balance = s.amount FROM settlements s WHERE s.region = 'EU'",
            "--json",
        ])
        .output()
        .expect("run CLI");

    assert!(output.status.success());
    let report = stdout_json(&output);
    let columns = report["metadata"]["columns"].as_array().expect("column entries");

    assert!(columns.iter().any(|entry| {
        entry["edge"]["target"] == "accounts"
            && entry["target_columns"] == serde_json::json!(["balance:amount"])
            && entry["filter_columns"] == serde_json::json!(["region"])
    }));
}

#[test]
fn test_buffers_directory() {
    let dir = tempdir().expect("temp dir");
    std::fs::write(dir.path().join("procs.sql"), PROCEDURES_SQL).expect("write sql");

    let output = sqldeps()
        .args(["buffers", "--dir", dir.path().to_str().expect("dir path"), "--json"])
        .output()
        .expect("run CLI");

    assert!(output.status.success());
    let report = stdout_json(&output);

    assert_eq!(report["metadata"]["procedures"], 2);
    let tables = report["metadata"]["buffer_tables"].as_array().expect("buffer tables");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0]["name"], "buf");

    let buf_edges = report["dependencies"]["buf"].as_array().expect("edges for buf");
    assert!(buf_edges
        .iter()
        .any(|e| e["source"] == "$fill_buffer$" && e["operation"] == "buffer_write"));
}

#[test]
fn test_impact_downstream() {
    let output = sqldeps()
        .args(["impact", "raw", "--sql", LOAD_SQL])
        .output()
        .expect("run CLI");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "Expected exit 0: {stdout}");
    assert!(stdout.contains("stg"), "Expected stg: {stdout}");
    assert!(stdout.contains("mart"), "Expected mart: {stdout}");
}

#[test]
fn test_impact_unknown_entity_fails() {
    let output = sqldeps()
        .args(["impact", "nowhere", "--sql", LOAD_SQL])
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "Expected not found: {stderr}");
}

#[test]
fn test_config_file_dialect_and_overrides() {
    let dir = tempdir().expect("temp dir");
    let config_path = dir.path().join("sqldeps.toml");
    std::fs::write(
        &config_path,
        "dialects = [\"generic\"]\n\n[severity.overrides]\nUNSUPPORTED_STATEMENT = \"error\"\n",
    )
    .expect("write config");

    let output = sqldeps()
        .args([
            "--config",
            config_path.to_str().expect("config path"),
            "tables",
            "--sql",
            "GRANT SELECT ON t TO reader",
            "--json",
            "--fail-on-error",
        ])
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(1));
    let report = stdout_json(&output);
    assert_eq!(report["diagnostics"][0]["code"], "UNSUPPORTED_STATEMENT");
    assert_eq!(report["diagnostics"][0]["severity"], "error");
}
