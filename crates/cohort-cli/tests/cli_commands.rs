//! Integration tests for the cohort-cli commands.
//!
//! These exercise the same code paths as the binary, using temporary
//! declaration documents and databases for isolation.

use std::io::Write;

use cohort_cli::commands;

const VALID_CONFIG: &str = r#"
agents:
  - name: fetcher
    role: "Data Retrieval Specialist"
    priority: 1
  - name: responder
    role: "Communication Expert"
    priority: 2
workflows:
  - name: default
    steps:
      - name: fetch
        agent: fetcher
      - name: respond
        agent: responder
        dependencies: [fetch]
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[tokio::test]
async fn test_validate_accepts_valid_document() {
    let config = write_config(VALID_CONFIG);
    let result = commands::validate::run(config.path().to_str().unwrap()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_validate_rejects_unknown_agent() {
    let config = write_config(
        r#"
agents:
  - name: fetcher
    role: r
workflows:
  - name: default
    steps:
      - name: fetch
        agent: missing
"#,
    );
    let err = commands::validate::run(config.path().to_str().unwrap())
        .await
        .unwrap_err();
    assert!(err.contains("unknown agent 'missing'"));
}

#[tokio::test]
async fn test_order_prints_for_known_workflow() {
    let config = write_config(VALID_CONFIG);
    let path = config.path().to_str().unwrap().to_string();
    assert!(commands::order::run(&path, "default").await.is_ok());
    assert!(commands::order::run(&path, "missing").await.is_err());
}

#[tokio::test]
async fn test_status_reports_missing_task() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("cohort.db");
    let err = commands::status::run("no-such-task", db_path.to_str().unwrap(), false)
        .await
        .unwrap_err();
    assert!(err.contains("no-such-task"));
}
