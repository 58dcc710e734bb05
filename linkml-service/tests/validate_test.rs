mod common;

use axum::http::{header, StatusCode};
use common::{body_bytes, body_json, TestRouter, MINIMAL_SCHEMA, PERSONINFO_SCHEMA};
use linkml_service::models::{LintLevel, LintProblem};

fn tree_root_problem() -> LintProblem {
    LintProblem {
        rule_name: "tree_root_class".to_string(),
        level: LintLevel::Error,
        message: "Schema does not have class with `tree_root: true`".to_string(),
        schema_name: Some("personinfo".to_string()),
    }
}

#[tokio::test]
async fn lint_findings_are_reported_by_rule() {
    let app = TestRouter::with_mocks(vec![tree_root_problem()]);

    let response = app.post("/api/validate-linkml/", PERSONINFO_SCHEMA).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"validation_report.json\""
    );

    let report = body_json(response).await;
    let findings = report.as_array().unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0]["rule_name"], "tree_root_class");
    assert_eq!(findings[0]["level"], "error");
}

#[tokio::test]
async fn clean_schema_yields_empty_report() {
    let app = TestRouter::with_mocks(Vec::new());

    let response = app.post("/api/validate-linkml", MINIMAL_SCHEMA).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"[]\n");
}

#[tokio::test]
async fn invalid_document_is_not_linted() {
    let app = TestRouter::with_mocks(vec![tree_root_problem()]);

    let response = app.post("/api/validate-linkml/", "- just\n- a list\n").await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().starts_with("Invalid YAML"));
}

#[tokio::test]
async fn tsv_format_is_offered() {
    let app = TestRouter::with_mocks(vec![tree_root_problem()]);

    let response = app.post("/api/validate-linkml/?format=tsv", PERSONINFO_SCHEMA).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"validation_report.tsv\""
    );
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("error\tpersoninfo\ttree_root_class\t"));
}

#[cfg(unix)]
#[tokio::test]
async fn command_linter_report_flows_through() {
    use linkml_service::services::mock::{MockAssistant, MockGenerator};
    use linkml_service::services::{CommandExecutor, CommandLinter, ToolCommand};
    use std::sync::Arc;
    use std::time::Duration;

    // Reads the schema it was handed, like a real lint engine would.
    let script = r#"grep -q 'name: personinfo' "$0" || exit 9
echo '[{"level":"warning","schema_name":"personinfo","rule_name":"standard_naming","message":"Slot has name age_in_years"}]'
exit 1"#;
    let linter = CommandLinter::new(
        ToolCommand::new("sh", vec!["-c".into(), script.into()]),
        CommandExecutor::new(Duration::from_secs(5)),
    );
    let app = TestRouter::new(
        Arc::new(MockGenerator),
        Arc::new(linter),
        Ok(Arc::new(MockAssistant::new("t", None))),
    );

    let response = app.post("/api/validate-linkml/", PERSONINFO_SCHEMA).await;

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report[0]["rule_name"], "standard_naming");
    assert_eq!(std::fs::read_dir(app.scratch.path()).unwrap().count(), 0);
}
