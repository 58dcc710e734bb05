#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use linkml_service::config::ServiceConfig;
use linkml_service::models::LintProblem;
use linkml_service::services::mock::{MockAssistant, MockGenerator, MockLinter};
use linkml_service::services::{Assistant, CodeGenerator, Dispatcher, SchemaLinter};
use linkml_service::startup::{build_router, AppState, Application};
use service_core::config::Config as CoreConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const MINIMAL_SCHEMA: &str = "name: my_schema\nid: https://example.org/my_schema\n";

pub const PERSONINFO_SCHEMA: &str = r#"id: https://w3id.org/linkml/examples/personinfo
name: personinfo
prefixes:
  linkml: https://w3id.org/linkml/
  personinfo: https://w3id.org/linkml/examples/personinfo/
imports:
  - linkml:types
default_range: string
classes:
  NamedThing:
    abstract: true
    slots:
      - id
      - name
  Person:
    is_a: NamedThing
    slots:
      - age_in_years
slots:
  id:
    identifier: true
  name:
  age_in_years:
    range: integer
"#;

pub fn config(vars: &[(&str, &str)]) -> ServiceConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let common = CoreConfig {
        port: 0,
        ..CoreConfig::default()
    };
    ServiceConfig::from_lookup(common, |key| vars.get(key).cloned())
        .expect("Failed to build test configuration")
}

/// A router over the given capabilities. Keep the returned directory alive
/// for as long as the router is used.
pub struct TestRouter {
    pub router: Router,
    pub scratch: TempDir,
}

impl TestRouter {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        linter: Arc<dyn SchemaLinter>,
        assistant: Result<Arc<dyn Assistant>, String>,
    ) -> Self {
        let scratch = tempfile::tempdir().expect("Failed to create scratch directory");
        let dispatcher = Dispatcher::new(generator, linter, assistant, scratch.path().to_path_buf());
        let state = AppState {
            config: config(&[]),
            dispatcher,
        };
        Self {
            router: build_router(state),
            scratch,
        }
    }

    pub fn with_mocks(problems: Vec<LintProblem>) -> Self {
        Self::new(
            Arc::new(MockGenerator),
            Arc::new(MockLinter::new(problems)),
            Ok(Arc::new(MockAssistant::new("thread_default", None))),
        )
    }

    pub async fn post(&self, uri: &str, body: impl Into<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(body.into())
                    .expect("Failed to build request"),
            )
            .await
            .expect("Failed to execute request")
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("Failed to parse JSON")
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let app = Application::build(config(&[("CAPABILITY_BACKEND", "mock")]))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        Self { address, port }
    }
}
