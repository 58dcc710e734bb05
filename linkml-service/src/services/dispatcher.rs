//! One operation per capability, each wrapped with logging and metrics.
//!
//! The dispatcher is the only component that talks to the external
//! collaborators; handlers see nothing but `OperationResult`s and
//! `ServiceError`s.

use super::assistant::{Assistant, ConversationSession};
use super::generator::CodeGenerator;
use super::linter::SchemaLinter;
use super::scratch::ScratchSpace;
use crate::error::ServiceError;
use crate::models::{OperationResult, SchemaDefinition};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct Dispatcher {
    generator: Arc<dyn CodeGenerator>,
    linter: Arc<dyn SchemaLinter>,
    assistant: Result<Arc<dyn Assistant>, String>,
    scratch_root: PathBuf,
}

impl Dispatcher {
    /// `assistant` is either a ready client or the reason none could be
    /// configured; the reason is reported to callers of `ask`.
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        linter: Arc<dyn SchemaLinter>,
        assistant: Result<Arc<dyn Assistant>, String>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            generator,
            linter,
            assistant,
            scratch_root,
        }
    }

    pub fn assistant_configured(&self) -> bool {
        self.assistant.is_ok()
    }

    pub async fn generate(&self, schema: &SchemaDefinition) -> Result<OperationResult, ServiceError> {
        instrumented("generate", async {
            let source = self.generator.generate(schema).await?;
            tracing::info!(schema = %schema.name, bytes = source.len(), "Model source generated");
            Ok::<_, ServiceError>(OperationResult::GeneratedSource(source))
        })
        .await
    }

    pub async fn validate(&self, schema: &SchemaDefinition) -> Result<OperationResult, ServiceError> {
        instrumented("validate", async {
            let scratch = ScratchSpace::create_in(&self.scratch_root).await?;
            let schema_file = scratch.write_schema(schema).await?;

            let problems = self.linter.lint(&schema_file).await?;
            tracing::info!(schema = %schema.name, problems = problems.len(), "Schema linted");
            Ok::<_, ServiceError>(OperationResult::ProblemReport(problems))
        })
        .await
    }

    /// Sends `text` to the assistant, on `thread_id` when given, otherwise
    /// on the configured default thread.
    pub async fn ask(
        &self,
        thread_id: Option<String>,
        text: &str,
    ) -> Result<OperationResult, ServiceError> {
        instrumented("assistant", async {
            let assistant = self
                .assistant
                .as_ref()
                .map_err(|reason| ServiceError::ConfigurationMissing(reason.clone()))?;

            let session = thread_id
                .map(ConversationSession::new)
                .unwrap_or_else(|| assistant.default_session());

            let reply = assistant.reply(&session, text).await?;
            tracing::info!(thread_id = %session.thread_id, bytes = reply.len(), "Assistant replied");
            Ok::<_, ServiceError>(OperationResult::AssistantReply(reply))
        })
        .await
    }
}

async fn instrumented<F>(capability: &'static str, operation: F) -> Result<OperationResult, ServiceError>
where
    F: Future<Output = Result<OperationResult, ServiceError>>,
{
    let start = Instant::now();
    let result = operation.await;
    let elapsed = start.elapsed().as_secs_f64();

    let outcome = match &result {
        Ok(_) => "success",
        Err(ServiceError::InvalidDocument(_) | ServiceError::InvalidSchema(_)) => "rejected",
        Err(ServiceError::ConfigurationMissing(_)) => "unconfigured",
        Err(ServiceError::Capability(_) | ServiceError::RunOutcome { .. }) => "failure",
    };
    if let Err(e) = &result {
        tracing::warn!(capability, error = %e, "Capability call failed");
    }

    metrics::counter!("capability_requests_total", "capability" => capability, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("capability_duration_seconds", "capability" => capability).record(elapsed);

    result
}
