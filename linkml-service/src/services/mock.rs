//! In-process capability implementations for local runs and tests.

use super::assistant::{Assistant, ConversationSession};
use super::generator::CodeGenerator;
use super::linter::SchemaLinter;
use crate::error::{CapabilityError, ServiceError};
use crate::models::{LintProblem, SchemaDefinition};
use async_trait::async_trait;
use std::path::Path;

/// Emits a Pydantic-style module with one model per class, in schema order.
pub struct MockGenerator;

#[async_trait]
impl CodeGenerator for MockGenerator {
    async fn generate(&self, schema: &SchemaDefinition) -> Result<String, CapabilityError> {
        let mut source = format!(
            "# Generated from schema {} ({})\nfrom pydantic import BaseModel\n",
            schema.name, schema.id
        );
        for (name, class) in &schema.classes {
            let parent = class.is_a.as_deref().unwrap_or("BaseModel");
            source.push_str(&format!("\n\nclass {}({}):\n", name, parent));
            if class.slots.is_empty() && class.attributes.is_empty() {
                source.push_str("    pass\n");
            }
            for slot in class.slots.iter().chain(class.attributes.keys()) {
                source.push_str(&format!("    {}: object = None\n", slot));
            }
        }
        Ok(source)
    }
}

/// Returns a fixed list of findings for every schema.
pub struct MockLinter {
    problems: Vec<LintProblem>,
}

impl MockLinter {
    pub fn new(problems: Vec<LintProblem>) -> Self {
        Self { problems }
    }
}

#[async_trait]
impl SchemaLinter for MockLinter {
    async fn lint(&self, schema_file: &Path) -> Result<Vec<LintProblem>, CapabilityError> {
        // Catch callers that skipped materializing the schema.
        tokio::fs::metadata(schema_file).await?;
        Ok(self.problems.clone())
    }
}

/// Answers with a configured reply, or echoes the message when none is set.
pub struct MockAssistant {
    thread_id: String,
    reply: Option<String>,
}

impl MockAssistant {
    pub fn new(thread_id: impl Into<String>, reply: Option<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            reply,
        }
    }
}

#[async_trait]
impl Assistant for MockAssistant {
    fn default_session(&self) -> ConversationSession {
        ConversationSession::new(self.thread_id.clone())
    }

    async fn reply(
        &self,
        session: &ConversationSession,
        message: &str,
    ) -> Result<String, ServiceError> {
        Ok(self
            .reply
            .clone()
            .unwrap_or_else(|| format!("[{}] {}", session.thread_id, message)))
    }
}
