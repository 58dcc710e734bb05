//! Schema linting through an external lint engine.

use crate::error::CapabilityError;
use crate::models::{LintLevel, LintProblem};
use crate::services::executor::{failed, CommandExecutor, ToolCommand};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// Evaluates lint rules against a schema file on disk.
#[async_trait]
pub trait SchemaLinter: Send + Sync {
    /// Findings in the order the engine reported them.
    async fn lint(&self, schema_file: &Path) -> Result<Vec<LintProblem>, CapabilityError>;
}

/// Runs a linter such as `linkml-lint --format json` and reads its JSON report
/// from stdout.
///
/// Lint tools signal findings through their exit code, so a non-zero exit is
/// only a failure when stdout does not hold a report.
pub struct CommandLinter {
    tool: ToolCommand,
    executor: CommandExecutor,
}

impl CommandLinter {
    pub fn new(tool: ToolCommand, executor: CommandExecutor) -> Self {
        Self { tool, executor }
    }
}

#[async_trait]
impl SchemaLinter for CommandLinter {
    async fn lint(&self, schema_file: &Path) -> Result<Vec<LintProblem>, CapabilityError> {
        let output = self.executor.run(&self.tool, schema_file).await?;

        let printed_report = !output.stdout.iter().all(u8::is_ascii_whitespace);
        if !printed_report && !output.status.success() {
            return Err(failed(&self.tool, &output));
        }

        match parse_report(&output.stdout) {
            Ok(problems) => {
                tracing::debug!(
                    program = %self.tool.program,
                    problems = problems.len(),
                    "Lint report parsed"
                );
                Ok(problems)
            }
            Err(_) if !output.status.success() => Err(failed(&self.tool, &output)),
            Err(reason) => Err(CapabilityError::MalformedOutput {
                tool: self.tool.program.clone(),
                reason,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProblem {
    #[serde(alias = "rule")]
    rule_name: String,
    level: String,
    message: String,
    #[serde(default)]
    schema_name: Option<String>,
}

impl From<RawProblem> for LintProblem {
    fn from(raw: RawProblem) -> Self {
        let level = match raw.level.to_ascii_lowercase().as_str() {
            "error" => LintLevel::Error,
            "warning" => LintLevel::Warning,
            _ => LintLevel::Info,
        };
        LintProblem {
            rule_name: raw.rule_name,
            level,
            message: raw.message,
            schema_name: raw.schema_name,
        }
    }
}

/// Parses the engine's JSON array; empty output means a clean schema.
pub fn parse_report(stdout: &[u8]) -> Result<Vec<LintProblem>, String> {
    let text = std::str::from_utf8(stdout).map_err(|e| e.to_string())?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<RawProblem> = serde_json::from_str(text).map_err(|e| e.to_string())?;
    Ok(raw.into_iter().map(LintProblem::from).collect())
}
