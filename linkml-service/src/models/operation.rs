use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity reported by the lint engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintLevel {
    Error,
    Warning,
    Info,
}

impl fmt::Display for LintLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LintLevel::Error => "error",
            LintLevel::Warning => "warning",
            LintLevel::Info => "info",
        };
        f.write_str(level)
    }
}

/// A single rule violation found in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintProblem {
    pub rule_name: String,
    pub level: LintLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
}

/// The outcome of exactly one capability invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    GeneratedSource(String),
    ProblemReport(Vec<LintProblem>),
    AssistantReply(String),
}
