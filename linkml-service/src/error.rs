//! Error taxonomy for the schema service and its mapping onto HTTP.

use crate::services::assistant::RunStatus;
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external collaborator (generator, linter, assistant API).
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{tool} could not be started: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {} seconds", .timeout.as_secs())]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} produced unreadable output: {reason}")]
    MalformedOutput { tool: String, reason: String },

    #[error("Scratch storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream request failed: {0}")]
    Network(String),

    #[error("Upstream API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl CapabilityError {
    /// Transient failures worth another attempt; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            CapabilityError::Timeout { .. } | CapabilityError::Network(_) => true,
            CapabilityError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        CapabilityError::Network(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid YAML: {0}")]
    InvalidDocument(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("{0}")]
    ConfigurationMissing(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Assistant run {run_id} ended with status `{status}`: {detail}")]
    RunOutcome {
        run_id: String,
        status: RunStatus,
        detail: String,
    },
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidDocument(_) | ServiceError::InvalidSchema(_) => {
                AppError::UnprocessableEntity(err.to_string())
            }
            ServiceError::ConfigurationMissing(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            ServiceError::Capability(err) => match err {
                CapabilityError::Timeout { .. } => AppError::GatewayTimeout(err.to_string()),
                CapabilityError::Network(_) | CapabilityError::Api { .. } => {
                    AppError::BadGateway(err.to_string())
                }
                other => AppError::InternalError(anyhow::Error::new(other)),
            },
            ServiceError::RunOutcome { .. } => AppError::BadGateway(err.to_string()),
        }
    }
}
