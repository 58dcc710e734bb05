//! Conversational assistant abstraction.
//!
//! The service forwards a user's text into a conversation thread, lets a
//! configured assistant respond, and returns the reply text.

pub mod openai;

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

pub use openai::{OpenAiAssistant, OpenAiSettings};

/// The conversation a request talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub thread_id: String,
}

impl ConversationSession {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
        }
    }

    /// Thread ids become URL path segments, so only letters, digits, `_`
    /// and `-` are accepted.
    pub fn is_valid_thread_id(thread_id: &str) -> bool {
        !thread_id.is_empty()
            && thread_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

/// Lifecycle states of an assistant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// States in which the run will make no further progress on its own.
    /// `requires_action` counts because tool outputs are never submitted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::RequiresAction
                | RunStatus::Cancelled
                | RunStatus::Failed
                | RunStatus::Completed
                | RunStatus::Incomplete
                | RunStatus::Expired
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        };
        f.write_str(status)
    }
}

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Thread used when a request does not name one.
    fn default_session(&self) -> ConversationSession;

    /// Posts `message` to the session's thread and returns the assistant's reply.
    async fn reply(
        &self,
        session: &ConversationSession,
        message: &str,
    ) -> Result<String, ServiceError>;
}
