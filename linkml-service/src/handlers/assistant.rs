use super::materialize::{materialize, Delivery};
use crate::error::ServiceError;
use crate::services::{ConversationSession, ReportFormat};
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct AssistantParams {
    /// Conversation to post into instead of the configured default thread.
    pub thread_id: Option<String>,
}

/// `POST /api/openai/generate`: forwards the body to the assistant and returns
/// its reply as text.
pub async fn forward_to_assistant(
    State(state): State<AppState>,
    Query(params): Query<AssistantParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    let text = String::from_utf8(body.to_vec())
        .map_err(|e| ServiceError::InvalidDocument(format!("request body is not UTF-8: {}", e)))?;

    let thread_id = params.thread_id.filter(|t| !t.trim().is_empty());
    if let Some(thread_id) = &thread_id {
        if !ConversationSession::is_valid_thread_id(thread_id) {
            return Err(ServiceError::InvalidDocument(format!(
                "thread_id `{}` may only contain letters, digits, `_` and `-`",
                thread_id
            ))
            .into());
        }
    }
    let result = state.dispatcher.ask(thread_id, &text).await?;
    materialize(result, Delivery::Inline, ReportFormat::default())
}
