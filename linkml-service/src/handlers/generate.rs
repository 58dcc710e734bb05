use super::materialize::{materialize, Delivery};
use crate::models::{parse_document, SchemaDefinition};
use crate::services::ReportFormat;
use crate::startup::AppState;
use axum::{body::Bytes, extract::State, response::Response};
use service_core::error::AppError;

/// `POST /gen-pydantic/`: generated models as a `pydantic_model.py` download.
pub async fn generate_download(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    generate(&state, &body, Delivery::Attachment).await
}

/// `POST /api/gen-pydantic/`: generated models as the response body.
pub async fn generate_inline(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    generate(&state, &body, Delivery::Inline).await
}

async fn generate(state: &AppState, body: &[u8], delivery: Delivery) -> Result<Response, AppError> {
    let document = parse_document(body)?;
    let schema = SchemaDefinition::from_document(document)?;
    tracing::debug!(schema = %schema.name, classes = schema.classes.len(), "Schema accepted for generation");

    let result = state.dispatcher.generate(&schema).await?;
    materialize(result, delivery, ReportFormat::default())
}
