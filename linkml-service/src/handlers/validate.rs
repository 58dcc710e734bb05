use super::materialize::{materialize, Delivery};
use crate::models::{parse_document, SchemaDefinition};
use crate::services::ReportFormat;
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct ValidateParams {
    #[serde(default)]
    pub format: ReportFormat,
}

/// `POST /api/validate-linkml/`: lint findings as a report download.
pub async fn validate_schema(
    State(state): State<AppState>,
    Query(params): Query<ValidateParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    let document = parse_document(&body)?;
    let schema = SchemaDefinition::from_document(document)?;

    let result = state.dispatcher.validate(&schema).await?;
    materialize(result, Delivery::Attachment, params.format)
}
