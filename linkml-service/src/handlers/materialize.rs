//! Turns an `OperationResult` into an HTTP response without touching the
//! payload bytes.

use crate::models::OperationResult;
use crate::services::{render_report, ReportFormat};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

pub const GENERATED_FILE_NAME: &str = "pydantic_model.py";
const TEXT_MEDIA_TYPE: &str = "text/plain; charset=utf-8";

/// How generated source reaches the client. Reports are always attachments
/// and assistant replies are always inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Attachment,
    Inline,
}

/// A file download with a fixed name.
pub struct Download {
    pub bytes: Vec<u8>,
    pub filename: &'static str,
    pub media_type: &'static str,
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, self.media_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", self.filename),
                ),
            ],
            self.bytes,
        )
            .into_response()
    }
}

pub struct InlineText(pub String);

impl IntoResponse for InlineText {
    fn into_response(self) -> Response {
        (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_MEDIA_TYPE)], self.0).into_response()
    }
}

pub fn materialize(
    result: OperationResult,
    delivery: Delivery,
    format: ReportFormat,
) -> Result<Response, AppError> {
    let response = match result {
        OperationResult::GeneratedSource(source) => match delivery {
            Delivery::Attachment => Download {
                bytes: source.into_bytes(),
                filename: GENERATED_FILE_NAME,
                media_type: "application/octet-stream",
            }
            .into_response(),
            Delivery::Inline => InlineText(source).into_response(),
        },
        OperationResult::ProblemReport(problems) => {
            let bytes = render_report(&problems, format)?;
            Download {
                bytes,
                filename: format.file_name(),
                media_type: format.media_type(),
            }
            .into_response()
        }
        OperationResult::AssistantReply(reply) => InlineText(reply).into_response(),
    };
    Ok(response)
}
