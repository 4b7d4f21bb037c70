use crate::services::name_validator::InvalidName;
use crate::services::slot_store::SlotError;
use crate::services::staging::StagingError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<InvalidName> for AppError {
    fn from(e: InvalidName) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<SlotError> for AppError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::InvalidName(e) => e.into(),
            SlotError::NotFound(_) => AppError::NotFound("Image not found".to_string()),
            SlotError::UnsupportedContentType(e) => AppError::BadRequest(e.to_string()),
            SlotError::Staging(StagingError::TooLarge { limit }) => {
                AppError::PayloadTooLarge(format!("File exceeds the upload limit of {limit} bytes"))
            }
            SlotError::Staging(StagingError::Stream(e))
                if e.to_string().contains("length limit exceeded") =>
            {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            }
            other => AppError::Internal(format!("{}: {}", other.code(), other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
