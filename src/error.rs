use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// A single out-of-range or missing request field.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request")]
    Validation(Vec<FieldViolation>),
    #[error("model loading failed: {0}")]
    Load(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("image generation failed: {0}")]
    Inference(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Load(_)
            | ServiceError::Tokenizer(_)
            | ServiceError::Inference(_)
            | ServiceError::Encode(_)
            | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            ServiceError::Validation(violations) => serde_json::json!({
                "error": self.to_string(),
                "details": violations,
            }),
            _ => serde_json::json!({
                "error": self.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}
