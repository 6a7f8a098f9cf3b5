use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Admission error types
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Unknown policy preset: {0}")]
    UnknownPreset(String),

    #[error("Counter store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdmissionError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::InvalidPolicy(_) => StatusCode::BAD_REQUEST,
            AdmissionError::UnknownPreset(_) => StatusCode::BAD_REQUEST,
            AdmissionError::Config(_)
            | AdmissionError::Store(_)
            | AdmissionError::Internal(_)
            | AdmissionError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs, never in the body
        let message = if status.is_server_error() {
            "Internal server error.".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
