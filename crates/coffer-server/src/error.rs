use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coffer_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The path escapes its storage root.
    #[error("Access denied")]
    AccessDenied,

    #[error("Missing {0}")]
    MissingParam(&'static str),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidPath(_) => ServerError::AccessDenied,
            StoreError::AttachmentMissingOnDisk(path) => ServerError::NotFound(path),
            StoreError::Shared(e) => ServerError::BadRequest(e.to_string()),
            other => ServerError::Store(other),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::AccessDenied => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::MissingParam(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ServerError::Store(e) => {
                tracing::error!(error = %e, "attachment read failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
