use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crm_storage::StorageError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    /// A remote rename that copied but could not remove the source.
    #[error("{0}")]
    PartialRename(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unauthorized(m) => AppError::Forbidden(m),
            StorageError::Validation(m) => AppError::BadRequest(m),
            StorageError::OutsideRoot(p) => {
                AppError::BadRequest(format!("path escapes storage root: {p}"))
            }
            StorageError::NotFound(m) => AppError::NotFound(format!("not found: {m}")),
            StorageError::NotEmpty(p) => AppError::Conflict(format!("directory is not empty: {p}")),
            e @ StorageError::PartialRename { .. } => AppError::PartialRename(e.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::PartialRename(m) => {
                tracing::error!("Partial rename: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
