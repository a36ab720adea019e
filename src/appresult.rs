use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

/// Handler error. Wraps anything convertible into `anyhow::Error`; an
/// [`ApiError`] somewhere in the chain picks the status code.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

/// Failures that map onto a specific HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.downcast_ref::<ApiError>() {
            Some(api) => (api.status(), api.to_string()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
