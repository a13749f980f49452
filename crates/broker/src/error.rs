//! HTTP error mapping.
//!
//! Handlers return `Result<T, AppError>`. Clients only ever see a short JSON
//! `{"error": "..."}` body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::query::QueryError;

/// Application-level error type for the broker's HTTP surface.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidId(e) => Self::BadRequest(e.to_string()),
            QueryError::NotFound(uid) => Self::NotFound(format!("order {uid}")),
        }
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::debug!(error = %self, "Request rejected");

        // The not-found detail may come from a store failure; keep it server-side.
        let message = match &self {
            Self::NotFound(_) => "order not found".to_string(),
            Self::BadRequest(msg) => msg.clone(),
        };

        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
