//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use roomcast_core::{AuthError, PersistenceError};
use serde_json::json;
use tracing::{error, warn};

/// Errors surfaced by the HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401.
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    /// 400.
    #[error("{0}")]
    BadRequest(String),
    /// 404.
    #[error("{0}")]
    NotFound(String),
    /// 500; the message is logged, not returned.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::NotFound(what) => Self::NotFound(format!("not found: {what}")),
            PersistenceError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(msg) => error!(error = %msg, "request failed"),
            Self::Unauthorized(e) => warn!(error_kind = e.error_kind(), "unauthorized request"),
            _ => {}
        }
        // Internal details stay in the log.
        let message = match &self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn auth_errors_are_401() {
        let (status, body) = body_of(AuthError::MissingToken.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing token");
    }

    #[tokio::test]
    async fn persistence_errors_map_to_status() {
        let (status, _) = body_of(PersistenceError::NotFound("room 4".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = body_of(PersistenceError::Backend("disk I/O error".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal error");
    }

    #[tokio::test]
    async fn bad_request_keeps_message() {
        let (status, body) = body_of(ApiError::BadRequest("roomId is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "roomId is required");
    }
}
