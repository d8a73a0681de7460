use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mirror_common::error::MirrorError;

use crate::jira::client::FetchError;

pub struct ApiError(pub MirrorError);

impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        Self(err)
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Self(MirrorError::Cancelled),
            other => Self(MirrorError::Upstream(other.to_string())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MirrorError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            MirrorError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            MirrorError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            MirrorError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            MirrorError::ReplicaUnavailable(_) | MirrorError::Cancelled => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
