//! Maps domain errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::{error, warn};

use chatloom_core::{ChatError, ErrorKind};

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ConversationEnded => StatusCode::CONFLICT,
        ErrorKind::Provider => StatusCode::BAD_GATEWAY,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Storage | ErrorKind::Cancelled | ErrorKind::SinkClosed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::Validation => "validation",
        ErrorKind::ConversationEnded => "conversation_ended",
        ErrorKind::Provider => "provider",
        ErrorKind::Storage => "storage",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::TimedOut => "timed_out",
        ErrorKind::SinkClosed => "sink_closed",
    }
}

/// JSON body shared by error responses and SSE `error` events.
pub fn error_body(err: &ChatError) -> serde_json::Value {
    json!({
        "error": err.to_string(),
        "kind": kind_name(err.kind()),
    })
}

pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            error!(error = %self.0, status = %status, "Request failed");
        } else {
            warn!(error = %self.0, status = %status, "Request rejected");
        }
        (status, Json(error_body(&self.0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_through_context() {
        let err = ChatError::NotFound("c1".into()).context("fetching conversation");
        assert_eq!(status_for(err.kind()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ChatError::ConversationEnded("c1".into()).kind()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(ChatError::provider("openai", "429").kind()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(ChatError::TimedOut(std::time::Duration::from_secs(1)).kind()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(ChatError::storage("disk").kind()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn body_carries_kind() {
        let body = error_body(&ChatError::Validation("user id is empty".into()));
        assert_eq!(body["kind"], "validation");
        assert!(body["error"].as_str().unwrap().contains("user id is empty"));
    }
}
