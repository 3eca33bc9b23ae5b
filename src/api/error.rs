//! API error handling for consistent JSON error responses.

use crate::broadcast::{ControlError, SwitchError};
use crate::capture::CaptureError;
use crate::error::ErrorKind;
use crate::listener::{PlaybackError, StatusError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: Option<ErrorKind>,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: None,
            message: message.into(),
        }
    }

    /// Error carrying a domain kind; the HTTP status is derived from it.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: status_for(kind),
            kind: Some(kind),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::SwitchInFlight | ErrorKind::NotLive => StatusCode::CONFLICT,
        ErrorKind::Unsupported => StatusCode::BAD_REQUEST,
        ErrorKind::UserCancelled
        | ErrorKind::PermissionDenied
        | ErrorKind::NoAudioTrack
        | ErrorKind::ValidationFailed
        | ErrorKind::StreamBecameInactive
        | ErrorKind::TransportRejected
        | ErrorKind::AutoplayRejected => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::PlaybackNetworkError
        | ErrorKind::PlaybackDecodeError
        | ErrorKind::StatusFetchError => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "kind": self.kind.map(|k| k.as_str()),
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<SwitchError> for ApiError {
    fn from(err: SwitchError) -> Self {
        Self::from_kind(err.kind(), err.user_message())
    }
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        Self::from_kind(err.kind(), err.user_message())
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}

impl From<PlaybackError> for ApiError {
    fn from(err: PlaybackError) -> Self {
        Self::from_kind(err.kind(), err.user_message())
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        Self::from_kind(err.kind(), err.user_message())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_errors_map_to_statuses() {
        let busy: ApiError = SwitchError::AlreadyInFlight.into();
        assert_eq!(busy.status(), StatusCode::CONFLICT);
        assert_eq!(busy.kind(), Some(ErrorKind::SwitchInFlight));

        let rejected: ApiError = SwitchError::TransportRejected("no peer".into()).into();
        assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_plain_errors_have_no_kind() {
        let err = ApiError::bad_request("missing field");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.kind().is_none());

        let err: ApiError = anyhow::anyhow!("boom").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_denied_capture_keeps_its_own_kind() {
        let err: ApiError = SwitchError::Negotiation(CaptureError::PermissionDenied).into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.kind(), Some(ErrorKind::PermissionDenied));

        let ended: ApiError = SwitchError::BroadcastEnded.into();
        assert_eq!(ended.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_not_live_is_conflict() {
        let err: ApiError = ControlError::NotLive.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
