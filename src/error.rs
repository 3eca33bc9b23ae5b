//! Error taxonomy shared by every component.
//!
//! Each domain error (`CaptureError`, `SwitchError`, `PlaybackError`,
//! `StatusError`, `ControlError`) reports one of these kinds so callers can
//! branch on the category without matching every variant.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UserCancelled,
    PermissionDenied,
    Unsupported,
    NoAudioTrack,
    ValidationFailed,
    TransportRejected,
    StreamBecameInactive,
    SwitchInFlight,
    NotLive,
    PlaybackNetworkError,
    PlaybackDecodeError,
    AutoplayRejected,
    StatusFetchError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UserCancelled => "user_cancelled",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::NoAudioTrack => "no_audio_track",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::TransportRejected => "transport_rejected",
            ErrorKind::StreamBecameInactive => "stream_became_inactive",
            ErrorKind::SwitchInFlight => "switch_in_flight",
            ErrorKind::NotLive => "not_live",
            ErrorKind::PlaybackNetworkError => "playback_network_error",
            ErrorKind::PlaybackDecodeError => "playback_decode_error",
            ErrorKind::AutoplayRejected => "autoplay_rejected",
            ErrorKind::StatusFetchError => "status_fetch_error",
        }
    }
}
