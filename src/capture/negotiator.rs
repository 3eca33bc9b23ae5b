//! Capture Negotiator.
//!
//! Wraps the platform's display/system-audio capture prompt and turns its
//! outcome into either an owned `CaptureSource` or a typed `CaptureError`.
//! The negotiator never hands out the same stream twice: every successful
//! `acquire()` is a fresh capture grant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{AudioTrack, SharedStream, StreamId};
use crate::error::ErrorKind;

/// Which capture path a source came from.
///
/// Only desktop audio has a defined negotiation contract; microphone and
/// mixed capture are not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceId {
    Desktop,
}

impl AudioSourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioSourceId::Desktop => "desktop",
        }
    }
}

impl fmt::Display for AudioSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioSourceId {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "desktop" => Ok(AudioSourceId::Desktop),
            _ => Err(CaptureError::Unsupported),
        }
    }
}

/// What the caller is asking the platform for.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub source: AudioSourceId,
}

/// Raw outcome of the platform prompt, before validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("capture prompt dismissed by user")]
    Cancelled,
    #[error("capture permission denied")]
    Denied,
    #[error("capture not supported on this platform")]
    Unsupported,
    #[error("capture failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture was cancelled")]
    UserCancelled,
    #[error("audio capture is not supported here")]
    Unsupported,
    #[error("the shared source has no audio track")]
    NoAudioTrack,
    #[error("permission to capture audio was denied")]
    PermissionDenied,
    #[error("capture failed: {0}")]
    Platform(String),
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::UserCancelled => ErrorKind::UserCancelled,
            CaptureError::PermissionDenied => ErrorKind::PermissionDenied,
            CaptureError::Unsupported | CaptureError::Platform(_) => ErrorKind::Unsupported,
            CaptureError::NoAudioTrack => ErrorKind::NoAudioTrack,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            CaptureError::UserCancelled => "Capture cancelled.".to_string(),
            CaptureError::Unsupported => {
                "Desktop audio capture is not supported on this system.".to_string()
            }
            CaptureError::NoAudioTrack => {
                "The selected source has no audio. Share a source that is playing sound."
                    .to_string()
            }
            CaptureError::PermissionDenied => {
                "Permission to capture audio was denied.".to_string()
            }
            CaptureError::Platform(msg) => format!("Desktop audio capture failed: {msg}"),
        }
    }
}

impl From<PromptError> for CaptureError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Cancelled => CaptureError::UserCancelled,
            PromptError::Denied => CaptureError::PermissionDenied,
            PromptError::Unsupported => CaptureError::Unsupported,
            PromptError::Failed(msg) => CaptureError::Platform(msg),
        }
    }
}

/// Platform capture API: "prompt for audio-bearing media".
#[async_trait]
pub trait DisplayCapture: Send + Sync {
    /// Whether the capability exists at all (secure context, API present).
    fn is_supported(&self) -> bool;

    async fn prompt(&self, request: &CaptureRequest) -> Result<SharedStream, PromptError>;
}

/// An acquired capture grant with exclusive ownership semantics.
///
/// Dropping a `CaptureSource` stops all of its tracks, so every exit path of
/// a switch attempt releases the grant without explicit cleanup.
pub struct CaptureSource {
    id: AudioSourceId,
    stream: SharedStream,
    tracks: Vec<AudioTrack>,
    acquired_at: DateTime<Utc>,
}

impl CaptureSource {
    pub fn new(id: AudioSourceId, stream: SharedStream) -> Self {
        let tracks = stream.tracks();
        Self {
            id,
            stream,
            tracks,
            acquired_at: Utc::now(),
        }
    }

    pub fn id(&self) -> AudioSourceId {
        self.id
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream.id()
    }

    /// Shared handle for readers (level monitor, transport).
    pub fn stream(&self) -> SharedStream {
        Arc::clone(&self.stream)
    }

    /// Tracks as they were at acquisition time.
    pub fn tracks_at_acquire(&self) -> &[AudioTrack] {
        &self.tracks
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// At least one enabled audio track is still live.
    pub fn is_live(&self) -> bool {
        self.stream.has_live_audio()
    }

    /// First live audio track, if any.
    pub fn primary_track(&self) -> Option<AudioTrack> {
        self.stream.tracks().into_iter().find(AudioTrack::is_live_audio)
    }
}

impl fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSource")
            .field("id", &self.id)
            .field("stream", &self.stream.id())
            .field("tracks", &self.tracks)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        debug!("Releasing capture source {} ({})", self.id, self.stream.id());
        self.stream.stop();
    }
}

pub struct CaptureNegotiator {
    platform: Arc<dyn DisplayCapture>,
}

impl CaptureNegotiator {
    pub fn new(platform: Arc<dyn DisplayCapture>) -> Self {
        Self { platform }
    }

    pub fn is_supported(&self) -> bool {
        self.platform.is_supported()
    }

    /// Acquire a new audio-bearing source.
    pub async fn acquire(&self, source: AudioSourceId) -> Result<CaptureSource, CaptureError> {
        if !self.platform.is_supported() {
            warn!("CaptureNegotiator: capture unsupported, not prompting");
            return Err(CaptureError::Unsupported);
        }

        let request = CaptureRequest { source };
        let stream = self.platform.prompt(&request).await.map_err(|e| {
            info!("CaptureNegotiator: prompt for {} failed: {}", source, e);
            CaptureError::from(e)
        })?;

        let audio_count = stream.audio_tracks().len();
        if audio_count == 0 {
            // Video-only share: release the grant right away.
            warn!("CaptureNegotiator: {} has no audio tracks, releasing", stream.id());
            stream.stop();
            return Err(CaptureError::NoAudioTrack);
        }

        info!(
            "CaptureNegotiator: acquired {} for {} with {} audio track(s)",
            stream.id(),
            source,
            audio_count
        );
        Ok(CaptureSource::new(source, stream))
    }
}
