//! Media stream handle abstraction for captured audio.
//!
//! A `MediaStream` is what a capture grant hands back: a set of tracks plus a
//! way to read the signal. The handle is shared (`Arc`) between the owner of
//! the grant, the level monitor and the outbound transport, but only the
//! owner ever stops it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one capture grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct StreamId(u64);

impl StreamId {
    pub fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Live,
    Ended,
}

/// Read-only view of one track of a media stream.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AudioTrack {
    pub label: String,
    pub kind: TrackKind,
    pub enabled: bool,
    pub ready_state: ReadyState,
}

impl AudioTrack {
    pub fn audio(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: TrackKind::Audio,
            enabled: true,
            ready_state: ReadyState::Live,
        }
    }

    pub fn video(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: TrackKind::Video,
            enabled: true,
            ready_state: ReadyState::Live,
        }
    }

    /// An enabled audio track that has not ended.
    pub fn is_live_audio(&self) -> bool {
        self.kind == TrackKind::Audio && self.enabled && self.ready_state == ReadyState::Live
    }
}

/// Handle to a captured stream.
///
/// Implementations must tolerate every method being called after `stop()`:
/// reads return nothing, `tracks()` reports `Ended`, repeated stops are no-ops.
pub trait MediaStream: Send + Sync {
    fn id(&self) -> StreamId;

    /// Snapshot of the stream's tracks.
    fn tracks(&self) -> Vec<AudioTrack>;

    /// Stop every track and release the underlying capture grant.
    fn stop(&self);

    fn sample_rate(&self) -> u32;

    /// Copy the most recent samples (non-consuming) into `out`, returning how
    /// many were written. Used for level analysis.
    fn analysis_window(&self, out: &mut [f32]) -> usize;

    /// Take every sample captured since the previous drain. Only the outbound
    /// transport drains a stream.
    fn drain(&self) -> Vec<f32>;

    fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.tracks()
            .into_iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .collect()
    }

    fn has_live_audio(&self) -> bool {
        self.tracks().iter().any(AudioTrack::is_live_audio)
    }
}

pub type SharedStream = Arc<dyn MediaStream>;
