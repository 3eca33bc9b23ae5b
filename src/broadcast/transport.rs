//! Outbound transport seam.
//!
//! The broadcast encoder/uploader is a black box to the DJ side: it is told
//! which stream to consume and either accepts or rejects it.

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::{SharedStream, StreamId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport rejected source: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Start consuming `stream`. Resolves once the transport has accepted the
    /// new feed, or refused it. On refusal the previous feed stays on air.
    async fn switch_source(&self, stream: SharedStream) -> Result<(), TransportError>;

    /// Stream currently on air, if any.
    fn current_source(&self) -> Option<StreamId>;

    /// Stop consuming and flush whatever the transport writes.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Output stage of the live audio graph.
pub trait OutputNode: Send + Sync {
    fn set_gain(&self, gain: f32);
    fn set_muted(&self, muted: bool);
}
