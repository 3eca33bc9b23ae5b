//! Broadcast stream status as reported by the station server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerState {
    Up,
    #[default]
    Down,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastInfo {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub dj: Option<String>,
    pub start_time: Option<String>,
    pub status: Option<String>,
}

/// One status reading. Always replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastStreamStatus {
    pub server: ServerState,
    pub live: bool,
    pub streaming: bool,
    pub is_active: bool,
    pub stream_url: Option<String>,
    pub metadata: Option<StreamMetadata>,
    pub broadcast: Option<BroadcastInfo>,
    pub streaming_disabled_reason: Option<String>,
    pub error: Option<String>,
}

impl BroadcastStreamStatus {
    /// URL a listener may play right now: live, streaming, and advertised.
    pub fn playable_url(&self) -> Option<String> {
        if !(self.live && self.streaming) {
            return None;
        }
        self.stream_url.as_deref().and_then(normalize_stream_url)
    }

    /// "Artist - Title", or whichever half is known.
    pub fn now_playing(&self) -> Option<String> {
        let meta = self.metadata.as_ref()?;
        match (meta.artist.as_deref(), meta.title.as_deref()) {
            (Some(artist), Some(title)) => Some(format!("{artist} - {title}")),
            (None, Some(title)) => Some(title.to_string()),
            (Some(artist), None) => Some(artist.to_string()),
            (None, None) => None,
        }
    }
}

/// Servers sometimes advertise `host:port/mount`; players need a scheme.
pub fn normalize_stream_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{trimmed}"))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Http(String),
    #[error("status response could not be decoded: {0}")]
    Decode(String),
}

impl StatusError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::StatusFetchError
    }

    pub fn user_message(&self) -> String {
        match self {
            StatusError::Http(_) => "Couldn't reach the station. Retrying.".to_string(),
            StatusError::Decode(_) => "The station sent an unexpected status. Retrying.".to_string(),
        }
    }
}

#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn fetch_status(&self) -> Result<BroadcastStreamStatus, StatusError>;
}

/// `GET {base_url}{status_path}` over reqwest.
pub struct HttpStatusClient {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusClient {
    pub fn new(base_url: &str, status_path: &str, timeout: Duration) -> Result<Self, StatusError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StatusError::Http(e.to_string()))?;
        let path = if status_path.starts_with('/') {
            status_path.to_string()
        } else {
            format!("/{status_path}")
        };
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusClient for HttpStatusClient {
    async fn fetch_status(&self) -> Result<BroadcastStreamStatus, StatusError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| StatusError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StatusError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(StatusError::Http(format!("{}: {}", status, body)));
        }

        let parsed: BroadcastStreamStatus =
            serde_json::from_str(&body).map_err(|e| StatusError::Decode(e.to_string()))?;
        debug!(
            "Status: live={} streaming={} url={:?}",
            parsed.live, parsed.streaming, parsed.stream_url
        );
        Ok(parsed)
    }
}
