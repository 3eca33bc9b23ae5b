//! Playback Engine.
//!
//! Owns the single listener output session. States run
//! `idle -> loading -> playing <-> paused`, with `error` reachable from any of
//! them. A playback failure gets exactly one automatic reload of the last
//! known URL after `retry_delay`; a second failure lands in `error` and waits
//! for the listener to press play again. Stopping, or the station going
//! off air, abandons a pending reload.
//!
//! Volume and mute never change the play state, and play/pause never change
//! volume or mute.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status::StatusClient;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Error => "error",
        }
    }
}

/// Read-only view of the output session, published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSession {
    pub url: Option<String>,
    pub state: PlaybackState,
    pub is_playing: bool,
    pub is_loading: bool,
    pub volume: u8,
    pub is_muted: bool,
    pub last_error: Option<String>,
}

impl PlaybackSession {
    fn new(volume: u8) -> Self {
        let volume = volume.min(100);
        Self {
            url: None,
            state: PlaybackState::Idle,
            is_playing: false,
            is_loading: false,
            volume,
            is_muted: volume == 0,
            last_error: None,
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
        self.is_playing = state == PlaybackState::Playing;
        self.is_loading = state == PlaybackState::Loading;
    }
}

/// Failure reported by the output device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaFault {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("playback was not allowed to start")]
    AutoplayRejected,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no stream url is available")]
    NoStreamUrl,
    #[error("the station is not live")]
    NotLive,
    #[error("stream network error: {0}")]
    Network(String),
    #[error("stream decode error: {0}")]
    Decode(String),
    #[error("playback start was rejected")]
    AutoplayRejected,
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::NoStreamUrl | PlaybackError::NotLive => ErrorKind::NotLive,
            PlaybackError::Network(_) => ErrorKind::PlaybackNetworkError,
            PlaybackError::Decode(_) => ErrorKind::PlaybackDecodeError,
            PlaybackError::AutoplayRejected => ErrorKind::AutoplayRejected,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::NoStreamUrl => "No stream is available right now.".to_string(),
            PlaybackError::NotLive => "The station is not live right now.".to_string(),
            PlaybackError::Network(_) | PlaybackError::Decode(_) => {
                "Error loading stream. Please try again.".to_string()
            }
            PlaybackError::AutoplayRejected => {
                "Couldn't start playback. Press play again.".to_string()
            }
        }
    }
}

impl From<MediaFault> for PlaybackError {
    fn from(fault: MediaFault) -> Self {
        match fault {
            MediaFault::Network(msg) => PlaybackError::Network(msg),
            MediaFault::Decode(msg) => PlaybackError::Decode(msg),
            MediaFault::AutoplayRejected => PlaybackError::AutoplayRejected,
        }
    }
}

/// The audio output the engine drives.
#[async_trait]
pub trait MediaOutput: Send + Sync {
    /// Open `url` paused. Resolves once the stream is ready to play.
    async fn load(&self, url: &str) -> Result<(), MediaFault>;
    async fn play(&self) -> Result<(), MediaFault>;
    async fn pause(&self) -> Result<(), MediaFault>;
    async fn stop(&self) -> Result<(), MediaFault>;
    async fn set_volume(&self, volume: u8) -> Result<(), MediaFault>;
    async fn set_muted(&self, muted: bool) -> Result<(), MediaFault>;

    /// Faults raised while playing (stalls, dropped connections). Can be
    /// taken once.
    fn take_fault_events(&self) -> Option<mpsc::Receiver<MediaFault>> {
        None
    }
}

pub struct PlaybackEngine {
    output: Arc<dyn MediaOutput>,
    status: Arc<dyn StatusClient>,
    retry_delay: Duration,
    op: Mutex<()>,
    retry_armed: AtomicBool,
    /// Cancelled by `stop`/`halt_offline`, then replaced.
    retry_cancel: std::sync::Mutex<CancellationToken>,
    session: watch::Sender<PlaybackSession>,
    recovering: watch::Sender<bool>,
}

impl PlaybackEngine {
    pub fn new(
        output: Arc<dyn MediaOutput>,
        status: Arc<dyn StatusClient>,
        default_volume: u8,
        retry_delay: Duration,
    ) -> Self {
        let (session, _) = watch::channel(PlaybackSession::new(default_volume));
        let (recovering, _) = watch::channel(false);
        Self {
            output,
            status,
            retry_delay,
            op: Mutex::new(()),
            retry_armed: AtomicBool::new(true),
            retry_cancel: std::sync::Mutex::new(CancellationToken::new()),
            session,
            recovering,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSession> {
        self.session.subscribe()
    }

    pub fn session(&self) -> PlaybackSession {
        self.session.borrow().clone()
    }

    /// True while an automatic reload is in progress.
    pub fn recovering(&self) -> watch::Receiver<bool> {
        self.recovering.subscribe()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.session.borrow().state,
            PlaybackState::Playing | PlaybackState::Loading | PlaybackState::Paused
        )
    }

    /// Start or resume playback.
    pub async fn play(&self) -> Result<(), PlaybackError> {
        let cancel = self.retry_token();
        let _op = self.op.lock().await;
        let current = self.session();

        if current.state == PlaybackState::Playing {
            return Ok(());
        }
        if current.state == PlaybackState::Paused && current.url.is_some() {
            debug!("Playback: resuming");
            return match self.output.play().await {
                Ok(()) => {
                    self.confirm_playing();
                    Ok(())
                }
                Err(fault) => self.recover(fault, cancel).await,
            };
        }

        let url = match current.url {
            Some(url) => url,
            None => self.resolve_url().await?,
        };

        info!("Playback: loading {}", url);
        self.session.send_modify(|s| {
            s.url = Some(url.clone());
            s.last_error = None;
            s.set_state(PlaybackState::Loading);
        });

        match self.start(&url).await {
            Ok(()) => {
                self.confirm_playing();
                Ok(())
            }
            Err(fault) => self.recover(fault, cancel).await,
        }
    }

    pub async fn pause(&self) -> Result<(), PlaybackError> {
        let _op = self.op.lock().await;
        if self.session.borrow().state != PlaybackState::Playing {
            return Ok(());
        }
        self.output.pause().await?;
        self.session.send_modify(|s| s.set_state(PlaybackState::Paused));
        debug!("Playback: paused");
        Ok(())
    }

    /// Stop playback; the URL is kept for the next `play()`.
    pub async fn stop(&self) -> Result<(), PlaybackError> {
        self.cancel_retry();
        let _op = self.op.lock().await;
        self.output.stop().await?;
        self.session.send_modify(|s| {
            s.set_state(PlaybackState::Idle);
            s.last_error = None;
        });
        info!("Playback: stopped");
        Ok(())
    }

    /// The station went off air: stop and forget the URL. Returns whether
    /// anything was playing.
    pub async fn halt_offline(&self) -> bool {
        self.cancel_retry();
        let _op = self.op.lock().await;
        if !self.is_active() {
            return false;
        }
        if let Err(e) = self.output.stop().await {
            warn!("Playback: stop failed while halting: {}", e);
        }
        self.session.send_modify(|s| {
            s.url = None;
            s.last_error = None;
            s.set_state(PlaybackState::Idle);
        });
        info!("Playback: station went offline, playback halted");
        true
    }

    /// Set volume in `[0, 100]`. Zero mutes; raising it again unmutes.
    pub async fn set_volume(&self, volume: u8) -> Result<u8, PlaybackError> {
        let volume = volume.min(100);
        let was_muted = self.session.borrow().is_muted;
        let muted = volume == 0;

        self.output.set_volume(volume).await?;
        if muted != was_muted {
            self.output.set_muted(muted).await?;
        }
        self.session.send_modify(|s| {
            s.volume = volume;
            s.is_muted = muted;
        });
        debug!("Playback: volume={} muted={}", volume, muted);
        Ok(volume)
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), PlaybackError> {
        self.output.set_muted(muted).await?;
        self.session.send_modify(|s| s.is_muted = muted);
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<bool, PlaybackError> {
        let muted = !self.session.borrow().is_muted;
        self.set_muted(muted).await?;
        Ok(muted)
    }

    /// A fault raised by the output while playing.
    pub async fn report_fault(&self, fault: MediaFault) -> Result<(), PlaybackError> {
        let cancel = self.retry_token();
        let _op = self.op.lock().await;
        let state = self.session.borrow().state;
        if state != PlaybackState::Playing {
            debug!("Playback: ignoring fault in {}: {}", state.as_str(), fault);
            return Ok(());
        }
        self.recover(fault, cancel).await
    }

    fn retry_token(&self) -> CancellationToken {
        self.retry_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Abandon a pending reload. Requests issued after this get a fresh token.
    fn cancel_retry(&self) {
        let mut token = self
            .retry_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    async fn resolve_url(&self) -> Result<String, PlaybackError> {
        let status = self.status.fetch_status().await.map_err(|e| {
            warn!("Playback: status lookup failed: {}", e);
            PlaybackError::NoStreamUrl
        })?;
        if !status.live {
            return Err(PlaybackError::NotLive);
        }
        status.playable_url().ok_or(PlaybackError::NoStreamUrl)
    }

    async fn start(&self, url: &str) -> Result<(), MediaFault> {
        self.output.load(url).await?;
        let (volume, muted) = {
            let session = self.session.borrow();
            (session.volume, session.is_muted)
        };
        self.output.set_volume(volume).await?;
        self.output.set_muted(muted).await?;
        self.output.play().await
    }

    /// One reload of the last known URL, then give up. Must be called with
    /// the op lock held. Returns `Ok` without reloading if `cancel` fires
    /// first; whoever cancelled it settles the state.
    async fn recover(
        &self,
        fault: MediaFault,
        cancel: CancellationToken,
    ) -> Result<(), PlaybackError> {
        let url = self.session.borrow().url.clone();
        let armed = self.retry_armed.swap(false, Ordering::AcqRel);

        let Some(url) = url.filter(|_| armed) else {
            return Err(self.fail(fault));
        };

        warn!("Playback: {}, retrying in {:?}", fault, self.retry_delay);
        self.recovering.send_replace(true);
        self.session.send_modify(|s| s.set_state(PlaybackState::Loading));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = async {
                tokio::time::sleep(self.retry_delay).await;
                self.start(&url).await
            } => Some(result),
        };
        self.recovering.send_replace(false);

        let Some(result) = result else {
            info!("Playback: reload of {} abandoned", url);
            self.retry_armed.store(true, Ordering::Release);
            return Ok(());
        };
        match result {
            Ok(()) => {
                info!("Playback: recovered {}", url);
                self.confirm_playing();
                Ok(())
            }
            Err(second) => {
                if let Err(e) = self.output.stop().await {
                    debug!("Playback: stop after failed retry: {}", e);
                }
                Err(self.fail(second))
            }
        }
    }

    fn confirm_playing(&self) {
        self.retry_armed.store(true, Ordering::Release);
        self.session.send_modify(|s| {
            s.last_error = None;
            s.set_state(PlaybackState::Playing);
        });
    }

    fn fail(&self, fault: MediaFault) -> PlaybackError {
        let err = PlaybackError::from(fault);
        warn!("Playback: giving up: {}", err);
        // A manual play() starts a fresh episode with its own retry.
        self.retry_armed.store(true, Ordering::Release);
        self.session.send_modify(|s| {
            s.last_error = Some(err.user_message());
            s.set_state(PlaybackState::Error);
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::status::BroadcastStreamStatus;
    use crate::test_support::{FakeOutput, FakeStatusClient, OutputCall};

    const URL: &str = "http://radio.example.edu/live";

    fn live_status() -> BroadcastStreamStatus {
        BroadcastStreamStatus {
            live: true,
            streaming: true,
            stream_url: Some(URL.to_string()),
            ..Default::default()
        }
    }

    fn engine() -> (PlaybackEngine, Arc<FakeOutput>, Arc<FakeStatusClient>) {
        let output = FakeOutput::new();
        let status = FakeStatusClient::new();
        let engine = PlaybackEngine::new(
            output.clone(),
            status.clone(),
            80,
            Duration::from_secs(3),
        );
        (engine, output, status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_queries_fresh_status() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());

        engine.play().await.unwrap();
        let session = engine.session();
        assert_eq!(session.state, PlaybackState::Playing);
        assert!(session.is_playing);
        assert_eq!(session.url.as_deref(), Some(URL));
        assert_eq!(status.fetch_count(), 1);
        assert!(output.calls().contains(&OutputCall::Load(URL.to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_when_offline_fails() {
        let (engine, _, status) = engine();
        status.push_ok(BroadcastStreamStatus::default());

        assert_eq!(engine.play().await, Err(PlaybackError::NotLive));
        assert_eq!(engine.session().state, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_recovers_silently() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        output.fail_next_load(MediaFault::Network("stalled".into()));

        let mut recovering = engine.recovering();
        engine.play().await.unwrap();

        let session = engine.session();
        assert_eq!(session.state, PlaybackState::Playing);
        assert!(session.last_error.is_none());
        assert_eq!(output.load_count(), 2);
        assert!(recovering.has_changed().unwrap());
        assert!(!*recovering.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_failure_is_user_visible() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        output.fail_next_load(MediaFault::Decode("bad frame".into()));
        output.fail_next_load(MediaFault::Decode("bad frame".into()));

        let err = engine.play().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlaybackDecodeError);

        let session = engine.session();
        assert_eq!(session.state, PlaybackState::Error);
        assert_eq!(
            session.last_error.as_deref(),
            Some("Error loading stream. Please try again.")
        );
        assert_eq!(output.load_count(), 2);

        // Explicit play starts over with the known URL.
        engine.play().await.unwrap();
        assert_eq!(engine.session().state, PlaybackState::Playing);
        assert_eq!(status.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_delay() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        output.fail_next_load(MediaFault::Network("reset".into()));

        let engine = Arc::new(engine);
        let task = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.play().await }
        });

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(output.load_count(), 1);
        assert_eq!(engine.session().state, PlaybackState::Loading);

        task.await.unwrap().unwrap();
        assert_eq!(output.load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_while_playing_reloads_once() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        engine.play().await.unwrap();

        engine
            .report_fault(MediaFault::Network("connection dropped".into()))
            .await
            .unwrap();
        assert_eq!(engine.session().state, PlaybackState::Playing);
        assert_eq!(output.load_count(), 2);

        // Budget re-armed after the confirmed recovery.
        engine
            .report_fault(MediaFault::Network("connection dropped".into()))
            .await
            .unwrap();
        assert_eq!(output.load_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_when_idle_is_ignored() {
        let (engine, output, _) = engine();
        engine
            .report_fault(MediaFault::Network("late event".into()))
            .await
            .unwrap();
        assert_eq!(engine.session().state, PlaybackState::Idle);
        assert_eq!(output.load_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_is_orthogonal_to_play_state() {
        let (engine, output, status) = engine();
        assert_eq!(engine.set_volume(40).await.unwrap(), 40);
        assert_eq!(engine.session().state, PlaybackState::Idle);
        assert!(!output.calls().iter().any(|c| matches!(c, OutputCall::Play)));

        status.push_ok(live_status());
        engine.play().await.unwrap();
        engine.set_volume(200).await.unwrap();
        let session = engine.session();
        assert_eq!(session.volume, 100);
        assert_eq!(session.state, PlaybackState::Playing);

        engine.pause().await.unwrap();
        assert_eq!(engine.session().volume, 100);
        assert!(!engine.session().is_muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_volume_mutes_and_raising_unmutes() {
        let (engine, output, _) = engine();
        engine.set_volume(0).await.unwrap();
        assert!(engine.session().is_muted);
        assert!(output.calls().contains(&OutputCall::SetMuted(true)));

        engine.set_volume(30).await.unwrap();
        let session = engine.session();
        assert!(!session.is_muted);
        assert_eq!(session.volume, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        engine.play().await.unwrap();

        engine.pause().await.unwrap();
        assert_eq!(engine.session().state, PlaybackState::Paused);

        engine.play().await.unwrap();
        assert_eq!(engine.session().state, PlaybackState::Playing);
        assert_eq!(output.load_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_pending_reload() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        engine.play().await.unwrap();

        let engine = Arc::new(engine);
        let fault = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .report_fault(MediaFault::Network("stalled".into()))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.session().state, PlaybackState::Loading);

        let started = tokio::time::Instant::now();
        engine.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        fault.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(output.load_count(), 1);
        assert_eq!(engine.session().state, PlaybackState::Idle);
        assert!(!*engine.recovering().borrow());

        // The next fault episode still gets its reload.
        engine.play().await.unwrap();
        engine
            .report_fault(MediaFault::Network("stalled".into()))
            .await
            .unwrap();
        assert_eq!(engine.session().state, PlaybackState::Playing);
        assert_eq!(output.load_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_going_offline_abandons_pending_reload() {
        let (engine, output, status) = engine();
        status.push_ok(live_status());
        engine.play().await.unwrap();

        let engine = Arc::new(engine);
        let fault = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .report_fault(MediaFault::Network("stalled".into()))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(engine.halt_offline().await);
        fault.await.unwrap().unwrap();
        assert_eq!(output.load_count(), 1);
        let session = engine.session();
        assert_eq!(session.state, PlaybackState::Idle);
        assert!(session.url.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_offline_clears_url() {
        let (engine, output, status) = engine();
        assert!(!engine.halt_offline().await);

        status.push_ok(live_status());
        engine.play().await.unwrap();
        assert!(engine.halt_offline().await);

        let session = engine.session();
        assert_eq!(session.state, PlaybackState::Idle);
        assert!(session.url.is_none());
        assert!(output.calls().contains(&OutputCall::Stop));
    }
}
