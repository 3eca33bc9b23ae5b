//! Source Switch Coordinator.
//!
//! Replaces the DJ's on-air capture source while the broadcast keeps running.
//! Each attempt walks `negotiating -> validating -> committing` and ends in
//! either `committed` or `rolled_back`. The previous source is only released
//! after the transport has accepted the new one, and every failure leaves the
//! previous source on air and untouched.
//!
//! At most one attempt is in flight. A second request is rejected before its
//! first suspension point, never queued.
//!
//! Ending the broadcast fences off any attempt still negotiating: it finds
//! the broadcast gone when it reaches the commit, releases its new source and
//! never touches the transport.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::control_panel::ControlPanel;
use super::transport::{OutboundTransport, TransportError};
use crate::audio::{AudioTrack, SharedStream, StreamId};
use crate::capture::{AudioSourceId, CaptureError, CaptureNegotiator, CaptureSource};
use crate::error::ErrorKind;
use crate::monitor::LevelMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPhase {
    Idle,
    Negotiating,
    Validating,
    Committing,
    RolledBack,
    Committed,
}

impl SwitchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchPhase::Idle => "idle",
            SwitchPhase::Negotiating => "negotiating",
            SwitchPhase::Validating => "validating",
            SwitchPhase::Committing => "committing",
            SwitchPhase::RolledBack => "rolled_back",
            SwitchPhase::Committed => "committed",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SwitchPhase::Negotiating | SwitchPhase::Validating | SwitchPhase::Committing
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("a source switch is already in progress")]
    AlreadyInFlight,
    #[error("nothing to switch: broadcast is not live and {0} is already selected")]
    NothingToSwitch(AudioSourceId),
    #[error("negotiation failed: {0}")]
    Negotiation(CaptureError),
    #[error("new source has no live audio track")]
    ValidationFailed,
    #[error("transport rejected new source: {0}")]
    TransportRejected(String),
    #[error("new source became inactive during the switch")]
    StreamBecameInactive,
    #[error("the broadcast ended before the switch finished")]
    BroadcastEnded,
}

impl SwitchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwitchError::AlreadyInFlight => ErrorKind::SwitchInFlight,
            SwitchError::NothingToSwitch(_) => ErrorKind::NotLive,
            SwitchError::Negotiation(e) => e.kind(),
            SwitchError::ValidationFailed => ErrorKind::ValidationFailed,
            SwitchError::TransportRejected(_) => ErrorKind::TransportRejected,
            SwitchError::StreamBecameInactive => ErrorKind::StreamBecameInactive,
            SwitchError::BroadcastEnded => ErrorKind::NotLive,
        }
    }

    /// Text for the DJ. None of these claim the broadcast was interrupted,
    /// because a failed switch never touches what is on air.
    pub fn user_message(&self) -> String {
        match self {
            SwitchError::AlreadyInFlight => {
                "A source switch is already in progress. Wait for it to finish.".to_string()
            }
            SwitchError::NothingToSwitch(id) => {
                format!("You are not live and {id} audio is already selected.")
            }
            SwitchError::Negotiation(e) => {
                format!("{} Nothing on air was changed.", e.user_message())
            }
            SwitchError::ValidationFailed => {
                "The selected source has no live audio. Nothing on air was changed.".to_string()
            }
            SwitchError::TransportRejected(reason) => format!(
                "The broadcast could not use the new source ({reason}). The previous source is still on air."
            ),
            SwitchError::StreamBecameInactive => {
                "The new source stopped before it went on air. Nothing on air was changed."
                    .to_string()
            }
            SwitchError::BroadcastEnded => {
                "The broadcast ended before the new source went on air.".to_string()
            }
        }
    }
}

impl From<CaptureError> for SwitchError {
    fn from(err: CaptureError) -> Self {
        SwitchError::Negotiation(err)
    }
}

/// Last observed state of the switch machine, published for the UI.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchStatus {
    pub phase: SwitchPhase,
    pub requested: Option<AudioSourceId>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SwitchStatus {
    fn default() -> Self {
        Self {
            phase: SwitchPhase::Idle,
            requested: None,
            started_at: None,
            last_error: None,
        }
    }
}

/// Outcome of a committed switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchReport {
    pub source: AudioSourceId,
    pub stream: StreamId,
    pub previous: Option<StreamId>,
    pub device: Option<AudioTrack>,
}

/// One switch in progress. Owns the newly negotiated source until it is
/// handed to the active slot, so any early return releases it.
struct SwitchAttempt {
    requested: AudioSourceId,
    previous: Option<(StreamId, SharedStream)>,
    new_source: Option<CaptureSource>,
    phase: SwitchPhase,
    started_at: DateTime<Utc>,
    broadcast: u64,
}

/// Clears the in-flight flag on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SwitchCoordinator {
    negotiator: CaptureNegotiator,
    transport: Arc<dyn OutboundTransport>,
    monitor: Arc<LevelMonitor>,
    panel: ControlPanel,
    active: Mutex<Option<CaptureSource>>,
    in_flight: AtomicBool,
    /// Bumped by `end`. An attempt only commits into the broadcast it began in.
    broadcast: AtomicU64,
    /// Held across the commit and across `end`, so neither sees the other
    /// half done.
    commit_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<SwitchStatus>,
}

impl SwitchCoordinator {
    pub fn new(
        negotiator: CaptureNegotiator,
        transport: Arc<dyn OutboundTransport>,
        monitor: Arc<LevelMonitor>,
        panel: ControlPanel,
    ) -> Self {
        let (status, _) = watch::channel(SwitchStatus::default());
        Self {
            negotiator,
            transport,
            monitor,
            panel,
            active: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            broadcast: AtomicU64::new(0),
            commit_lock: tokio::sync::Mutex::new(()),
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SwitchStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SwitchStatus {
        self.status.borrow().clone()
    }

    pub fn is_switching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn active_source_id(&self) -> Option<AudioSourceId> {
        self.active_slot().as_ref().map(CaptureSource::id)
    }

    pub fn active_stream(&self) -> Option<StreamId> {
        self.active_slot().as_ref().map(CaptureSource::stream_id)
    }

    pub fn is_capture_supported(&self) -> bool {
        self.negotiator.is_supported()
    }

    /// Switch the on-air source to a fresh capture of `target`.
    pub async fn switch_source(&self, target: AudioSourceId) -> Result<SwitchReport, SwitchError> {
        // Single-flight: decided before the first await.
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("SwitchCoordinator: switch to {} rejected, one is in flight", target);
            return Err(SwitchError::AlreadyInFlight);
        }
        let _flight = FlightGuard(&self.in_flight);
        let broadcast = self.broadcast.load(Ordering::Acquire);

        let previous = self
            .active_slot()
            .as_ref()
            .map(|source| (source.id(), source.stream_id(), source.stream()));

        if !self.panel.is_live().await {
            if let Some((id, _, _)) = &previous {
                if *id == target {
                    debug!("SwitchCoordinator: not live and {} already selected", target);
                    return Err(SwitchError::NothingToSwitch(target));
                }
            }
        }

        let mut attempt = SwitchAttempt {
            requested: target,
            previous: previous.map(|(_, stream_id, stream)| (stream_id, stream)),
            new_source: None,
            phase: SwitchPhase::Idle,
            started_at: Utc::now(),
            broadcast,
        };

        let result = self.run(&mut attempt).await;
        match &result {
            Ok(report) => {
                info!(
                    "SwitchCoordinator: committed {} ({:?} -> {})",
                    report.source, report.previous, report.stream
                );
                self.publish(&mut attempt, SwitchPhase::Committed, None);
            }
            Err(e) => {
                warn!("SwitchCoordinator: rolled back switch to {}: {}", target, e);
                self.publish(&mut attempt, SwitchPhase::RolledBack, Some(e.user_message()));
            }
        }
        result
    }

    async fn run(&self, attempt: &mut SwitchAttempt) -> Result<SwitchReport, SwitchError> {
        self.publish(attempt, SwitchPhase::Negotiating, None);
        let source = self.negotiator.acquire(attempt.requested).await?;
        attempt.new_source = Some(source);

        self.publish(attempt, SwitchPhase::Validating, None);
        let new_stream = match attempt.new_source.as_ref() {
            Some(source) => {
                validate(source)?;
                source.stream()
            }
            None => return Err(SwitchError::StreamBecameInactive),
        };

        self.publish(attempt, SwitchPhase::Committing, None);
        self.commit(attempt, new_stream).await
    }

    async fn commit(
        &self,
        attempt: &mut SwitchAttempt,
        new_stream: SharedStream,
    ) -> Result<SwitchReport, SwitchError> {
        let _commit = self.commit_lock.lock().await;
        if self.broadcast.load(Ordering::Acquire) != attempt.broadcast {
            info!(
                "SwitchCoordinator: broadcast ended during negotiation, releasing {}",
                new_stream.id()
            );
            return Err(SwitchError::BroadcastEnded);
        }

        match self.transport.switch_source(Arc::clone(&new_stream)).await {
            Ok(()) => {}
            Err(TransportError::Rejected(reason)) | Err(TransportError::Unavailable(reason)) => {
                return Err(SwitchError::TransportRejected(reason));
            }
        }

        if !new_stream.has_live_audio() {
            // Accepted but already dead: point the transport back at the
            // previous feed, which was never stopped.
            if let Some((previous_id, previous_stream)) = attempt.previous.as_ref() {
                warn!(
                    "SwitchCoordinator: {} ended after acceptance, restoring {}",
                    new_stream.id(),
                    previous_id
                );
                if let Err(e) = self.transport.switch_source(Arc::clone(previous_stream)).await {
                    error!("SwitchCoordinator: failed to restore {}: {}", previous_id, e);
                }
            }
            return Err(SwitchError::StreamBecameInactive);
        }

        let Some(new_source) = attempt.new_source.take() else {
            return Err(SwitchError::StreamBecameInactive);
        };
        let report = SwitchReport {
            source: new_source.id(),
            stream: new_source.stream_id(),
            previous: attempt.previous.as_ref().map(|(id, _)| *id),
            device: new_source.primary_track(),
        };

        let old_source = self.active_slot().replace(new_source);
        self.monitor.attach(new_stream);
        self.panel
            .record_source(report.source, report.device.clone())
            .await;

        // Transport confirmed the new feed; the old grant can go.
        drop(old_source);
        attempt.previous = None;

        Ok(report)
    }

    /// Release the active source when the broadcast ends. Waits for a commit
    /// already talking to the transport; attempts still negotiating will
    /// release their own source.
    pub async fn end(&self) {
        let _commit = self.commit_lock.lock().await;
        self.broadcast.fetch_add(1, Ordering::AcqRel);
        self.monitor.detach();
        let source = self.active_slot().take();
        if let Some(source) = source {
            let held = Utc::now() - source.acquired_at();
            info!(
                "SwitchCoordinator: releasing {} at end of broadcast (held {}s)",
                source.stream_id(),
                held.num_seconds()
            );
            drop(source);
        }
        self.panel.clear_source().await;
        self.status.send_replace(SwitchStatus::default());
    }

    /// If the active source has no live audio left, release it and return its
    /// stream id. The transport keeps whatever it has buffered.
    pub async fn reap_dead_source(&self) -> Option<StreamId> {
        if self.is_switching() {
            return None;
        }
        let dead = {
            let mut slot = self.active_slot();
            match slot.as_ref() {
                Some(source) if !source.is_live() => slot.take(),
                _ => None,
            }
        }?;

        let stream_id = dead.stream_id();
        warn!("SwitchCoordinator: active source {} ended, releasing it", stream_id);
        self.monitor.detach();
        drop(dead);
        self.panel.clear_source().await;
        Some(stream_id)
    }

    fn publish(&self, attempt: &mut SwitchAttempt, phase: SwitchPhase, last_error: Option<String>) {
        attempt.phase = phase;
        debug!(
            "SwitchCoordinator: {} -> {}",
            attempt.requested,
            attempt.phase.as_str()
        );
        self.status.send_replace(SwitchStatus {
            phase: attempt.phase,
            requested: Some(attempt.requested),
            started_at: Some(attempt.started_at),
            last_error,
        });
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<CaptureSource>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The grant must have had a live audio track when it was handed over, and
/// must still have one now.
fn validate(source: &CaptureSource) -> Result<(), SwitchError> {
    if !source.tracks_at_acquire().iter().any(AudioTrack::is_live_audio) {
        return Err(SwitchError::ValidationFailed);
    }
    if !source.is_live() {
        return Err(SwitchError::StreamBecameInactive);
    }
    Ok(())
}
