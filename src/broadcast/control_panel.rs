//! DJ control panel state.
//!
//! Pure state plus setters that push the change into the live audio graph
//! (output node, noise gate). The panel is inert while the broadcast is not
//! live: user-facing setters refuse with `ControlError::NotLive`.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::transport::OutputNode;
use crate::audio::AudioTrack;
use crate::capture::AudioSourceId;
use crate::error::ErrorKind;
use crate::monitor::NoiseGateConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("controls are only available while the broadcast is live")]
    NotLive,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::NotLive => ErrorKind::NotLive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlPanelState {
    pub is_live: bool,
    pub is_muted: bool,
    pub gain: f32,
    pub audio_source: Option<AudioSourceId>,
    pub current_audio_device: Option<AudioTrack>,
    pub noise_gate_enabled: bool,
    pub noise_gate_threshold: i32,
}

impl ControlPanelState {
    fn with_gate(gate: NoiseGateConfig) -> Self {
        Self {
            is_live: false,
            is_muted: false,
            gain: 1.0,
            audio_source: None,
            current_audio_device: None,
            noise_gate_enabled: gate.enabled,
            noise_gate_threshold: gate.threshold_db,
        }
    }

    pub fn noise_gate(&self) -> NoiseGateConfig {
        NoiseGateConfig::new(self.noise_gate_enabled, self.noise_gate_threshold)
    }
}

/// Cloneable handle to the panel, shared by the coordinator and the API.
#[derive(Clone)]
pub struct ControlPanel {
    inner: Arc<Mutex<ControlPanelState>>,
    output: Arc<dyn OutputNode>,
    gate_tx: Arc<watch::Sender<NoiseGateConfig>>,
}

impl ControlPanel {
    pub fn new(output: Arc<dyn OutputNode>, gate: NoiseGateConfig) -> Self {
        let gate = NoiseGateConfig::new(gate.enabled, gate.threshold_db);
        let (gate_tx, _) = watch::channel(gate);
        Self {
            inner: Arc::new(Mutex::new(ControlPanelState::with_gate(gate))),
            output,
            gate_tx: Arc::new(gate_tx),
        }
    }

    pub async fn get(&self) -> ControlPanelState {
        self.inner.lock().await.clone()
    }

    pub async fn is_live(&self) -> bool {
        self.inner.lock().await.is_live
    }

    /// Gate settings feed for the level monitor.
    pub fn gate_receiver(&self) -> watch::Receiver<NoiseGateConfig> {
        self.gate_tx.subscribe()
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), ControlError> {
        let mut state = self.live_state().await?;
        state.is_muted = muted;
        self.output.set_muted(muted);
        info!("ControlPanel: muted={}", muted);
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<bool, ControlError> {
        let mut state = self.live_state().await?;
        state.is_muted = !state.is_muted;
        self.output.set_muted(state.is_muted);
        info!("ControlPanel: muted={}", state.is_muted);
        Ok(state.is_muted)
    }

    /// Set output gain, clamped to `[0, 1]`.
    pub async fn set_gain(&self, gain: f32) -> Result<f32, ControlError> {
        let mut state = self.live_state().await?;
        let gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 1.0 };
        state.gain = gain;
        self.output.set_gain(gain);
        debug!("ControlPanel: gain={:.2}", gain);
        Ok(gain)
    }

    pub async fn set_noise_gate_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        let mut state = self.live_state().await?;
        state.noise_gate_enabled = enabled;
        self.gate_tx.send_replace(state.noise_gate());
        info!("ControlPanel: noise gate enabled={}", enabled);
        Ok(())
    }

    /// Set the gate threshold, clamped into `[-70, -20]` dB.
    pub async fn set_noise_gate_threshold(&self, threshold_db: i32) -> Result<i32, ControlError> {
        let mut state = self.live_state().await?;
        state.noise_gate_threshold = NoiseGateConfig::clamp_threshold(threshold_db);
        self.gate_tx.send_replace(state.noise_gate());
        debug!("ControlPanel: noise gate threshold={}dB", state.noise_gate_threshold);
        Ok(state.noise_gate_threshold)
    }

    pub(crate) async fn set_live(&self, live: bool) {
        let mut state = self.inner.lock().await;
        state.is_live = live;
    }

    /// Record the committed source. Only the switch coordinator calls this.
    pub(crate) async fn record_source(&self, source: AudioSourceId, device: Option<AudioTrack>) {
        let mut state = self.inner.lock().await;
        state.audio_source = Some(source);
        state.current_audio_device = device;
    }

    pub(crate) async fn clear_source(&self) {
        let mut state = self.inner.lock().await;
        state.audio_source = None;
        state.current_audio_device = None;
    }

    async fn live_state(&self) -> Result<tokio::sync::MutexGuard<'_, ControlPanelState>, ControlError> {
        let state = self.inner.lock().await;
        if !state.is_live {
            return Err(ControlError::NotLive);
        }
        Ok(state)
    }
}
