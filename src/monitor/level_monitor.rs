//! Audio Level Monitor.
//!
//! Samples the active capture stream once per frame and publishes the latest
//! `LevelSample` on a watch channel. Only the most recent sample is kept.
//!
//! The gate decision attached to each sample is advisory: the monitor only
//! classifies, it never mutes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::{LevelMeter, SharedStream, StreamId, SILENCE_FLOOR_DB};

/// Noise gate settings as chosen by the DJ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseGateConfig {
    pub enabled: bool,
    pub threshold_db: i32,
}

impl NoiseGateConfig {
    pub const MIN_THRESHOLD_DB: i32 = -70;
    pub const MAX_THRESHOLD_DB: i32 = -20;

    pub fn new(enabled: bool, threshold_db: i32) -> Self {
        Self {
            enabled,
            threshold_db: Self::clamp_threshold(threshold_db),
        }
    }

    pub fn clamp_threshold(threshold_db: i32) -> i32 {
        threshold_db.clamp(Self::MIN_THRESHOLD_DB, Self::MAX_THRESHOLD_DB)
    }

    /// Whether a level passes the gate. A disabled gate always passes.
    pub fn passes(&self, level_db: f32) -> bool {
        !self.enabled || level_db > self.threshold_db as f32
    }
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSample {
    pub db: f32,
    pub timestamp: DateTime<Utc>,
    pub gate_open: bool,
    pub source: StreamId,
    #[serde(skip)]
    floor_db: f32,
}

impl LevelSample {
    pub fn is_silent(&self) -> bool {
        self.db <= self.floor_db
    }

    /// Text for the meter readout.
    pub fn display(&self) -> String {
        if self.is_silent() {
            "Silent".to_string()
        } else {
            format!("{:.1} dB", self.db)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub frame_rate: u32,
    pub floor_db: f32,
    pub window: usize,
}

impl MonitorSettings {
    fn frame_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.frame_rate.max(1)))
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            floor_db: SILENCE_FLOOR_DB,
            window: 1024,
        }
    }
}

/// Publishing side shared with the sampling task. A task may only publish
/// while its generation is current.
struct Emitter {
    generation: u64,
    tx: watch::Sender<Option<LevelSample>>,
}

struct Attachment {
    stream: StreamId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LevelMonitor {
    settings: MonitorSettings,
    gate: watch::Receiver<NoiseGateConfig>,
    emitter: Arc<Mutex<Emitter>>,
    samples: watch::Receiver<Option<LevelSample>>,
    attachment: Mutex<Option<Attachment>>,
}

impl LevelMonitor {
    pub fn new(settings: MonitorSettings, gate: watch::Receiver<NoiseGateConfig>) -> Self {
        let (tx, samples) = watch::channel(None);
        Self {
            settings,
            gate,
            emitter: Arc::new(Mutex::new(Emitter { generation: 0, tx })),
            samples,
            attachment: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LevelSample>> {
        self.samples.clone()
    }

    pub fn latest(&self) -> Option<LevelSample> {
        self.samples.borrow().clone()
    }

    /// Stream currently being sampled. A sampler that stopped because its
    /// stream died no longer counts as attached.
    pub fn attached_to(&self) -> Option<StreamId> {
        self.attachment.lock().ok().and_then(|guard| {
            guard
                .as_ref()
                .filter(|a| !a.handle.is_finished())
                .map(|a| a.stream)
        })
    }

    /// Start sampling `stream`, replacing any previous attachment.
    pub fn attach(&self, stream: SharedStream) {
        let generation = self.bump_generation();
        let token = CancellationToken::new();
        let stream_id = stream.id();

        let handle = tokio::spawn(sample_loop(
            stream,
            self.gate.clone(),
            Arc::clone(&self.emitter),
            generation,
            token.clone(),
            self.settings,
        ));

        let previous = self.attachment.lock().ok().and_then(|mut guard| {
            guard.replace(Attachment {
                stream: stream_id,
                token,
                handle,
            })
        });
        if let Some(prev) = previous {
            prev.token.cancel();
            prev.handle.abort();
        }

        info!("LevelMonitor: attached to {}", stream_id);
    }

    /// Stop sampling. Once this returns no sample from the old stream can be
    /// published.
    pub fn detach(&self) {
        self.bump_generation();
        let previous = self.attachment.lock().ok().and_then(|mut guard| guard.take());
        if let Some(prev) = previous {
            prev.token.cancel();
            prev.handle.abort();
            info!("LevelMonitor: detached from {}", prev.stream);
        }
    }

    /// Invalidate the running task and clear the published sample.
    fn bump_generation(&self) -> u64 {
        let mut emitter = self
            .emitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        emitter.generation += 1;
        emitter.tx.send_replace(None);
        emitter.generation
    }
}

impl Drop for LevelMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn sample_loop(
    stream: SharedStream,
    gate: watch::Receiver<NoiseGateConfig>,
    emitter: Arc<Mutex<Emitter>>,
    generation: u64,
    token: CancellationToken,
    settings: MonitorSettings,
) {
    let mut frames = tokio::time::interval(settings.frame_period());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut window = vec![0.0f32; settings.window.max(1)];

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = frames.tick() => {}
        }

        if !stream.has_live_audio() {
            debug!("LevelMonitor: {} has no live audio, stopping sampler", stream.id());
            if let Ok(emitter) = emitter.lock() {
                if emitter.generation == generation {
                    emitter.tx.send_replace(None);
                }
            }
            break;
        }

        let n = stream.analysis_window(&mut window);
        let db = LevelMeter::window_db(&window[..n], settings.floor_db);
        let gate_config = *gate.borrow();

        let sample = LevelSample {
            db,
            timestamp: Utc::now(),
            gate_open: gate_config.passes(db),
            source: stream.id(),
            floor_db: settings.floor_db,
        };

        let Ok(emitter) = emitter.lock() else {
            break;
        };
        if emitter.generation != generation {
            break;
        }
        emitter.tx.send_replace(Some(sample));
    }
}
