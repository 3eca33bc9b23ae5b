//! Aircheck transport: records the outbound program feed to a WAV file.
//!
//! Acts as the outbound transport for the DJ session. It drains whichever
//! stream is on air, applies the output gain/mute, and appends the result to
//! a mono float WAV. A source whose sample rate does not match the open file
//! is refused so the previous feed keeps going.
//!
//! Every live set gets its own timestamped file: a writer reopened after
//! `shutdown` never touches a finished recording.

use async_trait::async_trait;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transport::{OutboundTransport, OutputNode, TransportError};
use crate::audio::{LevelMeter, SharedStream, StreamId};

type Writer = WavWriter<BufWriter<File>>;

const PUMP_INTERVAL: Duration = Duration::from_millis(100);

struct Pump {
    stream: StreamId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Gain and mute shared with the pump task.
struct OutputControls {
    gain_bits: AtomicU32,
    muted: AtomicBool,
}

impl OutputControls {
    fn new() -> Self {
        Self {
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    fn effective_gain(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            0.0
        } else {
            f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
        }
    }
}

pub struct AircheckTransport {
    dir: PathBuf,
    /// File of the current, or most recent, live set.
    path: Mutex<Option<PathBuf>>,
    spec: WavSpec,
    writer: Arc<Mutex<Option<Writer>>>,
    controls: Arc<OutputControls>,
    pump: tokio::sync::Mutex<Option<Pump>>,
    current: Mutex<Option<StreamId>>,
}

impl AircheckTransport {
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            path: Mutex::new(None),
            spec: WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
            writer: Arc::new(Mutex::new(None)),
            controls: Arc::new(OutputControls::new()),
            pump: tokio::sync::Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// Timestamped aircheck path inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("aircheck-{}.wav", timestamp));

        if path.exists() {
            for i in 1..100 {
                let alt_path = dir.join(format!("aircheck-{}-{}.wav", timestamp, i));
                if !alt_path.exists() {
                    return alt_path;
                }
            }
        }

        path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().ok().and_then(|p| p.clone())
    }

    fn ensure_writer(&self) -> Result<(), TransportError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| TransportError::Unavailable("aircheck writer poisoned".to_string()))?;
        if guard.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TransportError::Unavailable(format!("{}: {e}", self.dir.display())))?;
        let path = Self::path_in(&self.dir);
        let writer = WavWriter::create(&path, self.spec)
            .map_err(|e| TransportError::Unavailable(format!("failed to open aircheck: {e}")))?;
        info!("Aircheck recording to {:?}", path);
        *guard = Some(writer);
        if let Ok(mut current) = self.path.lock() {
            *current = Some(path);
        }
        Ok(())
    }

    fn start_pump(&self, stream: SharedStream) -> Pump {
        let token = CancellationToken::new();
        let stream_id = stream.id();
        let handle = tokio::spawn(pump_loop(
            stream,
            Arc::clone(&self.writer),
            Arc::clone(&self.controls),
            token.clone(),
        ));
        Pump {
            stream: stream_id,
            token,
            handle,
        }
    }
}

#[async_trait]
impl OutboundTransport for AircheckTransport {
    async fn switch_source(&self, stream: SharedStream) -> Result<(), TransportError> {
        if stream.sample_rate() != self.spec.sample_rate {
            warn!(
                "Aircheck: refusing {} at {}Hz, recording is {}Hz",
                stream.id(),
                stream.sample_rate(),
                self.spec.sample_rate
            );
            return Err(TransportError::Rejected(format!(
                "source runs at {}Hz but the broadcast is {}Hz",
                stream.sample_rate(),
                self.spec.sample_rate
            )));
        }
        if !stream.has_live_audio() {
            return Err(TransportError::Rejected("source has no live audio".to_string()));
        }

        self.ensure_writer()?;

        let mut pump = self.pump.lock().await;
        if let Some(old) = pump.take() {
            debug!("Aircheck: restarting pump ({} -> {})", old.stream, stream.id());
            old.token.cancel();
            let _ = old.handle.await;
        }

        let stream_id = stream.id();
        *pump = Some(self.start_pump(stream));
        if let Ok(mut current) = self.current.lock() {
            *current = Some(stream_id);
        }

        info!("Aircheck: now consuming {}", stream_id);
        Ok(())
    }

    fn current_source(&self) -> Option<StreamId> {
        self.current.lock().ok().and_then(|c| *c)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if let Some(old) = self.pump.lock().await.take() {
            old.token.cancel();
            let _ = old.handle.await;
        }
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }

        let writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::Unavailable("aircheck writer poisoned".to_string()))?
            .take();
        if let Some(writer) = writer {
            writer
                .finalize()
                .map_err(|e| TransportError::Unavailable(format!("failed to finalize: {e}")))?;
            info!("Aircheck saved: {:?}", self.path());
        }
        Ok(())
    }
}

impl OutputNode for AircheckTransport {
    fn set_gain(&self, gain: f32) {
        self.controls
            .gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn set_muted(&self, muted: bool) {
        self.controls.muted.store(muted, Ordering::Relaxed);
    }
}

async fn pump_loop(
    stream: SharedStream,
    writer: Arc<Mutex<Option<Writer>>>,
    controls: Arc<OutputControls>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    loop {
        let cancelled = tokio::select! {
            _ = token.cancelled() => true,
            _ = ticker.tick() => false,
        };

        let mut samples = stream.drain();
        if !samples.is_empty() {
            LevelMeter::apply_gain(&mut samples, controls.effective_gain());
            if let Ok(mut guard) = writer.lock() {
                if let Some(w) = guard.as_mut() {
                    for sample in samples {
                        if let Err(e) = w.write_sample(sample) {
                            error!("Aircheck write failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        if cancelled {
            break;
        }
    }
}
