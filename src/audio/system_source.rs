//! System audio capture (what the DJ's desktop is playing).
//!
//! Captures audio from PipeWire/PulseAudio monitor sources, which represent
//! the system's audio output (speakers/headphones) as an input device.
//!
//! Every `prompt()` opens a brand new cpal stream, so each acquisition is its
//! own capture grant. cpal streams are not `Send` on every platform, so the
//! stream lives on a dedicated thread that parks until the handle is stopped.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tracing::{debug, error, info, warn};

use super::media_stream::{AudioTrack, MediaStream, ReadyState, SharedStream, StreamId};
use crate::capture::{CaptureRequest, DisplayCapture, PromptError};

pub struct SystemAudioCapture {
    device_hint: String,
    target_sample_rate: u32,
    analysis_window: usize,
}

impl SystemAudioCapture {
    /// # Arguments
    /// * `device_hint` - Case-insensitive substring identifying monitor devices
    /// * `sample_rate` - Preferred capture rate (must match the aircheck file)
    /// * `analysis_window` - Number of recent samples kept for level analysis
    pub fn new(device_hint: impl Into<String>, sample_rate: u32, analysis_window: usize) -> Self {
        Self {
            device_hint: device_hint.into().to_lowercase(),
            target_sample_rate: sample_rate,
            analysis_window: analysis_window.max(1),
        }
    }

    /// Find a PipeWire/PulseAudio monitor source via cpal. Opens at
    /// `preferred_rate` when the device supports it, else its default rate.
    fn find_monitor_device(hint: &str, preferred_rate: u32) -> Option<(cpal::Device, String, u32)> {
        let host = cpal::default_host();

        for device in host.input_devices().ok()? {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains(hint) {
                    let sample_rate = if Self::supports_rate(&device, preferred_rate) {
                        preferred_rate
                    } else {
                        device
                            .default_input_config()
                            .map(|c| c.sample_rate().0)
                            .unwrap_or(preferred_rate)
                    };
                    info!("Found system audio monitor: {} ({}Hz)", name, sample_rate);
                    return Some((device, name, sample_rate));
                }
            }
        }

        None
    }

    fn supports_rate(device: &cpal::Device, rate: u32) -> bool {
        device
            .supported_input_configs()
            .map(|mut configs| {
                configs.any(|c| c.min_sample_rate().0 <= rate && rate <= c.max_sample_rate().0)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl DisplayCapture for SystemAudioCapture {
    fn is_supported(&self) -> bool {
        cpal::default_host()
            .input_devices()
            .map(|mut devices| devices.next().is_some())
            .unwrap_or(false)
    }

    async fn prompt(&self, request: &CaptureRequest) -> Result<SharedStream, PromptError> {
        debug!("Opening system audio capture for {:?}", request.source);
        let hint = self.device_hint.clone();
        let preferred_rate = self.target_sample_rate;
        let window = self.analysis_window;

        let opened = tokio::task::spawn_blocking(move || {
            MonitorStream::open(&hint, preferred_rate, window)
        })
        .await
        .map_err(|e| PromptError::Failed(format!("capture thread panicked: {e}")))??;

        Ok(Arc::new(opened))
    }
}

#[derive(Default)]
struct Buffers {
    recent: VecDeque<f32>,
    pending: Vec<f32>,
}

/// One open monitor-device capture.
pub struct MonitorStream {
    id: StreamId,
    label: String,
    sample_rate: u32,
    window: usize,
    buffers: Arc<Mutex<Buffers>>,
    ended: Arc<AtomicBool>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl MonitorStream {
    fn open(hint: &str, preferred_rate: u32, window: usize) -> Result<Self, PromptError> {
        let (device, label, sample_rate) = Self::find(hint, preferred_rate)?;

        let buffers = Arc::new(Mutex::new(Buffers::default()));
        let ended = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let buffers_cb = buffers.clone();
        let ended_cb = ended.clone();
        let ended_err = ended.clone();

        thread::Builder::new()
            .name("onair-capture".to_string())
            .spawn(move || {
                let config = cpal::StreamConfig {
                    channels: 1,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if ended_cb.load(Ordering::Acquire) {
                            return;
                        }
                        if let Ok(mut buf) = buffers_cb.lock() {
                            buf.pending.extend_from_slice(data);
                            buf.recent.extend(data.iter().copied());
                            let excess = buf.recent.len().saturating_sub(window);
                            buf.recent.drain(..excess);
                        }
                    },
                    move |err| {
                        error!("System audio stream error: {}", err);
                        ended_err.store(true, Ordering::Release);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to build stream: {e}")));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("failed to start stream: {e}")));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stopped (or the handle is dropped).
                let _ = stop_rx.recv();
                debug!("Stopping system audio cpal stream");
                drop(stream);
            })
            .map_err(|e| PromptError::Failed(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => return Err(PromptError::Failed(msg)),
            Err(_) => return Err(PromptError::Failed("capture thread exited".to_string())),
        }

        let id = StreamId::next();
        info!("System audio capture {} started on {}", id, label);

        Ok(Self {
            id,
            label,
            sample_rate,
            window,
            buffers,
            ended,
            stop_tx: Mutex::new(Some(stop_tx)),
        })
    }

    fn find(hint: &str, preferred_rate: u32) -> Result<(cpal::Device, String, u32), PromptError> {
        SystemAudioCapture::find_monitor_device(hint, preferred_rate).ok_or_else(|| {
            warn!(
                "No system audio monitor source found. \
                 Ensure PipeWire is running and a monitor source is available."
            );
            PromptError::Failed("no system audio monitor source found".to_string())
        })
    }
}

impl MediaStream for MonitorStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn tracks(&self) -> Vec<AudioTrack> {
        let ready_state = if self.ended.load(Ordering::Acquire) {
            ReadyState::Ended
        } else {
            ReadyState::Live
        };
        vec![AudioTrack {
            ready_state,
            ..AudioTrack::audio(self.label.clone())
        }]
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::Release);
        let sender = self.stop_tx.lock().ok().and_then(|mut guard| guard.take());
        if let Some(tx) = sender {
            let _ = tx.send(());
            info!("System audio capture {} stopped", self.id);
        }
        if let Ok(mut buf) = self.buffers.lock() {
            buf.recent.clear();
            buf.pending.clear();
            buf.pending.shrink_to_fit();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn analysis_window(&self, out: &mut [f32]) -> usize {
        if self.ended.load(Ordering::Acquire) {
            return 0;
        }
        let Ok(buf) = self.buffers.lock() else {
            return 0;
        };
        let n = out.len().min(buf.recent.len()).min(self.window);
        let skip = buf.recent.len() - n;
        for (slot, sample) in out.iter_mut().zip(buf.recent.iter().skip(skip)) {
            *slot = *sample;
        }
        n
    }

    fn drain(&self) -> Vec<f32> {
        match self.buffers.lock() {
            Ok(mut buf) => std::mem::take(&mut buf.pending),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for MonitorStream {
    fn drop(&mut self) {
        if !self.ended.load(Ordering::Acquire) {
            debug!("Dropping live MonitorStream, cleaning up");
        }
        self.stop();
    }
}
