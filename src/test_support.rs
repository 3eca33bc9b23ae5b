//! Scriptable fakes for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{AudioTrack, MediaStream, ReadyState, SharedStream, StreamId};
use crate::broadcast::transport::{OutboundTransport, OutputNode, TransportError};
use crate::capture::{CaptureRequest, DisplayCapture, PromptError};
use crate::listener::playback::{MediaFault, MediaOutput};
use crate::listener::status::{BroadcastStreamStatus, StatusClient, StatusError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Accepted(StreamId),
    Stopped(StreamId),
}

/// Ordered record of transport acceptances and stream stops.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeStream {
    id: StreamId,
    tracks: Vec<AudioTrack>,
    stopped: AtomicBool,
    ended: AtomicBool,
    live_reads: Mutex<Option<usize>>,
    amplitude: Mutex<f32>,
    sample_rate: AtomicU32,
    pending: Mutex<Vec<f32>>,
    log: Mutex<Option<EventLog>>,
}

impl FakeStream {
    pub fn with_audio(label: &str) -> Arc<Self> {
        Self::with_tracks(vec![AudioTrack::audio(label)])
    }

    pub fn with_tracks(tracks: Vec<AudioTrack>) -> Arc<Self> {
        Arc::new(Self {
            id: StreamId::next(),
            tracks,
            stopped: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            live_reads: Mutex::new(None),
            amplitude: Mutex::new(0.1),
            sample_rate: AtomicU32::new(48_000),
            pending: Mutex::new(Vec::new()),
            log: Mutex::new(None),
        })
    }

    pub fn log_to(&self, log: &EventLog) {
        *self.log.lock().unwrap() = Some(log.clone());
    }

    pub fn set_amplitude(&self, amplitude: f32) {
        *self.amplitude.lock().unwrap() = amplitude;
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::SeqCst);
    }

    pub fn push_samples(&self, samples: &[f32]) {
        self.pending.lock().unwrap().extend_from_slice(samples);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Tracks end on their own (device unplugged, share revoked).
    pub fn end_tracks(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    /// Tracks report live for the next `reads` snapshots, then end.
    pub fn end_after_reads(&self, reads: usize) {
        *self.live_reads.lock().unwrap() = Some(reads);
    }
}

impl MediaStream for FakeStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn tracks(&self) -> Vec<AudioTrack> {
        if let Some(remaining) = self.live_reads.lock().unwrap().as_mut() {
            if *remaining == 0 {
                self.ended.store(true, Ordering::SeqCst);
            } else {
                *remaining -= 1;
            }
        }
        let ended = self.is_stopped() || self.ended.load(Ordering::SeqCst);
        self.tracks
            .iter()
            .cloned()
            .map(|mut t| {
                if ended {
                    t.ready_state = ReadyState::Ended;
                }
                t
            })
            .collect()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            if let Some(log) = self.log.lock().unwrap().as_ref() {
                log.push(Event::Stopped(self.id));
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::SeqCst)
    }

    fn analysis_window(&self, out: &mut [f32]) -> usize {
        if self.is_stopped() {
            return 0;
        }
        let amplitude = *self.amplitude.lock().unwrap();
        out.fill(amplitude);
        out.len()
    }

    fn drain(&self) -> Vec<f32> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}

enum Scripted {
    Stream(Arc<FakeStream>),
    Error(PromptError),
}

pub struct FakeCapture {
    script: Mutex<VecDeque<Scripted>>,
    supported: AtomicBool,
    prompts: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            supported: AtomicBool::new(true),
            prompts: AtomicUsize::new(0),
            delay: Mutex::new(None),
        })
    }

    pub fn push_stream(&self, stream: Arc<FakeStream>) {
        self.script.lock().unwrap().push_back(Scripted::Stream(stream));
    }

    pub fn push_error(&self, error: PromptError) {
        self.script.lock().unwrap().push_back(Scripted::Error(error));
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_prompt_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DisplayCapture for FakeCapture {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    async fn prompt(&self, _request: &CaptureRequest) -> Result<SharedStream, PromptError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Stream(stream)) => Ok(stream as SharedStream),
            Some(Scripted::Error(e)) => Err(e),
            None => Err(PromptError::Failed("nothing scripted".to_string())),
        }
    }
}

pub struct FakeTransport {
    log: EventLog,
    current: Mutex<Option<StreamId>>,
    reject_next: Mutex<Option<String>>,
    end_next: AtomicBool,
    shutdowns: AtomicUsize,
}

impl FakeTransport {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            current: Mutex::new(None),
            reject_next: Mutex::new(None),
            end_next: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn reject_next(&self, reason: &str) {
        *self.reject_next.lock().unwrap() = Some(reason.to_string());
    }

    /// The next accepted stream dies right after acceptance.
    pub fn end_next_on_accept(&self) {
        self.end_next.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundTransport for FakeTransport {
    async fn switch_source(&self, stream: SharedStream) -> Result<(), TransportError> {
        if let Some(reason) = self.reject_next.lock().unwrap().take() {
            return Err(TransportError::Rejected(reason));
        }
        self.log.push(Event::Accepted(stream.id()));
        *self.current.lock().unwrap() = Some(stream.id());
        if self.end_next.swap(false, Ordering::SeqCst) {
            stream.stop();
        }
        Ok(())
    }

    fn current_source(&self) -> Option<StreamId> {
        *self.current.lock().unwrap()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOutputNode {
    gain_bits: AtomicU32,
    muted: AtomicBool,
}

impl FakeOutputNode {
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::SeqCst))
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

impl OutputNode for FakeOutputNode {
    fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain.to_bits(), Ordering::SeqCst);
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCall {
    Load(String),
    Play,
    Pause,
    Stop,
    SetVolume(u8),
    SetMuted(bool),
}

pub struct FakeOutput {
    calls: Mutex<Vec<OutputCall>>,
    load_failures: Mutex<VecDeque<MediaFault>>,
    fault_tx: mpsc::UnboundedSender<MediaFault>,
    fault_rx: Mutex<Option<mpsc::UnboundedReceiver<MediaFault>>>,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            load_failures: Mutex::new(VecDeque::new()),
            fault_tx,
            fault_rx: Mutex::new(Some(fault_rx)),
        })
    }

    pub fn fail_next_load(&self, fault: MediaFault) {
        self.load_failures.lock().unwrap().push_back(fault);
    }

    pub fn emit_fault(&self, fault: MediaFault) {
        let _ = self.fault_tx.send(fault);
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn load_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, OutputCall::Load(_)))
            .count()
    }

    fn record(&self, call: OutputCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaOutput for FakeOutput {
    async fn load(&self, url: &str) -> Result<(), MediaFault> {
        self.record(OutputCall::Load(url.to_string()));
        match self.load_failures.lock().unwrap().pop_front() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    async fn play(&self) -> Result<(), MediaFault> {
        self.record(OutputCall::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<(), MediaFault> {
        self.record(OutputCall::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaFault> {
        self.record(OutputCall::Stop);
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> Result<(), MediaFault> {
        self.record(OutputCall::SetVolume(volume));
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<(), MediaFault> {
        self.record(OutputCall::SetMuted(muted));
        Ok(())
    }

    fn take_fault_events(&self) -> Option<mpsc::Receiver<MediaFault>> {
        // Bridge the unbounded test channel onto the bounded trait type.
        let mut unbounded = self.fault_rx.lock().unwrap().take()?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(fault) = unbounded.recv().await {
                if tx.send(fault).await.is_err() {
                    break;
                }
            }
        });
        Some(rx)
    }
}

/// Status client that replays scripted results, then repeats the last
/// successful status.
pub struct FakeStatusClient {
    script: Mutex<VecDeque<Result<BroadcastStreamStatus, StatusError>>>,
    last_ok: Mutex<Option<BroadcastStreamStatus>>,
    fetches: AtomicUsize,
}

impl FakeStatusClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            last_ok: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn push_ok(&self, status: BroadcastStreamStatus) {
        self.script.lock().unwrap().push_back(Ok(status));
    }

    pub fn push_err(&self, error: StatusError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusClient for FakeStatusClient {
    async fn fetch_status(&self) -> Result<BroadcastStreamStatus, StatusError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => {
                *self.last_ok.lock().unwrap() = Some(status.clone());
                Ok(status)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last_ok
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| StatusError::Http("nothing scripted".to_string())),
        }
    }
}
