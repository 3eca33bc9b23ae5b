//! mpv-backed listener output over JSON IPC.
//!
//! mpv runs idle in the background with an IPC socket. Commands are written
//! as JSON lines tagged with a `request_id`; a reader task matches replies to
//! waiting callers and forwards unsolicited events (`file-loaded`,
//! `end-file`) to the event router. An `end-file` error outside of a load is
//! reported as a playback fault.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::playback::{MediaFault, MediaOutput};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const SOCKET_WAIT_ATTEMPTS: usize = 50;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

struct Request {
    id: u64,
    line: String,
    reply: oneshot::Sender<Result<Value>>,
}

struct Connection {
    commands: mpsc::Sender<Request>,
    router: JoinHandle<()>,
    // Spawned mpv, killed when the connection is dropped.
    _child: Option<Child>,
}

impl Connection {
    async fn send(&self, command: Value) -> Result<Value> {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        line.push('\n');

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Request { id, line, reply })
            .await
            .map_err(|_| anyhow!("mpv connection closed"))?;

        tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| anyhow!("mpv did not answer request {}", id))?
            .map_err(|_| anyhow!("mpv dropped request {}", id))?
    }

    fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.router.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.router.abort();
    }
}

pub struct MpvOutput {
    binary: String,
    socket_path: PathBuf,
    load_timeout: Duration,
    connection: Mutex<Option<Connection>>,
    loading: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    events: broadcast::Sender<Value>,
    fault_tx: mpsc::Sender<MediaFault>,
    fault_rx: std::sync::Mutex<Option<mpsc::Receiver<MediaFault>>>,
}

impl MpvOutput {
    pub fn new(binary: impl Into<String>, socket_path: impl Into<PathBuf>, load_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        let (fault_tx, fault_rx) = mpsc::channel(16);
        Self {
            binary: binary.into(),
            socket_path: socket_path.into(),
            load_timeout,
            connection: Mutex::new(None),
            loading: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            events,
            fault_tx,
            fault_rx: std::sync::Mutex::new(Some(fault_rx)),
        }
    }

    async fn command(&self, command: Value) -> Result<Value, MediaFault> {
        let mut guard = self.connection.lock().await;
        if guard.as_ref().map_or(true, Connection::is_closed) {
            *guard = Some(self.connect().await.map_err(|e| {
                warn!("mpv: unable to connect: {:#}", e);
                MediaFault::Network(format!("audio player unavailable: {e}"))
            })?);
        }
        let Some(connection) = guard.as_ref() else {
            return Err(MediaFault::Network("audio player unavailable".to_string()));
        };

        let result = connection.send(command).await;
        let closed = connection.is_closed();
        result.map_err(|e| {
            if closed {
                *guard = None;
            }
            MediaFault::Network(e.to_string())
        })
    }

    async fn connect(&self) -> Result<Connection> {
        if let Ok(stream) = UnixStream::connect(&self.socket_path).await {
            info!("mpv: attached to existing socket {:?}", self.socket_path);
            return Ok(self.start_io(stream, None));
        }

        let _ = tokio::fs::remove_file(&self.socket_path).await;
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        info!("mpv: spawning {}", self.binary);
        let child = tokio::process::Command::new(&self.binary)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg(format!("--input-ipc-server={}", self.socket_path.display()))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.binary))?;

        let stream = wait_for_socket(&self.socket_path).await?;
        Ok(self.start_io(stream, Some(child)))
    }

    fn start_io(&self, stream: UnixStream, child: Option<Child>) -> Connection {
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (commands, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        tokio::spawn(writer_task(write_half, command_rx, Arc::clone(&pending)));
        tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));
        let router = tokio::spawn(route_events(
            event_rx,
            self.events.clone(),
            self.fault_tx.clone(),
            Arc::clone(&self.loading),
            Arc::clone(&self.stopping),
        ));

        Connection {
            commands,
            router,
            _child: child,
        }
    }

    async fn wait_loaded(&self, mut events: broadcast::Receiver<Value>) -> Result<(), MediaFault> {
        loop {
            match events.recv().await {
                Ok(event) => match event.get("event").and_then(Value::as_str) {
                    Some("file-loaded") => return Ok(()),
                    Some("end-file") => {
                        if let Some(fault) = classify_end_file(&event) {
                            return Err(fault);
                        }
                    }
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("mpv: load waiter skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(MediaFault::Network("audio player closed".to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl MediaOutput for MpvOutput {
    async fn load(&self, url: &str) -> Result<(), MediaFault> {
        self.loading.store(true, Ordering::Release);
        self.stopping.store(false, Ordering::Release);
        let events = self.events.subscribe();

        let result = async {
            self.command(json!(["set_property", "pause", true])).await?;
            self.command(json!(["loadfile", url, "replace"])).await?;
            tokio::time::timeout(self.load_timeout, self.wait_loaded(events))
                .await
                .map_err(|_| MediaFault::Network("timed out opening stream".to_string()))?
        }
        .await;

        self.loading.store(false, Ordering::Release);
        result
    }

    async fn play(&self) -> Result<(), MediaFault> {
        self.command(json!(["set_property", "pause", false]))
            .await
            .map(|_| ())
    }

    async fn pause(&self) -> Result<(), MediaFault> {
        self.command(json!(["set_property", "pause", true]))
            .await
            .map(|_| ())
    }

    async fn stop(&self) -> Result<(), MediaFault> {
        self.stopping.store(true, Ordering::Release);
        self.command(json!(["stop"])).await.map(|_| ())
    }

    async fn set_volume(&self, volume: u8) -> Result<(), MediaFault> {
        self.command(json!(["set_property", "volume", f64::from(volume.min(100))]))
            .await
            .map(|_| ())
    }

    async fn set_muted(&self, muted: bool) -> Result<(), MediaFault> {
        self.command(json!(["set_property", "mute", muted]))
            .await
            .map(|_| ())
    }

    fn take_fault_events(&self) -> Option<mpsc::Receiver<MediaFault>> {
        self.fault_rx.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Map an `end-file` event to a fault. Normal ends (`stop`, `quit`,
/// `redirect`) are not faults.
fn classify_end_file(event: &Value) -> Option<MediaFault> {
    let reason = event.get("reason").and_then(Value::as_str).unwrap_or("");
    match reason {
        "error" => {
            let detail = event
                .get("file_error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            if detail.contains("format") || detail.contains("demux") || detail.contains("decod") {
                Some(MediaFault::Decode(detail))
            } else {
                Some(MediaFault::Network(detail))
            }
        }
        "eof" => Some(MediaFault::Network("stream ended".to_string())),
        _ => None,
    }
}

async fn wait_for_socket(path: &Path) -> Result<UnixStream> {
    for _ in 0..SOCKET_WAIT_ATTEMPTS {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(stream) = UnixStream::connect(path).await {
            info!("mpv: connected to {:?}", path);
            return Ok(stream);
        }
    }
    Err(anyhow!("mpv IPC socket did not appear at {}", path.display()))
}

async fn route_events(
    mut events: mpsc::Receiver<Value>,
    broadcast_tx: broadcast::Sender<Value>,
    faults: mpsc::Sender<MediaFault>,
    loading: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        if event.get("event").and_then(Value::as_str) == Some("end-file")
            && !loading.load(Ordering::Acquire)
            && !stopping.load(Ordering::Acquire)
        {
            if let Some(fault) = classify_end_file(&event) {
                warn!("mpv: playback fault: {}", fault);
                let _ = faults.try_send(fault);
            }
        }
        let _ = broadcast_tx.send(event);
    }

    if !loading.load(Ordering::Acquire) && !stopping.load(Ordering::Acquire) {
        let _ = faults.try_send(MediaFault::Network("audio player exited".to_string()));
    }
    debug!("mpv: event router exiting");
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: Pending, events: mpsc::Sender<Value>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: skipping '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(id) = value.get("request_id").and_then(Value::as_u64) {
                    if let Some(reply) = pending.lock().await.remove(&id) {
                        let result = match value.get("error").and_then(Value::as_str) {
                            Some("success") => Ok(value),
                            Some(err) => Err(anyhow!("mpv error: {}", err)),
                            None => Err(anyhow!("mpv reply without status")),
                        };
                        let _ = reply.send(result);
                    }
                } else if events.send(value).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: {}", e);
                break;
            }
        }
    }

    for (_, reply) in pending.lock().await.drain() {
        let _ = reply.send(Err(anyhow!("mpv connection closed")));
    }
}

async fn writer_task<W>(mut writer: W, mut requests: mpsc::Receiver<Request>, pending: Pending)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(request) = requests.recv().await {
        pending.lock().await.insert(request.id, request.reply);
        if let Err(e) = writer.write_all(request.line.as_bytes()).await {
            warn!("mpv writer: {}", e);
            if let Some(reply) = pending.lock().await.remove(&request.id) {
                let _ = reply.send(Err(anyhow!("mpv write failed: {}", e)));
            }
            break;
        }
    }
}
