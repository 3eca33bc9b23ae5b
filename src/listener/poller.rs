//! Stream Status Poller.
//!
//! Fetches the station status on a fixed interval and publishes the latest
//! reading. A failed fetch keeps the previous status and raises the error flag
//! until the next successful fetch. The poller is the authority on liveness:
//! when a reading says the station is off air, active playback is halted.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::playback::PlaybackEngine;
use super::status::{BroadcastStreamStatus, StatusClient, StatusError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct PollSnapshot {
    pub status: Option<BroadcastStreamStatus>,
    pub fetch_error: Option<StatusError>,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PollSnapshot {
    pub fn is_live(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.live)
    }
}

struct PollerInner {
    client: Arc<dyn StatusClient>,
    engine: Option<Arc<PlaybackEngine>>,
    snapshot: watch::Sender<PollSnapshot>,
}

impl PollerInner {
    async fn poll_once(&self) -> PollSnapshot {
        match self.client.fetch_status().await {
            Ok(status) => {
                let live = status.live;
                self.snapshot.send_replace(PollSnapshot {
                    status: Some(status),
                    fetch_error: None,
                    consecutive_failures: 0,
                    last_success_at: Some(Utc::now()),
                });

                if !live {
                    if let Some(engine) = &self.engine {
                        if engine.halt_offline().await {
                            info!("StatusPoller: station is off air, stopped playback");
                        }
                    }
                }
            }
            Err(e) => {
                self.snapshot.send_modify(|snapshot| {
                    snapshot.consecutive_failures = snapshot.consecutive_failures.saturating_add(1);
                    warn!(
                        "StatusPoller: fetch failed ({} in a row): {}",
                        snapshot.consecutive_failures, e
                    );
                    snapshot.fetch_error = Some(e);
                });
            }
        }
        self.snapshot.borrow().clone()
    }
}

pub struct StatusPoller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl StatusPoller {
    pub fn new(client: Arc<dyn StatusClient>, engine: Option<Arc<PlaybackEngine>>) -> Self {
        let (snapshot, _) = watch::channel(PollSnapshot::default());
        Self {
            inner: Arc::new(PollerInner {
                client,
                engine,
                snapshot,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Fetch once, outside the periodic schedule.
    pub async fn poll_once(&self) -> PollSnapshot {
        self.inner.poll_once().await
    }

    /// Start polling every `interval`, first tick immediately. Calling it
    /// again replaces the running task instead of adding a second one.
    pub fn start(&self, interval: Duration) {
        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = inner.poll_once() => {}
                }
            }
            debug!("StatusPoller: task exited");
        });

        let previous = match self.task.lock() {
            Ok(mut slot) => slot.replace((token, handle)),
            Err(poisoned) => poisoned.into_inner().replace((token, handle)),
        };
        if let Some((old_token, old_handle)) = previous {
            old_token.cancel();
            old_handle.abort();
        }
        info!("StatusPoller: polling every {:?}", interval);
    }

    pub fn stop(&self) {
        let previous = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((token, handle)) = previous {
            token.cancel();
            handle.abort();
            info!("StatusPoller: stopped");
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
