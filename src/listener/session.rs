//! Listener session: wires the poller, playback engine and recovery banner
//! for one listening run, with an explicit teardown.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::banner::RecoveryBanner;
use super::playback::{MediaOutput, PlaybackEngine};
use super::poller::StatusPoller;
use super::status::StatusClient;

#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub banner_grace: Duration,
    pub default_volume: u8,
}

pub struct ListenerSession {
    engine: Arc<PlaybackEngine>,
    poller: StatusPoller,
    banner: RecoveryBanner,
    fault_forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerSession {
    /// Build the session and start polling.
    pub fn start(
        output: Arc<dyn MediaOutput>,
        status: Arc<dyn StatusClient>,
        settings: ListenerSettings,
    ) -> Self {
        let faults = output.take_fault_events();
        let engine = Arc::new(PlaybackEngine::new(
            output,
            Arc::clone(&status),
            settings.default_volume,
            settings.retry_delay,
        ));

        let fault_forwarder = faults.map(|mut faults| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                while let Some(fault) = faults.recv().await {
                    if let Err(e) = engine.report_fault(fault).await {
                        warn!("ListenerSession: playback could not recover: {}", e);
                    }
                }
                debug!("ListenerSession: fault stream closed");
            })
        });

        let banner = RecoveryBanner::spawn(engine.recovering(), settings.banner_grace);
        let poller = StatusPoller::new(status, Some(Arc::clone(&engine)));
        poller.start(settings.poll_interval);

        info!("ListenerSession: started");
        Self {
            engine,
            poller,
            banner,
            fault_forwarder: Mutex::new(fault_forwarder),
        }
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn banner(&self) -> &RecoveryBanner {
        &self.banner
    }

    /// Stop timers and playback. Safe to call more than once.
    pub async fn teardown(&self) {
        self.poller.stop();
        self.banner.stop();
        let forwarder = self.fault_forwarder.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = forwarder {
            handle.abort();
        }
        if let Err(e) = self.engine.stop().await {
            warn!("ListenerSession: stop failed: {}", e);
        }
        info!("ListenerSession: torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::playback::{MediaFault, PlaybackState};
    use crate::listener::status::BroadcastStreamStatus;
    use crate::test_support::{FakeOutput, FakeStatusClient};

    fn settings() -> ListenerSettings {
        ListenerSettings {
            poll_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(3),
            banner_grace: Duration::from_secs(4),
            default_volume: 80,
        }
    }

    fn live() -> BroadcastStreamStatus {
        BroadcastStreamStatus {
            live: true,
            streaming: true,
            stream_url: Some("http://radio.example.edu/live".into()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_fault_triggers_reload() {
        let output = FakeOutput::new();
        let status = FakeStatusClient::new();
        status.push_ok(live());
        let session = ListenerSession::start(output.clone(), status, settings());

        session.engine().play().await.unwrap();
        output.emit_fault(MediaFault::Network("connection reset".into()));
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(output.load_count(), 2);
        assert_eq!(session.engine().session().state, PlaybackState::Playing);
        assert!(!session.banner().is_visible());

        session.teardown().await;
        assert_eq!(session.engine().session().state, PlaybackState::Idle);
        assert!(!session.poller().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_station_going_offline_stops_listener() {
        let output = FakeOutput::new();
        let status = FakeStatusClient::new();
        status.push_ok(live());
        let session = ListenerSession::start(output, status.clone(), settings());
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.engine().play().await.unwrap();
        status.push_ok(BroadcastStreamStatus::default());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(session.engine().session().state, PlaybackState::Idle);
        session.teardown().await;
    }
}
