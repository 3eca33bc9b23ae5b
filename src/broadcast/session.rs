//! Broadcast session: the lifetime-scoped context for one DJ set.
//!
//! Built once per broadcast and torn down explicitly. It owns the level
//! monitor, the switch coordinator and the control panel, plus the
//! dead-source watchdog.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::control_panel::ControlPanel;
use super::coordinator::{SwitchCoordinator, SwitchError, SwitchReport};
use super::transport::{OutboundTransport, OutputNode};
use crate::capture::{AudioSourceId, CaptureNegotiator, DisplayCapture};
use crate::monitor::{LevelMonitor, MonitorSettings, NoiseGateConfig};

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

pub struct BroadcastSession {
    panel: ControlPanel,
    monitor: Arc<LevelMonitor>,
    coordinator: Arc<SwitchCoordinator>,
    transport: Arc<dyn OutboundTransport>,
    watchdog: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl BroadcastSession {
    pub fn new(
        platform: Arc<dyn DisplayCapture>,
        transport: Arc<dyn OutboundTransport>,
        output: Arc<dyn OutputNode>,
        monitor_settings: MonitorSettings,
        gate: NoiseGateConfig,
    ) -> Self {
        let panel = ControlPanel::new(output, gate);
        let monitor = Arc::new(LevelMonitor::new(monitor_settings, panel.gate_receiver()));
        let coordinator = Arc::new(SwitchCoordinator::new(
            CaptureNegotiator::new(platform),
            Arc::clone(&transport),
            Arc::clone(&monitor),
            panel.clone(),
        ));

        Self {
            panel,
            monitor,
            coordinator,
            transport,
            watchdog: Mutex::new(None),
        }
    }

    pub fn panel(&self) -> &ControlPanel {
        &self.panel
    }

    pub fn monitor(&self) -> &Arc<LevelMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<SwitchCoordinator> {
        &self.coordinator
    }

    /// Acquire the first source and go on air.
    pub async fn go_live(&self, source: AudioSourceId) -> Result<SwitchReport, SwitchError> {
        let report = self.coordinator.switch_source(source).await?;
        self.panel.set_live(true).await;
        self.start_watchdog().await;
        info!("BroadcastSession: live on {} ({})", report.source, report.stream);
        Ok(report)
    }

    async fn start_watchdog(&self) {
        let mut slot = self.watchdog.lock().await;
        if let Some((token, handle)) = slot.take() {
            token.cancel();
            handle.abort();
        }

        let token = CancellationToken::new();
        let coordinator = Arc::clone(&self.coordinator);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Some(stream) = coordinator.reap_dead_source().await {
                    warn!(
                        "BroadcastSession: {} stopped delivering audio, pick a new source",
                        stream
                    );
                }
            }
        });
        *slot = Some((token, handle));
    }

    /// End the broadcast: stop sampling, release the source, flush the
    /// transport. A switch still negotiating releases its grant when it
    /// finishes. Safe to call more than once.
    pub async fn teardown(&self) {
        self.panel.set_live(false).await;
        if let Some((token, handle)) = self.watchdog.lock().await.take() {
            token.cancel();
            let _ = handle.await;
        }
        self.coordinator.end().await;
        if let Err(e) = self.transport.shutdown().await {
            warn!("BroadcastSession: transport shutdown failed: {}", e);
        }
        info!("BroadcastSession: torn down");
    }
}
