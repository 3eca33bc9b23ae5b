//! Recovery banner debouncing.
//!
//! The "reconnecting" banner only shows once the recovering signal has been
//! true continuously for the grace period, and hides the moment it drops.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_GRACE: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone)]
pub struct RecoveryDebouncer {
    grace: Duration,
    since: Option<Instant>,
    visible: bool,
}

impl RecoveryDebouncer {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            since: None,
            visible: false,
        }
    }

    /// Feed the current signal value, returning whether the banner shows.
    pub fn observe(&mut self, recovering: bool, now: Instant) -> bool {
        if !recovering {
            self.since = None;
            self.visible = false;
            return false;
        }
        let since = *self.since.get_or_insert(now);
        self.visible = now.saturating_duration_since(since) >= self.grace;
        self.visible
    }

    /// When the banner would become visible if the signal holds.
    pub fn deadline(&self) -> Option<Instant> {
        if self.visible {
            return None;
        }
        self.since.map(|since| since + self.grace)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Background task that turns a recovering signal into a banner flag.
pub struct RecoveryBanner {
    visible: watch::Receiver<bool>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RecoveryBanner {
    pub fn spawn(signal: watch::Receiver<bool>, grace: Duration) -> Self {
        let (tx, visible) = watch::channel(false);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(signal, tx, grace, token.clone()));
        Self {
            visible,
            token,
            handle,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.visible.clone()
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub fn stop(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

impl Drop for RecoveryBanner {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    mut signal: watch::Receiver<bool>,
    tx: watch::Sender<bool>,
    grace: Duration,
    token: CancellationToken,
) {
    let mut debouncer = RecoveryDebouncer::new(grace);
    loop {
        let recovering = *signal.borrow_and_update();
        let visible = debouncer.observe(recovering, Instant::now());
        tx.send_if_modified(|current| {
            if *current == visible {
                return false;
            }
            debug!("RecoveryBanner: visible={}", visible);
            *current = visible;
            true
        });

        let deadline = debouncer.deadline();
        tokio::select! {
            _ = token.cancelled() => break,
            changed = signal.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
        }
    }
    tx.send_replace(false);
}
