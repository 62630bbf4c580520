// Orphan Sweeper - periodic ScanForOrphans with graceful shutdown

use crate::application::queue::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every background task holding a token
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

/// Runs the orphan scan every `interval` until shut down
pub struct OrphanSweeper {
    scheduler: Arc<Scheduler>,
    interval: Duration,
}

impl OrphanSweeper {
    pub fn new(scheduler: Arc<Scheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Sweep loop; spawn with `tokio::spawn`
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(interval_secs = self.interval.as_secs(), "Orphan sweeper started");
        let mut tick = interval(self.interval);

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            tokio::select! {
                _ = tick.tick() => {
                    match self.scheduler.scan_for_orphans().await {
                        Ok(0) => {}
                        Ok(orphaned) => info!(orphaned, "Orphan scan failed stale jobs"),
                        Err(e) => error!(error = ?e, "Orphan scan failed"),
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Orphan sweeper stopped");
    }
}
