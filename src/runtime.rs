//! Runtime - Graceful shutdown, signal handling and interruptible waits

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Shutdown signal broadcaster
///
/// Shared by the CLI signal handler, the onboarding loop and the monitor
/// pollers. Triggering is idempotent.
#[derive(Clone)]
pub struct Shutdown {
    sender: broadcast::Sender<()>,
    triggered: Arc<RwLock<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown").finish_non_exhaustive()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender, triggered: Arc::new(RwLock::new(false)) }
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown
    pub async fn trigger(&self) {
        let mut triggered = self.triggered.write().await;
        if !*triggered {
            *triggered = true;
            let _ = self.sender.send(());
        }
    }

    /// Check if shutdown was triggered
    pub async fn is_triggered(&self) -> bool {
        *self.triggered.read().await
    }

    /// Resolve once shutdown has been triggered, including before the call
    pub async fn cancelled(&self) {
        let mut receiver = self.subscribe();
        if self.is_triggered().await {
            return;
        }
        let _ = receiver.recv().await;
    }

    /// Sleep for `duration` unless shutdown fires first. Returns false on shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

/// Install signal handlers and return shutdown handle
pub fn install_signal_handlers() -> Shutdown {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                        _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    }
                }
                _ => {
                    tracing::warn!("Signal handlers unavailable; falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C");
            }
        }

        handle.trigger().await;
    });

    shutdown
}
