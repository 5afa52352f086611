/// Periodic eviction sweep
///
/// Optional single background task that calls `evict_expired` on a fixed
/// interval. It is stopped explicitly through its handle at shutdown.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{TokenStore, TokenStoreBackend};

pub struct EvictionSweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl EvictionSweeper {
    /// Stop the sweep and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Eviction sweeper task failed");
        }
    }
}

/// Spawn the sweep loop on the current tokio runtime
pub fn spawn_eviction_sweeper(store: TokenStoreBackend, interval: Duration) -> EvictionSweeper {
    let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!(
            backend = store.name(),
            interval_secs = interval.as_secs(),
            "Eviction sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => match store.evict_expired().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(evicted = count, "Evicted expired tokens"),
                    Err(e) => tracing::warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "Eviction sweep failed"
                    ),
                },
            }
        }

        tracing::info!("Eviction sweeper stopped");
    });

    EvictionSweeper { shutdown, handle }
}
