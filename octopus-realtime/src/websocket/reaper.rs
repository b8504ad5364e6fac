//! Background eviction of idle clients

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::ClientRegistry;

/// Running stale-connection reaper
///
/// Dropping this handle leaves the task running; call
/// [`StaleConnectionReaper::shutdown`] to stop it.
#[derive(Debug)]
pub struct StaleConnectionReaper {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl StaleConnectionReaper {
    /// Whether the reaper task is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }

    /// Stop the reaper and wait for the task to finish
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        if let Err(e) = self.join_handle.await {
            tracing::warn!(error = %e, "Stale connection reaper ended abnormally");
        }
    }
}

/// Clears the registry's reaper flag when the task ends, aborted or not
struct RunningFlag(Arc<ClientRegistry>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.reaper_running.store(false, Ordering::Release);
    }
}

impl ClientRegistry {
    /// Start evicting clients idle for longer than `max_idle`, every `interval`
    ///
    /// At most one reaper runs per registry. Returns `None` if one is
    /// already running.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> Option<StaleConnectionReaper> {
        if self
            .reaper_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Stale connection reaper already running");
            return None;
        }

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let flag = RunningFlag(Arc::clone(self));
        // tokio::time::interval panics on a zero period
        let interval = interval.max(Duration::from_millis(1));

        let join_handle = tokio::spawn(async move {
            let registry = &flag.0;
            tracing::info!(
                interval_secs = interval.as_secs_f64(),
                max_idle_secs = max_idle.as_secs(),
                "Stale connection reaper started"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.cleanup_stale_connections(max_idle);
                    }
                }
            }

            tracing::info!("Stale connection reaper stopped");
        });

        Some(StaleConnectionReaper {
            cancellation_token,
            join_handle,
        })
    }

    /// Whether a reaper is running for this registry
    #[must_use]
    pub fn reaper_active(&self) -> bool {
        self.reaper_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    #[tokio::test]
    async fn test_reaper_evicts_stale_clients() {
        let registry = Arc::new(ClientRegistry::new());
        registry.add_client("fresh", "conn-1");
        registry.add_client("stale", "conn-2");
        registry.update("stale", |info| {
            info.last_seen = Utc::now() - TimeDelta::minutes(30);
        });

        let reaper = registry
            .spawn_reaper(Duration::from_millis(10), Duration::from_secs(600))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!registry.is_user_connected("stale"));
        assert!(registry.is_user_connected("fresh"));

        reaper.shutdown().await;
    }

    #[tokio::test]
    async fn test_only_one_reaper_per_registry() {
        let registry = Arc::new(ClientRegistry::new());

        let first = registry
            .spawn_reaper(Duration::from_secs(60), Duration::from_secs(600))
            .unwrap();
        assert!(registry.reaper_active());
        assert!(first.is_running());
        assert!(registry
            .spawn_reaper(Duration::from_secs(60), Duration::from_secs(600))
            .is_none());

        first.shutdown().await;
        assert!(!registry.reaper_active());

        let second = registry.spawn_reaper(Duration::from_secs(60), Duration::from_secs(600));
        assert!(second.is_some());
        if let Some(reaper) = second {
            reaper.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_aborted_reaper_releases_registry() {
        let registry = Arc::new(ClientRegistry::new());
        let StaleConnectionReaper { join_handle, .. } = registry
            .spawn_reaper(Duration::from_secs(60), Duration::from_secs(600))
            .unwrap();

        join_handle.abort();
        assert!(join_handle.await.unwrap_err().is_cancelled());

        assert!(!registry.reaper_active());
        let restarted = registry
            .spawn_reaper(Duration::from_secs(60), Duration::from_secs(600))
            .unwrap();
        restarted.shutdown().await;
    }

    #[test]
    fn test_dropped_runtime_releases_registry() {
        let registry = Arc::new(ClientRegistry::new());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let reaper = runtime.block_on(async {
            registry.spawn_reaper(Duration::from_secs(60), Duration::from_secs(600))
        });
        assert!(reaper.is_some());
        assert!(registry.reaper_active());

        drop(runtime);
        assert!(!registry.reaper_active());
    }
}
