//! Background refresh of the cached usage snapshot.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, instrument, warn};

use crate::state::SharedState;

/// Takes one sample from the provider and stores it in the cache.
#[instrument(skip(state))]
pub async fn update_cache(state: &SharedState) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    debug!("Starting usage refresh");

    // Sampling may block on file I/O or the counter settle delay
    let provider = state.provider.clone();
    let result = tokio::task::spawn_blocking(move || provider.usage()).await?;

    let mut cache = state.cache.write().await;
    match result {
        Ok(snapshot) => {
            cache.store(snapshot, start);
            state.metrics.samples_total.inc();
            state.metrics.apply(&cache, &state.config);
            drop(cache);

            state
                .health_stats
                .record_sample(start.elapsed().as_secs_f64(), snapshot.cpu_percent);

            if !snapshot.is_complete() {
                warn!("Usage sample has unknown fields: {:?}", snapshot);
            }
            debug!(
                "Usage refresh completed: cpu={:.1}% rss={} vss={} in {:.3}ms",
                snapshot.cpu_percent,
                snapshot.rss_bytes,
                snapshot.vss_bytes,
                start.elapsed().as_secs_f64() * 1000.0
            );
            Ok(())
        }
        Err(e) => {
            cache.fail(e.to_string(), start);
            state.metrics.sample_errors_total.inc();
            state.metrics.apply(&cache, &state.config);
            drop(cache);

            state.health_stats.record_error();
            if e.is_transient() {
                warn!("Transient usage sample failure: {}", e);
            }
            Err(e.into())
        }
    }
}

/// Spawns the periodic refresh loop.
pub fn spawn_refresh_task(state: SharedState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the initial refresh already ran
        ticker.tick().await;
        debug!(
            "Background refresh task started with {}s interval",
            period.as_secs()
        );

        loop {
            ticker.tick().await;
            if let Err(e) = update_cache(&state).await {
                error!("Scheduled usage refresh failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::AppState;
    use herakles_proc_usage::{FixedUsage, UsageError, UsageProvider, UsageSnapshot};
    use std::sync::Arc;

    struct Failing;

    impl UsageProvider for Failing {
        fn usage(&self) -> Result<UsageSnapshot, UsageError> {
            Err(UsageError::PidNotFound { pid: 7 })
        }
    }

    fn state_with(provider: Arc<dyn UsageProvider>) -> SharedState {
        Arc::new(AppState::new(provider, Config::default()).unwrap())
    }

    #[tokio::test]
    async fn test_update_cache_stores_snapshot() {
        let snapshot = UsageSnapshot {
            cpu_percent: 25.0,
            rss_bytes: 1 << 20,
            vss_bytes: 1 << 24,
        };
        let state = state_with(Arc::new(FixedUsage(snapshot)));

        update_cache(&state).await.unwrap();

        let cache = state.cache.read().await;
        assert!(cache.is_healthy());
        assert_eq!(cache.snapshot, Some(snapshot));
        assert_eq!(state.metrics.samples_total.get(), 1);
        assert_eq!(state.metrics.cpu_percent.get(), 25.0);
        assert_eq!(state.health_stats.total_samples(), 1);
    }

    #[tokio::test]
    async fn test_update_cache_records_failure() {
        let state = state_with(Arc::new(Failing));

        assert!(update_cache(&state).await.is_err());

        let cache = state.cache.read().await;
        assert!(!cache.is_healthy());
        assert!(cache.last_error.as_deref().unwrap().contains("7"));
        assert_eq!(state.metrics.sample_errors_total.get(), 1);
        assert_eq!(state.metrics.sample_success.get(), 0.0);
        assert_eq!(state.health_stats.failed_samples(), 1);
    }
}
