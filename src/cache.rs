//! Cached usage snapshot served by the HTTP handlers.
//!
//! The background refresh task is the only writer; `/metrics` and `/health`
//! read the last snapshot without touching the sampler.

use herakles_proc_usage::UsageSnapshot;
use std::time::Instant;

/// Last sample plus metadata about the refresh that produced it.
#[derive(Clone, Debug, Default)]
pub struct UsageCache {
    pub snapshot: Option<UsageSnapshot>,
    pub last_updated: Option<Instant>,
    pub update_duration_seconds: f64,
    pub update_success: bool,
    pub last_error: Option<String>,
}

impl UsageCache {
    /// Stores a successful sample.
    pub fn store(&mut self, snapshot: UsageSnapshot, started: Instant) {
        self.snapshot = Some(snapshot);
        self.last_updated = Some(started);
        self.update_duration_seconds = started.elapsed().as_secs_f64();
        self.update_success = true;
        self.last_error = None;
    }

    /// Records a failed refresh. The previous snapshot stays available.
    pub fn fail(&mut self, error: String, started: Instant) {
        self.update_duration_seconds = started.elapsed().as_secs_f64();
        self.update_success = false;
        self.last_error = Some(error);
    }

    pub fn is_healthy(&self) -> bool {
        self.update_success && self.last_updated.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_previous_snapshot() {
        let mut cache = UsageCache::default();
        assert!(!cache.is_healthy());

        let snapshot = UsageSnapshot {
            cpu_percent: 1.5,
            rss_bytes: 4096,
            vss_bytes: 8192,
        };
        cache.store(snapshot, Instant::now());
        assert!(cache.is_healthy());

        cache.fail("read failed".into(), Instant::now());
        assert!(!cache.is_healthy());
        assert_eq!(cache.snapshot, Some(snapshot));
        assert_eq!(cache.last_error.as_deref(), Some("read failed"));
    }
}
