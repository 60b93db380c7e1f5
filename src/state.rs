//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background refresh task.

use herakles_proc_usage::UsageProvider;
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::UsageCache;
use crate::config::Config;
use crate::health_stats::HealthStats;
use crate::metrics::UsageMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub metrics: UsageMetrics,
    pub provider: Arc<dyn UsageProvider>,
    pub cache: RwLock<UsageCache>,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn UsageProvider>,
        config: Config,
    ) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = UsageMetrics::new(&registry)?;
        Ok(Self {
            registry,
            metrics,
            provider,
            cache: RwLock::new(UsageCache::default()),
            config: Arc::new(config),
            health_stats: Arc::new(HealthStats::new()),
        })
    }
}
