//! Prometheus metrics definitions for herakles-proc-usage.
//!
//! Only the exporter's own process is described, so every metric is a plain
//! unlabelled gauge or counter.

use herakles_proc_usage::UsageSnapshot;
use prometheus::{Gauge, IntCounter, Registry};
use tracing::debug;

use crate::cache::UsageCache;
use crate::config::Config;

/// Collection of Prometheus metrics for the self-usage sample.
#[derive(Clone)]
pub struct UsageMetrics {
    pub cpu_percent: Gauge,
    pub rss_bytes: Gauge,
    pub vss_bytes: Gauge,
    pub sample_success: Gauge,
    pub sample_duration: Gauge,
    pub samples_total: IntCounter,
    pub sample_errors_total: IntCounter,
}

impl UsageMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let cpu_percent = Gauge::new(
            "herakles_proc_usage_cpu_percent",
            "CPU usage of this process in percent of one core, smoothed over the last interval",
        )?;
        let rss_bytes = Gauge::new(
            "herakles_proc_usage_rss_bytes",
            "Resident set size of this process in bytes",
        )?;
        let vss_bytes = Gauge::new(
            "herakles_proc_usage_vss_bytes",
            "Virtual set size of this process in bytes",
        )?;
        let sample_success = Gauge::new(
            "herakles_proc_usage_sample_success",
            "Whether the last usage sample was successful (1) or failed (0)",
        )?;
        let sample_duration = Gauge::new(
            "herakles_proc_usage_sample_duration_seconds",
            "Time spent taking the last usage sample",
        )?;
        let samples_total = IntCounter::new(
            "herakles_proc_usage_samples_total",
            "Number of successful usage samples",
        )?;
        let sample_errors_total = IntCounter::new(
            "herakles_proc_usage_sample_errors_total",
            "Number of failed usage samples",
        )?;

        registry.register(Box::new(cpu_percent.clone()))?;
        registry.register(Box::new(rss_bytes.clone()))?;
        registry.register(Box::new(vss_bytes.clone()))?;
        registry.register(Box::new(sample_success.clone()))?;
        registry.register(Box::new(sample_duration.clone()))?;
        registry.register(Box::new(samples_total.clone()))?;
        registry.register(Box::new(sample_errors_total.clone()))?;

        Ok(Self {
            cpu_percent,
            rss_bytes,
            vss_bytes,
            sample_success,
            sample_duration,
            samples_total,
            sample_errors_total,
        })
    }

    /// Copies the cached sample into the gauges, honoring the enable flags.
    pub fn apply(&self, cache: &UsageCache, config: &Config) {
        self.sample_success
            .set(if cache.update_success { 1.0 } else { 0.0 });
        self.sample_duration.set(cache.update_duration_seconds);

        if let Some(snapshot) = &cache.snapshot {
            self.set_snapshot(snapshot, config);
        }
    }

    fn set_snapshot(&self, snapshot: &UsageSnapshot, config: &Config) {
        if config.enable_cpu.unwrap_or(true) {
            self.cpu_percent.set(snapshot.cpu_percent);
        }
        // Negative memory values mark unparseable fields; keep the last good value.
        if config.enable_rss.unwrap_or(true) {
            if snapshot.rss_bytes >= 0 {
                self.rss_bytes.set(snapshot.rss_bytes as f64);
            } else {
                debug!("RSS unknown in current sample, keeping previous value");
            }
        }
        if config.enable_vss.unwrap_or(true) {
            if snapshot.vss_bytes >= 0 {
                self.vss_bytes.set(snapshot.vss_bytes as f64);
            } else {
                debug!("VSS unknown in current sample, keeping previous value");
            }
        }
    }
}
