//! Kernel-stat-file usage engine.
//!
//! Memory figures are read fresh from `/proc/<pid>/stat` on every call. CPU
//! utilization is a rate, so it is maintained by a background task that
//! samples the same file once per second and publishes the result through a
//! single atomic. Callers never block on that task.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::error::UsageError;
use crate::stat::StatRecord;
use crate::system::{SystemUptime, UptimeSource, CLOCK_TICKS_PER_SECOND, PAGE_SHIFT};
use crate::usage::{UsageProvider, UsageSnapshot, UNKNOWN};

/// Period of the CPU sampling task.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Stat file of the calling process.
pub fn own_stat_path() -> PathBuf {
    PathBuf::from(format!("/proc/{}/stat", std::process::id()))
}

/// One periodic CPU observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSample {
    /// User plus kernel ticks consumed so far.
    pub total_ticks: i64,
    /// Whole seconds the process has been alive.
    pub alive_seconds: i64,
}

impl CpuSample {
    /// Builds a sample from a stat record, `None` if a needed field is unknown.
    pub fn from_record(record: &StatRecord<'_>, uptime_seconds: i64, ticks_per_second: i64) -> Option<Self> {
        let total_ticks = record.utime()?.checked_add(record.stime()?)?;
        let start_ticks = record.start_ticks()?;
        Some(CpuSample {
            total_ticks,
            alive_seconds: uptime_seconds - start_ticks / ticks_per_second,
        })
    }
}

/// Smoothed CPU state.
///
/// The estimator is owned by the sampling task, which is the only writer of
/// the shared per-mille value.
#[derive(Debug)]
pub struct CpuEstimator {
    ticks_per_second: i64,
    last: Option<CpuSample>,
    permille: Arc<AtomicI64>,
}

impl CpuEstimator {
    pub fn new(ticks_per_second: i64) -> Self {
        CpuEstimator {
            ticks_per_second: ticks_per_second.max(1),
            last: None,
            permille: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Handle to the published estimate, in tenths of a percent.
    pub fn shared(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.permille)
    }

    pub fn ticks_per_second(&self) -> i64 {
        self.ticks_per_second
    }

    /// Feeds one observation and returns the newly published estimate.
    ///
    /// The first observation only primes the baseline. When no wall time has
    /// elapsed since the previous observation, or the tick delta is too large
    /// to scale, the old estimate stays in place.
    pub fn record(&mut self, sample: CpuSample) -> Option<i64> {
        let previous = self.last.replace(sample)?;

        let ticks = sample.total_ticks - previous.total_ticks;
        let seconds = sample.alive_seconds - previous.alive_seconds;
        if seconds <= 0 {
            return None;
        }

        let permille = ticks.checked_mul(1000)? / self.ticks_per_second / seconds;
        self.permille.store(permille, Ordering::Relaxed);
        Some(permille)
    }

    pub fn permille(&self) -> i64 {
        self.permille.load(Ordering::Relaxed)
    }
}

/// Usage engine backed by the kernel stat pseudo-file.
///
/// Must be started from within a Tokio runtime. Dropping the sampler stops the
/// background task.
pub struct StatSampler {
    stat_path: PathBuf,
    cpu_permille: Arc<AtomicI64>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StatSampler {
    /// Starts sampling the calling process.
    pub fn start() -> Result<Self, UsageError> {
        Self::start_with(own_stat_path(), Arc::new(SystemUptime))
    }

    /// Starts sampling an arbitrary stat file with the given uptime source.
    pub fn start_with(
        stat_path: impl Into<PathBuf>,
        uptime: Arc<dyn UptimeSource>,
    ) -> Result<Self, UsageError> {
        Self::spawn(stat_path.into(), uptime, SAMPLE_INTERVAL)
    }

    pub(crate) fn spawn(
        stat_path: PathBuf,
        uptime: Arc<dyn UptimeSource>,
        period: Duration,
    ) -> Result<Self, UsageError> {
        let handle = Handle::try_current().map_err(|_| UsageError::NoRuntime)?;

        let estimator = CpuEstimator::new(CLOCK_TICKS_PER_SECOND);
        let cpu_permille = estimator.shared();
        let (stop, stop_rx) = watch::channel(false);

        let task = PeriodicTask {
            stat_path: stat_path.clone(),
            uptime,
            estimator,
            period,
        };
        let task = handle.spawn(task.run(stop_rx));

        info!(
            "CPU sampling started for {} every {}ms",
            stat_path.display(),
            period.as_millis()
        );

        Ok(StatSampler {
            stat_path,
            cpu_permille,
            stop,
            task: Some(task),
        })
    }

    pub fn stat_path(&self) -> &Path {
        &self.stat_path
    }

    /// Current CPU estimate in tenths of a percent.
    pub fn cpu_permille(&self) -> i64 {
        self.cpu_permille.load(Ordering::Relaxed)
    }

    /// Stops the sampling task and waits for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StatSampler {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

impl UsageProvider for StatSampler {
    fn usage(&self) -> Result<UsageSnapshot, UsageError> {
        let contents = fs::read(&self.stat_path).map_err(|source| UsageError::Read {
            path: self.stat_path.clone(),
            source,
        })?;
        let record = StatRecord::parse(&contents);

        let rss_pages = record.rss_pages().unwrap_or(UNKNOWN);
        Ok(UsageSnapshot {
            cpu_percent: self.cpu_permille() as f64 / 10.0,
            rss_bytes: rss_pages << PAGE_SHIFT,
            vss_bytes: record.vss_bytes().unwrap_or(UNKNOWN),
        })
    }
}

struct PeriodicTask {
    stat_path: PathBuf,
    uptime: Arc<dyn UptimeSource>,
    estimator: CpuEstimator,
    period: Duration,
}

impl PeriodicTask {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("CPU sampling stopped for {}", self.stat_path.display());
    }

    async fn tick(&mut self) {
        match self.sample().await {
            Ok(Some(sample)) => {
                if let Some(permille) = self.estimator.record(sample) {
                    trace!("CPU estimate updated to {:.1}%", permille as f64 / 10.0);
                }
            }
            Ok(None) => debug!(
                "Skipping CPU tick: unreadable time fields in {}",
                self.stat_path.display()
            ),
            // The next tick retries.
            Err(e) => debug!("CPU sampling tick failed: {}", e),
        }
    }

    async fn sample(&self) -> Result<Option<CpuSample>, UsageError> {
        let contents = tokio::fs::read(&self.stat_path)
            .await
            .map_err(|source| UsageError::Read {
                path: self.stat_path.clone(),
                source,
            })?;
        let uptime = self.uptime.uptime_seconds()?;
        let record = StatRecord::parse(&contents);
        Ok(CpuSample::from_record(
            &record,
            uptime,
            self.estimator.ticks_per_second(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::tests::stat_line;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Instant;
    use tempfile::TempDir;

    const START_TICKS: i64 = 5_000;

    /// Uptime source that simulates a busy process: each query advances
    /// uptime by 2s and rewrites the stat file with `step` more ticks for the
    /// next read (200 by default, one full core). While paused every query
    /// fails and the file is left alone.
    struct BusyProcess {
        path: PathBuf,
        calls: AtomicUsize,
        total: AtomicI64,
        step: AtomicI64,
        paused: AtomicBool,
    }

    impl BusyProcess {
        fn new(path: PathBuf) -> Self {
            write_stat(&path, 0);
            BusyProcess {
                path,
                calls: AtomicUsize::new(0),
                total: AtomicI64::new(0),
                step: AtomicI64::new(200),
                paused: AtomicBool::new(false),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }

        fn resume_with_step(&self, step: i64) {
            self.step.store(step, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    impl UptimeSource for BusyProcess {
        fn uptime_seconds(&self) -> Result<i64, UsageError> {
            if self.paused.load(Ordering::SeqCst) {
                return Err(UsageError::Uptime(std::io::Error::other("paused")));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
            let step = self.step.load(Ordering::SeqCst);
            let total = self.total.fetch_add(step, Ordering::SeqCst) + step;
            write_stat(&self.path, total);
            Ok(START_TICKS / 100 + 2 * n)
        }
    }

    struct FrozenUptime;

    impl UptimeSource for FrozenUptime {
        fn uptime_seconds(&self) -> Result<i64, UsageError> {
            Ok(1_000)
        }
    }

    fn write_stat(path: &Path, total_ticks: i64) {
        let utime = (total_ticks - total_ticks / 4).to_string();
        let stime = (total_ticks / 4).to_string();
        let line = stat_line("busy", &utime, &stime, &START_TICKS.to_string(), "209715200", "3000");
        fs::write(path, line).unwrap();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_estimator_full_core() {
        let mut estimator = CpuEstimator::new(100);
        let first = CpuSample {
            total_ticks: 1_000,
            alive_seconds: 40,
        };
        assert_eq!(estimator.record(first), None);
        assert_eq!(estimator.permille(), 0);

        let second = CpuSample {
            total_ticks: 1_200,
            alive_seconds: 42,
        };
        assert_eq!(estimator.record(second), Some(1000));
        assert_eq!(estimator.permille() as f64 / 10.0, 100.0);
    }

    #[test]
    fn test_estimator_keeps_value_without_elapsed_time() {
        let mut estimator = CpuEstimator::new(100);
        estimator.record(CpuSample {
            total_ticks: 0,
            alive_seconds: 10,
        });
        estimator.record(CpuSample {
            total_ticks: 50,
            alive_seconds: 11,
        });
        assert_eq!(estimator.permille(), 500);

        // Same second: no update.
        assert_eq!(
            estimator.record(CpuSample {
                total_ticks: 90,
                alive_seconds: 11,
            }),
            None
        );
        // Clock stepped backwards: no update either.
        assert_eq!(
            estimator.record(CpuSample {
                total_ticks: 95,
                alive_seconds: 9,
            }),
            None
        );
        assert_eq!(estimator.permille(), 500);
    }

    #[test]
    fn test_estimator_skips_overflowing_delta() {
        let mut estimator = CpuEstimator::new(100);
        estimator.record(CpuSample {
            total_ticks: 0,
            alive_seconds: 0,
        });
        estimator.record(CpuSample {
            total_ticks: 100,
            alive_seconds: 1,
        });
        assert_eq!(
            estimator.record(CpuSample {
                total_ticks: i64::MAX / 10,
                alive_seconds: 2,
            }),
            None
        );
        assert_eq!(estimator.permille(), 1000);
    }

    #[test]
    fn test_estimator_uses_two_most_recent_samples() {
        let mut estimator = CpuEstimator::new(100);
        for (ticks, secs) in [(0, 0), (100, 1), (100, 2)] {
            estimator.record(CpuSample {
                total_ticks: ticks,
                alive_seconds: secs,
            });
        }
        assert_eq!(estimator.permille(), 0);
    }

    #[test]
    fn test_sample_from_record() {
        let line = stat_line("x", "300", "100", "2500", "0", "0");
        let record = StatRecord::parse(line.as_bytes());
        let sample = CpuSample::from_record(&record, 100, 100).unwrap();
        assert_eq!(sample.total_ticks, 400);
        assert_eq!(sample.alive_seconds, 75);

        let line = stat_line("x", "3?0", "100", "2500", "0", "0");
        let record = StatRecord::parse(line.as_bytes());
        assert!(CpuSample::from_record(&record, 100, 100).is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = StatSampler::start_with("/nonexistent/stat", Arc::new(FrozenUptime));
        assert!(matches!(result, Err(UsageError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_fresh_sampler_reports_zero_cpu() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        write_stat(&path, 12_345);

        let sampler = StatSampler::start_with(&path, Arc::new(FrozenUptime)).unwrap();
        let snapshot = sampler.usage().unwrap();
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert_eq!(snapshot.rss_bytes, 3000 << 12);
        assert_eq!(snapshot.vss_bytes, 209715200);
        assert!(snapshot.is_complete());
        sampler.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_rss_yields_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        let line = stat_line("herakles", "1", "1", "100", "8192", "30a0");
        fs::write(&path, line).unwrap();

        let sampler = StatSampler::start_with(&path, Arc::new(FrozenUptime)).unwrap();
        let snapshot = sampler.usage().unwrap();
        assert_eq!(snapshot.rss_bytes, -1 << 12);
        assert_eq!(snapshot.vss_bytes, 8192);
        sampler.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_stat_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");

        let sampler = StatSampler::start_with(&path, Arc::new(FrozenUptime)).unwrap();
        match sampler.usage() {
            Err(UsageError::Read { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected read error, got {:?}", other),
        }
        sampler.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_task_publishes_estimate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        let busy = Arc::new(BusyProcess::new(path.clone()));

        let sampler =
            StatSampler::spawn(path, busy.clone(), Duration::from_millis(10)).unwrap();
        assert!(wait_until(|| sampler.cpu_permille() == 1000).await);
        assert_eq!(sampler.usage().unwrap().cpu_percent, 100.0);
        sampler.shutdown().await;
    }

    #[tokio::test]
    async fn test_estimate_is_stable_between_ticks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        let busy = Arc::new(BusyProcess::new(path.clone()));

        let sampler =
            StatSampler::spawn(path.clone(), busy.clone(), Duration::from_millis(10)).unwrap();
        assert!(wait_until(|| sampler.cpu_permille() == 1000).await);

        // Ticks keep firing but none of them can publish a new estimate.
        busy.pause();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A stat file that no longer matches the estimate; memory follows it, CPU does not.
        let line = stat_line("busy", "1", "1", &START_TICKS.to_string(), "4096", "7");
        fs::write(&path, line).unwrap();
        let a = sampler.usage().unwrap();
        let b = sampler.usage().unwrap();
        assert_eq!(a.cpu_percent, 100.0);
        assert_eq!(b.cpu_percent, 100.0);
        assert_eq!(a.rss_bytes, 7 << 12);

        // Restore a consistent file and halve the rate: the next ticks move the estimate.
        let resumed_from = busy.total.load(Ordering::SeqCst);
        write_stat(&path, resumed_from);
        busy.resume_with_step(100);
        assert!(wait_until(|| sampler.cpu_permille() == 500).await);
        assert_eq!(sampler.usage().unwrap().cpu_percent, 50.0);
        sampler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_ticks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        let busy = Arc::new(BusyProcess::new(path.clone()));

        let sampler =
            StatSampler::spawn(path, busy.clone(), Duration::from_millis(5)).unwrap();
        assert!(wait_until(|| busy.calls() >= 3).await);
        sampler.shutdown().await;

        let after = busy.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(busy.calls(), after);
    }

    #[tokio::test]
    async fn test_failed_ticks_self_heal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        let busy = Arc::new(BusyProcess::new(path.clone()));
        fs::remove_file(&path).unwrap();

        let sampler =
            StatSampler::spawn(path.clone(), busy.clone(), Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(busy.calls(), 0);

        write_stat(&path, 0);
        assert!(wait_until(|| sampler.cpu_permille() == 1000).await);
        sampler.shutdown().await;
    }
}
