//! Running statistics rendered by the `/health` endpoint.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (current, average, max, min, count)
    fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Sampling statistics collected by the background refresh task.
pub struct HealthStats {
    sample_duration_seconds: Stat,
    cpu_percent: Stat,
    total_samples: AtomicU64,
    failed_samples: AtomicU64,
    started: Instant,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            sample_duration_seconds: Stat::default(),
            cpu_percent: Stat::default(),
            total_samples: AtomicU64::new(0),
            failed_samples: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_sample(&self, duration_seconds: f64, cpu_percent: f64) {
        self.sample_duration_seconds.add_sample(duration_seconds);
        self.cpu_percent.add_sample(cpu_percent);
        self.total_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.failed_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    pub fn failed_samples(&self) -> u64 {
        self.failed_samples.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn render_table(&self) -> String {
        let (sd_cur, sd_avg, sd_max, sd_min, _sd_count) = self.sample_duration_seconds.snapshot();
        let (cpu_cur, cpu_avg, cpu_max, cpu_min, _cpu_count) = self.cpu_percent.snapshot();

        let left_col = 22usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "sample duration (s)",
            format!("{:.6}", sd_cur),
            format!("{:.6}", sd_avg),
            format!("{:.6}", sd_max),
            format!("{:.6}", sd_min),
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "cpu (%)",
            format!("{:.1}", cpu_cur),
            format!("{:.1}", cpu_avg),
            format!("{:.1}", cpu_max),
            format!("{:.1}", cpu_min),
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "number of samples: {}", self.total_samples()).ok();
        writeln!(out, "failed samples: {}", self.failed_samples()).ok();
        writeln!(out, "uptime (s): {}", self.uptime_seconds()).ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat_tracks_extremes() {
        let mut stat = RunningStat::default();
        for v in [3.0, 1.0, 5.0] {
            stat.add(v);
        }
        assert_eq!(stat.count, 3);
        assert_eq!(stat.last, 5.0);
        assert_eq!(stat.min, 1.0);
        assert_eq!(stat.max, 5.0);
        assert!((stat.avg() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stat_average_is_zero() {
        assert_eq!(RunningStat::default().avg(), 0.0);
    }

    #[test]
    fn test_health_stats_counts_samples_and_errors() {
        let stats = HealthStats::new();
        stats.record_sample(0.001, 12.5);
        stats.record_sample(0.003, 50.0);
        stats.record_error();

        assert_eq!(stats.total_samples(), 2);
        assert_eq!(stats.failed_samples(), 1);

        let table = stats.render_table();
        assert!(table.contains("sample duration (s)"));
        assert!(table.contains("50.0"));
        assert!(table.contains("number of samples: 2"));
        assert!(table.contains("failed samples: 1"));
    }
}
