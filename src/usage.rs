//! Caller-facing usage contract.
//!
//! Every engine implements [`UsageProvider`] so that embedders can swap the
//! platform engine for a fake without touching the code that consumes the
//! snapshot.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::error::UsageError;

/// Value reported for a field that could not be parsed.
pub const UNKNOWN: i64 = -1;

/// CPU and memory usage of the calling process.
///
/// Negative memory values mean the underlying field was unreadable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    /// Smoothed CPU utilization in percent of one core.
    pub cpu_percent: f64,
    /// Resident set size in bytes.
    pub rss_bytes: i64,
    /// Virtual set size in bytes.
    pub vss_bytes: i64,
}

impl UsageSnapshot {
    /// Whether both memory fields carry real values.
    pub fn is_complete(&self) -> bool {
        self.rss_bytes >= 0 && self.vss_bytes >= 0
    }
}

/// A source of [`UsageSnapshot`]s for the calling process.
pub trait UsageProvider: Send + Sync {
    /// Sample the calling process.
    fn usage(&self) -> Result<UsageSnapshot, UsageError>;
}

impl<P: UsageProvider + ?Sized> UsageProvider for Arc<P> {
    fn usage(&self) -> Result<UsageSnapshot, UsageError> {
        (**self).usage()
    }
}

impl<P: UsageProvider + ?Sized> UsageProvider for Box<P> {
    fn usage(&self) -> Result<UsageSnapshot, UsageError> {
        (**self).usage()
    }
}

/// Engine that always reports the same snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedUsage(pub UsageSnapshot);

impl UsageProvider for FixedUsage {
    fn usage(&self) -> Result<UsageSnapshot, UsageError> {
        Ok(self.0)
    }
}

/// Monotonic time source used by throttled engines.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
