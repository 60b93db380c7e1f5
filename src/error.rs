//! Error taxonomy shared by all usage engines.
//!
//! Malformed numeric fields are not an error: the stat parser reports them as
//! unknown and the snapshot carries a negative sentinel instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Raw status code returned by the performance-counter subsystem.
pub type CounterStatus = u32;

/// An error that occurred while sampling the calling process.
#[derive(Error, Debug)]
pub enum UsageError {
    /// The stat source could not be read (process gone, permission denied, path missing).
    #[error("Failed to read stat file `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// System uptime could not be determined.
    #[error("Failed to read system uptime: {0}")]
    Uptime(#[source] io::Error),

    /// The counter subsystem returned an unexpected status.
    #[error("Performance counter call `{operation}` failed with status {status:#010x}")]
    CounterApi {
        operation: &'static str,
        status: CounterStatus,
    },

    /// The caller's pid was not present in the freshly collected pid array.
    #[error("Could not find pid {pid} in performance counter results")]
    PidNotFound { pid: u32 },

    /// The counter arrays of one collection did not line up.
    #[error("Counter `{counter}` has no instance at index {index}")]
    InstanceMismatch { index: usize, counter: &'static str },

    /// A background sampler was started outside a Tokio runtime.
    #[error("StatSampler must be started from within a Tokio runtime")]
    NoRuntime,

    /// No usage engine exists for this target.
    #[error("Process usage sampling is not supported on this platform")]
    Unsupported,
}

impl UsageError {
    /// Shorthand for counter failures.
    pub(crate) fn counter(operation: &'static str, status: CounterStatus) -> Self {
        UsageError::CounterApi { operation, status }
    }

    /// Whether retrying after a short delay is expected to succeed.
    ///
    /// Counter races right after process start make the pid transiently
    /// absent or the arrays briefly misaligned.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UsageError::PidNotFound { .. } | UsageError::InstanceMismatch { .. }
        )
    }
}
