//! Build-time selection of the usage engine for the target OS.

use tracing::debug;

use crate::error::UsageError;
use crate::usage::UsageProvider;

/// Name of the engine compiled for this target.
pub const ENGINE: &str = if cfg!(target_os = "linux") {
    "proc-stat"
} else if cfg!(windows) {
    "pdh"
} else {
    "unsupported"
};

/// Starts the usage engine for the calling process.
///
/// On Linux this spawns the CPU sampling task and therefore needs a running
/// Tokio runtime.
#[cfg(target_os = "linux")]
pub fn start_platform_sampler() -> Result<Box<dyn UsageProvider>, UsageError> {
    debug!("Starting {} usage engine", ENGINE);
    Ok(Box::new(crate::sampler::StatSampler::start()?))
}

/// Starts the usage engine for the calling process.
#[cfg(windows)]
pub fn start_platform_sampler() -> Result<Box<dyn UsageProvider>, UsageError> {
    debug!("Starting {} usage engine", ENGINE);
    Ok(Box::new(crate::counter::CounterSession::new(
        crate::counter::Pdh,
    )))
}

/// Starts the usage engine for the calling process.
#[cfg(not(any(target_os = "linux", windows)))]
pub fn start_platform_sampler() -> Result<Box<dyn UsageProvider>, UsageError> {
    debug!("No usage engine for this target");
    Err(UsageError::Unsupported)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_platform_sampler_reads_own_process() {
        let sampler = start_platform_sampler().unwrap();
        let snapshot = sampler.usage().unwrap();
        assert!(snapshot.rss_bytes > 0);
        assert!(snapshot.vss_bytes >= snapshot.rss_bytes);
        assert_eq!(ENGINE, "proc-stat");
    }
}
