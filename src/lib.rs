//! OS-native self-monitoring of CPU, RSS and VSS.
//!
//! The crate reports the calling process's CPU utilization, resident memory
//! and virtual memory without an external agent:
//!
//! * on Linux, [`StatSampler`] parses `/proc/<pid>/stat` and keeps a smoothed
//!   CPU estimate updated once per second by a background Tokio task;
//! * on Windows, [`CounterSession`] queries the PDH performance counters and
//!   throttles collections to one every two seconds.
//!
//! Both implement [`UsageProvider`]:
//!
//! ```no_run
//! use herakles_proc_usage::{start_platform_sampler, UsageProvider};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sampler = start_platform_sampler().expect("no usage engine");
//! let usage = sampler.usage().expect("sample failed");
//! println!("cpu={:.1}% rss={} vss={}", usage.cpu_percent, usage.rss_bytes, usage.vss_bytes);
//! # }
//! ```
//!
//! CPU figures are deliberately smoothed: a value describes the last sampling
//! interval, never the instant of the call.

pub mod counter;
pub mod error;
pub mod platform;
pub mod sampler;
pub mod stat;
pub mod system;
pub mod usage;

pub use counter::{CounterApi, CounterSession};
pub use error::UsageError;
pub use platform::start_platform_sampler;
pub use sampler::StatSampler;
pub use usage::{Clock, FixedUsage, SystemClock, UsageProvider, UsageSnapshot};
