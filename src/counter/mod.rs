//! Performance-counter usage engine.
//!
//! A query session is opened on first use against wildcarded `\Process(...)`
//! counters for the process image name. Every instance of a same-named process
//! on the host shows up in the result arrays, so the caller's slot is located
//! through the `ID Process` counter and the other three arrays are read at the
//! same index.
//!
//! Collections are throttled: a call within [`THROTTLE_WINDOW`] of the last
//! successful sample returns the cached snapshot without touching the counter
//! subsystem.

#[cfg(windows)]
mod pdh;

#[cfg(windows)]
pub use pdh::Pdh;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{CounterStatus, UsageError};
use crate::usage::{Clock, SystemClock, UsageProvider, UsageSnapshot};

/// Minimum time between two real collections.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(2);

/// Upper bound on the number of same-named instances kept from one array.
///
/// This bounds what a collection retains and searches. The fetch buffer itself
/// is sized from the probe, since the counter subsystem does not fill a
/// buffer that is too small for the whole array.
pub const MAX_INSTANCES: usize = 512;

/// Pause after the initial collection so rate counters have a baseline.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Status of a successful counter call.
pub const STATUS_SUCCESS: CounterStatus = 0;

/// Status returned by an array probe that was given no buffer.
pub const STATUS_MORE_DATA: CounterStatus = 0x8000_07D2;

/// Buffer requirements reported by an array probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArraySize {
    /// Required buffer size in bytes, including instance names.
    pub bytes: u32,
    /// Number of instances in the array.
    pub items: u32,
}

/// Raw operations of a performance-counter subsystem.
///
/// Methods return the subsystem's status codes untouched; interpreting them
/// is left to [`CounterSession`].
pub trait CounterApi: Send {
    type Query: Copy + Send;
    type Counter: Copy + Send;

    fn open_query(&mut self) -> Result<Self::Query, CounterStatus>;

    fn add_counter(&mut self, query: Self::Query, path: &str) -> Result<Self::Counter, CounterStatus>;

    fn collect(&mut self, query: Self::Query) -> Result<(), CounterStatus>;

    /// Asks for the size of a counter's formatted array without a buffer.
    fn probe_array(&mut self, counter: Self::Counter) -> (CounterStatus, ArraySize);

    /// Fetches a counter's formatted array into a buffer of `size`.
    fn fetch_array(&mut self, counter: Self::Counter, size: ArraySize) -> Result<Vec<f64>, CounterStatus>;

    fn close_query(&mut self, query: Self::Query);
}

/// Full counter paths for one process image name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterPaths {
    pub pid: String,
    pub cpu: String,
    pub rss: String,
    pub vss: String,
}

impl CounterPaths {
    /// Paths wildcarded by image name so every same-named instance matches.
    pub fn for_image(image_name: &str) -> Self {
        let instance = format!("{image_name}*");
        CounterPaths {
            pid: format!("\\Process({instance})\\ID Process"),
            cpu: format!("\\Process({instance})\\% Processor Time"),
            rss: format!("\\Process({instance})\\Working Set - Private"),
            vss: format!("\\Process({instance})\\Virtual Bytes"),
        }
    }
}

/// Image name of the running executable as the counter subsystem names it.
pub fn process_image_name() -> String {
    let from_exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
    let raw = from_exe
        .or_else(|| {
            std::env::args_os()
                .next()
                .and_then(|a| Path::new(&a).file_name().map(|n| n.to_string_lossy().into_owned()))
        })
        .unwrap_or_default();
    strip_exe_suffix(&raw).to_string()
}

fn strip_exe_suffix(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".exe") => {
            &name[..cut]
        }
        _ => name,
    }
}

/// Index of `pid` in a pid-counter array.
pub fn find_instance(pids: &[f64], pid: u32) -> Option<usize> {
    pids.iter().position(|&v| v >= 0.0 && v as u64 == u64::from(pid))
}

struct CounterHandles<A: CounterApi> {
    query: A::Query,
    pid: A::Counter,
    cpu: A::Counter,
    rss: A::Counter,
    vss: A::Counter,
}

impl<A: CounterApi> Clone for CounterHandles<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: CounterApi> Copy for CounterHandles<A> {}

struct SessionState<A: CounterApi> {
    api: A,
    handles: Option<CounterHandles<A>>,
    last_sample: Option<Instant>,
    cached: Option<UsageSnapshot>,
}

impl<A: CounterApi> SessionState<A> {
    fn initialize(
        &mut self,
        paths: &CounterPaths,
        settle: Duration,
    ) -> Result<CounterHandles<A>, UsageError> {
        let query = self
            .api
            .open_query()
            .map_err(|status| UsageError::counter("open query", status))?;

        match self.register(query, paths, settle) {
            Ok(handles) => {
                self.handles = Some(handles);
                Ok(handles)
            }
            Err(e) => {
                self.api.close_query(query);
                Err(e)
            }
        }
    }

    fn register(
        &mut self,
        query: A::Query,
        paths: &CounterPaths,
        settle: Duration,
    ) -> Result<CounterHandles<A>, UsageError> {
        let mut add = |path: &str| {
            self.api
                .add_counter(query, path)
                .map_err(|status| UsageError::counter("add counter", status))
        };
        let handles = CounterHandles {
            query,
            pid: add(&paths.pid)?,
            cpu: add(&paths.cpu)?,
            rss: add(&paths.rss)?,
            vss: add(&paths.vss)?,
        };

        self.api
            .collect(query)
            .map_err(|status| UsageError::counter("collect", status))?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(handles)
    }

    fn sample(&mut self, handles: CounterHandles<A>, pid: u32) -> Result<UsageSnapshot, UsageError> {
        self.api
            .collect(handles.query)
            .map_err(|status| UsageError::counter("collect", status))?;

        // One collection cycle, so the four arrays share their indices.
        let pids = read_counter_array(&mut self.api, handles.pid)?;
        let cpus = read_counter_array(&mut self.api, handles.cpu)?;
        let rsss = read_counter_array(&mut self.api, handles.rss)?;
        let vsss = read_counter_array(&mut self.api, handles.vss)?;

        let index = find_instance(&pids, pid).ok_or(UsageError::PidNotFound { pid })?;
        let at = |values: &[f64], counter: &'static str| {
            values
                .get(index)
                .copied()
                .ok_or(UsageError::InstanceMismatch { index, counter })
        };

        Ok(UsageSnapshot {
            cpu_percent: at(&cpus, "% Processor Time")?,
            rss_bytes: at(&rsss, "Working Set - Private")? as i64,
            vss_bytes: at(&vsss, "Virtual Bytes")? as i64,
        })
    }
}

impl<A: CounterApi> Drop for SessionState<A> {
    fn drop(&mut self) {
        if let Some(handles) = self.handles.take() {
            self.api.close_query(handles.query);
        }
    }
}

/// Reads one counter's formatted array using the probe-then-fetch protocol.
pub fn read_counter_array<A: CounterApi>(api: &mut A, counter: A::Counter) -> Result<Vec<f64>, UsageError> {
    let (status, size) = api.probe_array(counter);
    match status {
        STATUS_SUCCESS => Ok(Vec::new()),
        STATUS_MORE_DATA => {
            let mut values = api
                .fetch_array(counter, size)
                .map_err(|status| UsageError::counter("get formatted array", status))?;
            if values.len() > MAX_INSTANCES {
                warn!(
                    "Counter array holds {} instances, keeping the first {}",
                    values.len(),
                    MAX_INSTANCES
                );
                values.truncate(MAX_INSTANCES);
            }
            Ok(values)
        }
        other => Err(UsageError::counter("probe formatted array", other)),
    }
}

/// Usage engine backed by a performance-counter query session.
pub struct CounterSession<A: CounterApi> {
    pid: u32,
    paths: CounterPaths,
    clock: Arc<dyn Clock>,
    settle: Duration,
    state: Mutex<SessionState<A>>,
}

impl<A: CounterApi> CounterSession<A> {
    /// Session for the calling process.
    pub fn new(api: A) -> Self {
        Self::with_identity(
            api,
            std::process::id(),
            &process_image_name(),
            Arc::new(SystemClock),
        )
    }

    /// Session for an explicit pid and image name.
    pub fn with_identity(api: A, pid: u32, image_name: &str, clock: Arc<dyn Clock>) -> Self {
        CounterSession {
            pid,
            paths: CounterPaths::for_image(image_name),
            clock,
            settle: SETTLE_DELAY,
            state: Mutex::new(SessionState {
                api,
                handles: None,
                last_sample: None,
                cached: None,
            }),
        }
    }

    /// Overrides the pause after the initial collection.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn paths(&self) -> &CounterPaths {
        &self.paths
    }
}

impl<A: CounterApi> UsageProvider for CounterSession<A> {
    fn usage(&self) -> Result<UsageSnapshot, UsageError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let handles = match state.handles {
            Some(handles) => {
                if let (Some(last), Some(cached)) = (state.last_sample, state.cached) {
                    if self.clock.now().saturating_duration_since(last) < THROTTLE_WINDOW {
                        return Ok(cached);
                    }
                }
                handles
            }
            None => {
                debug!("Opening counter query for {}", self.paths.pid);
                let handles = state.initialize(&self.paths, self.settle)?;
                info!("Counter query initialized for pid {}", self.pid);
                handles
            }
        };

        let snapshot = state.sample(handles, self.pid)?;
        state.cached = Some(snapshot);
        state.last_sample = Some(self.clock.now());
        Ok(snapshot)
    }
}
