//! System-wide inputs of the stat engine.
//!
//! This module provides the system uptime used to turn the process start
//! time into elapsed wall seconds, plus the kernel's clock-tick and page-size
//! settings for diagnostics.

use std::fs;
use std::io;

use crate::error::UsageError;

/// Clock ticks per second assumed by the CPU estimator.
pub const CLOCK_TICKS_PER_SECOND: i64 = 100;

/// Page size assumed when converting resident pages to bytes.
pub const PAGE_SHIFT: u32 = 12;

/// Source of whole seconds since boot.
pub trait UptimeSource: Send + Sync {
    fn uptime_seconds(&self) -> Result<i64, UsageError>;
}

/// Uptime from the running kernel.
///
/// Uses `sysinfo(2)` on Linux and `/proc/uptime` on other systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUptime;

impl UptimeSource for SystemUptime {
    fn uptime_seconds(&self) -> Result<i64, UsageError> {
        read_uptime_seconds()
    }
}

#[cfg(target_os = "linux")]
fn read_uptime_seconds() -> Result<i64, UsageError> {
    // SAFETY: sysinfo only writes into the zeroed struct we pass.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return Err(UsageError::Uptime(io::Error::last_os_error()));
    }
    Ok(info.uptime as i64)
}

#[cfg(not(target_os = "linux"))]
fn read_uptime_seconds() -> Result<i64, UsageError> {
    read_proc_uptime()
}

/// Parses `/proc/uptime` ("12345.67 54321.00") into whole seconds.
pub fn parse_uptime_content(content: &str) -> Result<i64, io::Error> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| io::Error::other("Invalid /proc/uptime format: empty"))?;

    let seconds = first
        .parse::<f64>()
        .map_err(|e| io::Error::other(format!("Failed to parse uptime: {}", e)))?;

    Ok(seconds as i64)
}

/// Reads `/proc/uptime` regardless of platform.
pub fn read_proc_uptime() -> Result<i64, UsageError> {
    let content = fs::read_to_string("/proc/uptime").map_err(UsageError::Uptime)?;
    parse_uptime_content(&content).map_err(UsageError::Uptime)
}

/// Kernel clock ticks per second, if the platform reports them.
#[cfg(unix)]
pub fn kernel_clock_ticks() -> Option<i64> {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    (ticks > 0).then_some(ticks as i64)
}

#[cfg(not(unix))]
pub fn kernel_clock_ticks() -> Option<i64> {
    None
}

/// Kernel page size in bytes, if the platform reports it.
#[cfg(unix)]
pub fn kernel_page_size() -> Option<i64> {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    (size > 0).then_some(size as i64)
}

#[cfg(not(unix))]
pub fn kernel_page_size() -> Option<i64> {
    None
}
