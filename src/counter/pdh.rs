//! PDH binding of [`CounterApi`](super::CounterApi).

use std::ffi::OsStr;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;

use windows_sys::Win32::System::Performance::{
    PdhAddCounterW, PdhCloseQuery, PdhCollectQueryData, PdhGetFormattedCounterArrayW,
    PdhOpenQueryW, PDH_FMT_COUNTERVALUE_ITEM_W, PDH_FMT_DOUBLE, PDH_HCOUNTER, PDH_HQUERY,
};

use super::{ArraySize, CounterApi, STATUS_SUCCESS};
use crate::error::CounterStatus;

/// The system performance-counter subsystem (`pdh.dll`).
#[derive(Debug, Default)]
pub struct Pdh;

/// Open PDH query handle.
#[derive(Debug, Clone, Copy)]
pub struct PdhQuery(PDH_HQUERY);

/// Counter handle registered on a [`PdhQuery`].
#[derive(Debug, Clone, Copy)]
pub struct PdhCounter(PDH_HCOUNTER);

// SAFETY: PDH handles are process-wide and not tied to the creating thread;
// CounterSession serializes every call on them behind its mutex.
unsafe impl Send for PdhQuery {}
unsafe impl Send for PdhCounter {}

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

impl CounterApi for Pdh {
    type Query = PdhQuery;
    type Counter = PdhCounter;

    fn open_query(&mut self) -> Result<PdhQuery, CounterStatus> {
        let mut query: PDH_HQUERY = unsafe { mem::zeroed() };
        let status = unsafe { PdhOpenQueryW(ptr::null(), 0, &mut query) };
        if status != STATUS_SUCCESS {
            return Err(status);
        }
        Ok(PdhQuery(query))
    }

    fn add_counter(&mut self, query: PdhQuery, path: &str) -> Result<PdhCounter, CounterStatus> {
        let path_w = wide(path);
        let mut counter: PDH_HCOUNTER = unsafe { mem::zeroed() };
        let status = unsafe { PdhAddCounterW(query.0, path_w.as_ptr(), 0, &mut counter) };
        if status != STATUS_SUCCESS {
            return Err(status);
        }
        Ok(PdhCounter(counter))
    }

    fn collect(&mut self, query: PdhQuery) -> Result<(), CounterStatus> {
        match unsafe { PdhCollectQueryData(query.0) } {
            STATUS_SUCCESS => Ok(()),
            status => Err(status),
        }
    }

    fn probe_array(&mut self, counter: PdhCounter) -> (CounterStatus, ArraySize) {
        let mut size = ArraySize::default();
        let status = unsafe {
            PdhGetFormattedCounterArrayW(
                counter.0,
                PDH_FMT_DOUBLE,
                &mut size.bytes,
                &mut size.items,
                ptr::null_mut(),
            )
        };
        (status, size)
    }

    fn fetch_array(&mut self, counter: PdhCounter, size: ArraySize) -> Result<Vec<f64>, CounterStatus> {
        // The buffer holds the item records followed by their instance names.
        let item_size = mem::size_of::<PDH_FMT_COUNTERVALUE_ITEM_W>();
        let slots = (size.bytes as usize).div_ceil(item_size).max(size.items as usize);
        let mut buffer: Vec<PDH_FMT_COUNTERVALUE_ITEM_W> =
            vec![unsafe { mem::zeroed() }; slots.max(1)];

        let mut bytes = (buffer.len() * item_size) as u32;
        let mut items = size.items;
        let status = unsafe {
            PdhGetFormattedCounterArrayW(
                counter.0,
                PDH_FMT_DOUBLE,
                &mut bytes,
                &mut items,
                buffer.as_mut_ptr(),
            )
        };
        if status != STATUS_SUCCESS {
            return Err(status);
        }

        let count = (items as usize).min(buffer.len());
        Ok(buffer[..count]
            .iter()
            .map(|item| unsafe { item.FmtValue.Anonymous.doubleValue })
            .collect())
    }

    fn close_query(&mut self, query: PdhQuery) {
        unsafe {
            PdhCloseQuery(query.0);
        }
    }
}
