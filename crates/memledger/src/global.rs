//! Process-wide tracker.
//!
//! Created on first use from [`global_config`] and never torn down, so the
//! records it holds stay available to a final leak dump.

use std::sync::OnceLock;

use memledger_registry::AllocationSite;

use crate::config::global_config;
use crate::tracker::Tracker;

static GLOBAL_TRACKER: OnceLock<Tracker> = OnceLock::new();

/// The process-wide tracker.
pub fn global_tracker() -> &'static Tracker {
    GLOBAL_TRACKER.get_or_init(|| Tracker::new(global_config()))
}

/// Allocate through the global tracker. Terminates on failure.
#[track_caller]
pub fn allocate(size: usize) -> *mut u8 {
    global_tracker().allocate_at(size, AllocationSite::caller())
}

/// Zeroed allocation through the global tracker. Terminates on failure.
#[track_caller]
pub fn allocate_zeroed(count: usize, size: usize) -> *mut u8 {
    global_tracker().allocate_zeroed_at(count, size, AllocationSite::caller())
}

/// Resize through the global tracker. Terminates on failure.
///
/// # Safety
///
/// See [`Tracker::resize`].
#[track_caller]
pub unsafe fn resize(ptr: *mut u8, new_size: usize) -> *mut u8 {
    // SAFETY: forwarded caller contract.
    unsafe { global_tracker().resize_at(ptr, new_size, AllocationSite::caller()) }
}

/// Release through the global tracker. Terminates on failure.
///
/// # Safety
///
/// See [`Tracker::resize`].
#[track_caller]
pub unsafe fn release(ptr: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { global_tracker().release_at(ptr, AllocationSite::caller()) }
}

/// Heap dump of the global tracker to stdout.
pub fn print_heap() {
    global_tracker().print_heap();
}

/// Live records in the global tracker.
pub fn live_count() -> usize {
    global_tracker().live_count()
}
