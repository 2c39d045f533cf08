//! C entry points over the global tracker.
//!
//! C callers pass provenance explicitly, typically through a wrapper macro:
//!
//! ```c
//! #define malloc(n) memledger_malloc((n), __LINE__, __FILE__, __func__)
//! ```
//!
//! `file` and `func` must be NUL-terminated strings with static storage
//! duration. Null or non-UTF-8 strings are recorded as unknown.

use std::ffi::{CStr, c_char, c_int, c_void};

use memledger_registry::AllocationSite;

use crate::global::global_tracker;

/// # Safety
///
/// `file` and `func` must each be null or point to a NUL-terminated string
/// that lives for the rest of the process.
unsafe fn site_from_c(line: c_int, file: *const c_char, func: *const c_char) -> AllocationSite {
    // SAFETY: forwarded caller contract.
    let file = unsafe { static_c_str(file) }.unwrap_or(AllocationSite::UNKNOWN.file);
    // SAFETY: forwarded caller contract.
    let function = unsafe { static_c_str(func) };
    AllocationSite::new(file, u32::try_from(line).unwrap_or(0), function)
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that lives for the
/// rest of the process.
unsafe fn static_c_str(ptr: *const c_char) -> Option<&'static str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated with static lifetime per contract.
    let cstr: &'static CStr = unsafe { CStr::from_ptr(ptr) };
    cstr.to_str().ok()
}

/// Tracked `malloc`. Terminates the process when out of memory.
///
/// # Safety
///
/// `file` and `func` follow the module-level string contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_malloc(
    size: usize,
    line: c_int,
    file: *const c_char,
    func: *const c_char,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let site = unsafe { site_from_c(line, file, func) };
    global_tracker().allocate_at(size, site).cast()
}

/// Tracked `calloc`. Terminates the process when out of memory.
///
/// # Safety
///
/// `file` and `func` follow the module-level string contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_calloc(
    count: usize,
    size: usize,
    line: c_int,
    file: *const c_char,
    func: *const c_char,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let site = unsafe { site_from_c(line, file, func) };
    global_tracker().allocate_zeroed_at(count, size, site).cast()
}

/// Tracked `realloc`. Terminates the process on an unknown pointer or when
/// out of memory.
///
/// # Safety
///
/// `ptr` must be null or a pointer obtained from these entry points (checked
/// only while tracking is enabled). `file` and `func` follow the
/// module-level string contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_realloc(
    ptr: *mut c_void,
    size: usize,
    line: c_int,
    file: *const c_char,
    func: *const c_char,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe {
        let site = site_from_c(line, file, func);
        global_tracker().resize_at(ptr.cast(), size, site).cast()
    }
}

/// Tracked `free`. Terminates the process on an unknown pointer.
///
/// # Safety
///
/// Same as [`memledger_realloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_free(
    ptr: *mut c_void,
    line: c_int,
    file: *const c_char,
    func: *const c_char,
) {
    // SAFETY: forwarded caller contract.
    unsafe {
        let site = site_from_c(line, file, func);
        global_tracker().release_at(ptr.cast(), site);
    }
}

/// Heap dump to stdout.
#[unsafe(no_mangle)]
pub extern "C" fn memledger_print_heap() {
    global_tracker().print_heap();
}

/// Number of live tracked allocations.
#[unsafe(no_mangle)]
pub extern "C" fn memledger_live_count() -> usize {
    global_tracker().live_count()
}
