//! The real allocator underneath a tracker.
//!
//! Trackers never make allocation decisions themselves; every request goes to
//! a [`RawAllocator`] with malloc/realloc/free semantics. [`SystemAllocator`]
//! forwards to the C library.

use std::ptr;

/// malloc/realloc/free-style allocator.
///
/// A null return always means the request could not be satisfied.
///
/// # Safety
///
/// Implementations must return either null or a pointer to a fresh block of
/// at least the requested size that stays valid until passed to `release` or
/// `resize`, and must never hand out an address that is still live.
pub unsafe trait RawAllocator: Send + Sync {
    /// Allocate `size` bytes of uninitialized memory.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Allocate `size` zeroed bytes.
    fn allocate_zeroed(&self, size: usize) -> *mut u8 {
        let ptr = self.allocate(size);
        if !ptr.is_null() {
            // SAFETY: `allocate` returned a block of at least `size` bytes.
            unsafe { ptr::write_bytes(ptr, 0, size) };
        }
        ptr
    }

    /// Resize a block, possibly moving it. On null return the old block is
    /// untouched and still live.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator.
    unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Return a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator; it is dangling after.
    unsafe fn release(&self, ptr: *mut u8);
}

/// The C library allocator.
///
/// Zero-byte requests are forwarded as one byte so that a null result always
/// means out-of-memory; `realloc(p, 0)` would otherwise free `p`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

// SAFETY: libc malloc/calloc/realloc/free satisfy the RawAllocator contract.
unsafe impl RawAllocator for SystemAllocator {
    #[inline]
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size.max(1)) }.cast()
    }

    #[inline]
    fn allocate_zeroed(&self, size: usize) -> *mut u8 {
        // SAFETY: calloc has no preconditions.
        unsafe { libc::calloc(1, size.max(1)) }.cast()
    }

    #[inline]
    unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr` came from this allocator and is live.
        unsafe { libc::realloc(ptr.cast(), size.max(1)) }.cast()
    }

    #[inline]
    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees `ptr` came from this allocator and is live.
        unsafe { libc::free(ptr.cast()) }
    }
}
