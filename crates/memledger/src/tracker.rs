//! The guarded allocation façade.
//!
//! A [`Tracker`] owns a [`Registry`] behind an injected raw lock, the real
//! allocator, and the logging/metrics side channels. Each operation performs
//! the real allocator call and the registry mutation inside one critical
//! section, so no other thread can observe an address that the allocator has
//! handed out (or taken back) while the registry disagrees. Log lines are
//! written after the lock is released.
//!
//! Per address the life cycle is `unallocated -> live -> unallocated`;
//! resize keeps the logical allocation live while its key may change.

use std::fmt;
use std::io::{self, Write};

use memledger_registry::{AllocationRecord, AllocationSite, HeapReport, Registry};
use parking_lot::lock_api::{Mutex, RawMutex};

use crate::alloc::{RawAllocator, SystemAllocator};
use crate::config::{LogFormat, TrackerConfig};
use crate::fault::{self, Fault, OomOrigin};
use crate::log::{Op, OpEvent, OpLog};
use crate::metrics::{MetricsSnapshot, TrackerMetrics};

/// Allocation tracker over allocator `A`, serialised by raw lock `R`.
pub struct Tracker<A: RawAllocator = SystemAllocator, R: RawMutex = parking_lot::RawMutex> {
    registry: Mutex<R, Registry>,
    allocator: A,
    config: TrackerConfig,
    metrics: TrackerMetrics,
    log: OpLog,
}

impl Tracker {
    /// Tracker over the C library allocator with a parking_lot lock.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_allocator(SystemAllocator, config)
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl<A: RawAllocator> Tracker<A> {
    #[must_use]
    pub fn with_allocator(allocator: A, config: TrackerConfig) -> Self {
        Self::with_lock(allocator, config)
    }
}

impl<A: RawAllocator, R: RawMutex> Tracker<A, R> {
    /// Tracker with an explicit lock type. The lock starts as `R::INIT`.
    #[must_use]
    pub fn with_lock(allocator: A, config: TrackerConfig) -> Self {
        Self {
            registry: Mutex::new(Registry::with_capacity(config.initial_buckets)),
            allocator,
            config,
            metrics: TrackerMetrics::new(),
            log: OpLog::stdout(config.log_format),
        }
    }

    /// Replace the operation log sink.
    #[must_use]
    pub fn with_log(mut self, log: OpLog) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ------------------------------------------------------------------
    // allocate
    // ------------------------------------------------------------------

    /// Allocate `size` bytes, recording the caller as the site.
    ///
    /// Terminates the process on failure.
    #[track_caller]
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.allocate_at(size, AllocationSite::caller())
    }

    pub fn allocate_at(&self, size: usize, site: AllocationSite) -> *mut u8 {
        self.try_allocate(size, site)
            .unwrap_or_else(|fault| fault::terminate(&fault, self))
    }

    pub fn try_allocate(&self, size: usize, site: AllocationSite) -> Result<*mut u8, Fault> {
        self.allocate_with(Op::Allocate, size, site, |allocator| allocator.allocate(size))
    }

    /// Allocate `count * size` zeroed bytes, recording the caller as the site.
    #[track_caller]
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        self.allocate_zeroed_at(count, size, AllocationSite::caller())
    }

    pub fn allocate_zeroed_at(&self, count: usize, size: usize, site: AllocationSite) -> *mut u8 {
        self.try_allocate_zeroed(count, size, site)
            .unwrap_or_else(|fault| fault::terminate(&fault, self))
    }

    /// Zeroed allocation. An overflowing `count * size` is out-of-memory
    /// with the requested size saturated to `usize::MAX`.
    pub fn try_allocate_zeroed(
        &self,
        count: usize,
        size: usize,
        site: AllocationSite,
    ) -> Result<*mut u8, Fault> {
        let Some(total) = count.checked_mul(size) else {
            return Err(self.out_of_memory(Op::AllocateZeroed, usize::MAX, site));
        };
        self.allocate_with(Op::AllocateZeroed, total, site, |allocator| {
            allocator.allocate_zeroed(total)
        })
    }

    fn allocate_with(
        &self,
        op: Op,
        size: usize,
        site: AllocationSite,
        raw: impl FnOnce(&A) -> *mut u8,
    ) -> Result<*mut u8, Fault> {
        if !self.config.tracking {
            TrackerMetrics::inc(&self.metrics.passthrough_ops);
            let ptr = raw(&self.allocator);
            if ptr.is_null() {
                return Err(self.out_of_memory(op, size, site));
            }
            return Ok(ptr);
        }

        let (ptr, live_bytes) = {
            let mut registry = self.registry.lock();
            // Reserve first so that only a duplicate address can refuse the
            // insert below.
            if let Err(err) = registry.try_reserve(1) {
                return Err(self.fault(Fault::from_registry(err, op, site)));
            }
            let ptr = raw(&self.allocator);
            if ptr.is_null() {
                return Err(self.out_of_memory(op, size, site));
            }
            if let Err(err) = registry.insert(AllocationRecord::new(ptr.addr(), size, site)) {
                return Err(self.fault(Fault::from_registry(err, op, site)));
            }
            (ptr, registry.live_bytes())
        };

        TrackerMetrics::inc(&self.metrics.allocations);
        self.metrics.note_bytes(size, live_bytes);
        self.emit(|| OpEvent::allocated(op, size, ptr.addr(), site));
        Ok(ptr)
    }

    // ------------------------------------------------------------------
    // resize
    // ------------------------------------------------------------------

    /// Resize the block at `ptr`, recording the caller as the site.
    ///
    /// # Safety
    ///
    /// With tracking enabled unknown pointers are reported as
    /// [`Fault::InvalidPointer`]. With tracking disabled `ptr` is handed to
    /// the allocator unchecked, so it must be null or a live block obtained
    /// from this tracker.
    #[track_caller]
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        unsafe { self.resize_at(ptr, new_size, AllocationSite::caller()) }
    }

    /// # Safety
    ///
    /// See [`Tracker::resize`].
    pub unsafe fn resize_at(&self, ptr: *mut u8, new_size: usize, site: AllocationSite) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_resize(ptr, new_size, site) }
            .unwrap_or_else(|fault| fault::terminate(&fault, self))
    }

    /// Resize, returning faults instead of terminating.
    ///
    /// A null `ptr` behaves as an allocation. When the real resize or the
    /// registry reservation fails, the original block and its record stay
    /// live. The one exception is [`Fault::DuplicateAddress`]: the block has
    /// already moved to an address the registry says is live, which breaks
    /// the [`RawAllocator`] contract, and the moved block is left untracked.
    ///
    /// # Safety
    ///
    /// See [`Tracker::resize`].
    pub unsafe fn try_resize(
        &self,
        ptr: *mut u8,
        new_size: usize,
        site: AllocationSite,
    ) -> Result<*mut u8, Fault> {
        if ptr.is_null() {
            return self.allocate_with(Op::Resize, new_size, site, |allocator| {
                allocator.allocate(new_size)
            });
        }

        if !self.config.tracking {
            TrackerMetrics::inc(&self.metrics.passthrough_ops);
            // SAFETY: caller guarantees `ptr` is a live block from this tracker.
            let fresh = unsafe { self.allocator.resize(ptr, new_size) };
            if fresh.is_null() {
                return Err(self.out_of_memory(Op::Resize, new_size, site));
            }
            return Ok(fresh);
        }

        let address = ptr.addr();
        let (fresh, live_bytes) = {
            let mut registry = self.registry.lock();
            if !registry.contains(address) {
                return Err(self.fault(Fault::InvalidPointer {
                    op: Op::Resize,
                    address,
                    site,
                }));
            }
            if let Err(err) = registry.try_reserve(1) {
                return Err(self.fault(Fault::from_registry(err, Op::Resize, site)));
            }
            // SAFETY: `address` is registered, so `ptr` is a live block from
            // `self.allocator`.
            let fresh = unsafe { self.allocator.resize(ptr, new_size) };
            if fresh.is_null() {
                return Err(self.out_of_memory(Op::Resize, new_size, site));
            }
            registry.remove(address);
            if let Err(err) = registry.insert(AllocationRecord::new(fresh.addr(), new_size, site)) {
                return Err(self.fault(Fault::from_registry(err, Op::Resize, site)));
            }
            (fresh, registry.live_bytes())
        };

        TrackerMetrics::inc(&self.metrics.resizes);
        self.metrics.note_bytes(new_size, live_bytes);
        self.emit(|| OpEvent::resized(address, new_size, fresh.addr(), site));
        Ok(fresh)
    }

    // ------------------------------------------------------------------
    // release
    // ------------------------------------------------------------------

    /// Release the block at `ptr`, recording the caller as the site.
    ///
    /// # Safety
    ///
    /// See [`Tracker::resize`].
    #[track_caller]
    pub unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded caller contract.
        unsafe { self.release_at(ptr, AllocationSite::caller()) }
    }

    /// # Safety
    ///
    /// See [`Tracker::resize`].
    pub unsafe fn release_at(&self, ptr: *mut u8, site: AllocationSite) {
        // SAFETY: forwarded caller contract.
        if let Err(fault) = unsafe { self.try_release(ptr, site) } {
            fault::terminate(&fault, self);
        }
    }

    /// Release, returning faults instead of terminating. Releasing null is a
    /// no-op.
    ///
    /// # Safety
    ///
    /// See [`Tracker::resize`].
    pub unsafe fn try_release(&self, ptr: *mut u8, site: AllocationSite) -> Result<(), Fault> {
        if ptr.is_null() {
            TrackerMetrics::inc(&self.metrics.null_releases);
            return Ok(());
        }

        if !self.config.tracking {
            TrackerMetrics::inc(&self.metrics.passthrough_ops);
            // SAFETY: caller guarantees `ptr` is a live block from this tracker.
            unsafe { self.allocator.release(ptr) };
            return Ok(());
        }

        let address = ptr.addr();
        {
            let mut registry = self.registry.lock();
            if registry.remove(address).is_none() {
                return Err(self.fault(Fault::InvalidPointer {
                    op: Op::Release,
                    address,
                    site,
                }));
            }
            // SAFETY: the record was live, so `ptr` is a live block from
            // `self.allocator`; it is no longer reachable through the registry.
            unsafe { self.allocator.release(ptr) };
        }

        TrackerMetrics::inc(&self.metrics.releases);
        self.emit(|| OpEvent::released(address, site));
        Ok(())
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    /// Number of live records. Always zero when tracking is disabled.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.registry.lock().live_count()
    }

    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.registry.lock().live_bytes()
    }

    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.registry.lock().contains(ptr.addr())
    }

    /// Snapshot of every live record, taken under the lock.
    #[must_use]
    pub fn report(&self) -> HeapReport {
        self.registry.lock().report()
    }

    /// Records still live; meant to be called at exit.
    #[must_use]
    pub fn leaks(&self) -> HeapReport {
        self.report()
    }

    /// Run `f` against the registry while holding the lock.
    pub fn with_registry<T>(&self, f: impl FnOnce(&Registry) -> T) -> T {
        f(&self.registry.lock())
    }

    /// Write the heap dump in the configured format. Writes nothing when
    /// tracking is disabled.
    ///
    /// Records are written straight from the registry under the lock, with
    /// no intermediate copy, so the dump still works when memory is gone.
    pub fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        if !self.config.tracking {
            return Ok(());
        }
        self.with_registry(|registry| match self.config.log_format {
            LogFormat::Text => write!(out, "{}", registry.dump()),
            LogFormat::Json => {
                serde_json::to_writer(&mut *out, &registry.dump())?;
                writeln!(out)
            }
        })?;
        out.flush()
    }

    /// Heap dump to stdout. Best effort: write errors are dropped.
    pub fn print_heap(&self) {
        let stdout = io::stdout();
        let _ = self.dump(&mut stdout.lock());
    }

    fn out_of_memory(&self, op: Op, requested: usize, site: AllocationSite) -> Fault {
        self.fault(Fault::OutOfMemory {
            op,
            requested,
            site,
            origin: OomOrigin::Allocator,
        })
    }

    fn fault(&self, fault: Fault) -> Fault {
        TrackerMetrics::inc(&self.metrics.faults);
        fault
    }

    fn emit(&self, event: impl FnOnce() -> OpEvent) {
        if self.config.verbose {
            self.log.emit(&event());
        }
    }
}

impl<A: RawAllocator, R: RawMutex> fmt::Debug for Tracker<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::lock_api::GuardSend;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Delegates to the system allocator and counts calls.
    #[derive(Default)]
    struct CountingAllocator {
        allocs: AtomicUsize,
        resizes: AtomicUsize,
        releases: AtomicUsize,
    }

    unsafe impl RawAllocator for CountingAllocator {
        fn allocate(&self, size: usize) -> *mut u8 {
            self.allocs.fetch_add(1, Ordering::Relaxed);
            SystemAllocator.allocate(size)
        }

        unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
            self.resizes.fetch_add(1, Ordering::Relaxed);
            unsafe { SystemAllocator.resize(ptr, size) }
        }

        unsafe fn release(&self, ptr: *mut u8) {
            self.releases.fetch_add(1, Ordering::Relaxed);
            unsafe { SystemAllocator.release(ptr) }
        }
    }

    /// System allocator whose allocate/resize can be switched to fail.
    #[derive(Default)]
    struct FlakyAllocator {
        fail_allocate: AtomicBool,
        fail_resize: AtomicBool,
    }

    unsafe impl RawAllocator for FlakyAllocator {
        fn allocate(&self, size: usize) -> *mut u8 {
            if self.fail_allocate.load(Ordering::Relaxed) {
                return std::ptr::null_mut();
            }
            SystemAllocator.allocate(size)
        }

        unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
            if self.fail_resize.load(Ordering::Relaxed) {
                return std::ptr::null_mut();
            }
            unsafe { SystemAllocator.resize(ptr, size) }
        }

        unsafe fn release(&self, ptr: *mut u8) {
            unsafe { SystemAllocator.release(ptr) }
        }
    }

    /// Broken allocator that always hands out the same block.
    struct FixedAllocator(usize);

    impl FixedAllocator {
        fn new() -> Self {
            let block: &'static mut [u8; 32] = Box::leak(Box::new([0u8; 32]));
            Self(block.as_mut_ptr().expose_provenance())
        }
    }

    unsafe impl RawAllocator for FixedAllocator {
        fn allocate(&self, _size: usize) -> *mut u8 {
            std::ptr::with_exposed_provenance_mut(self.0)
        }

        unsafe fn resize(&self, ptr: *mut u8, _size: usize) -> *mut u8 {
            ptr
        }

        unsafe fn release(&self, _ptr: *mut u8) {}
    }

    /// Hands out two leaked blocks in turn and always resizes into the
    /// second one.
    struct TwoBlockAllocator {
        blocks: [usize; 2],
        next: AtomicUsize,
    }

    impl TwoBlockAllocator {
        fn new() -> Self {
            let a = FixedAllocator::new().0;
            let b = FixedAllocator::new().0;
            Self {
                blocks: [a, b],
                next: AtomicUsize::new(0),
            }
        }
    }

    unsafe impl RawAllocator for TwoBlockAllocator {
        fn allocate(&self, _size: usize) -> *mut u8 {
            let i = self.next.fetch_add(1, Ordering::Relaxed) % 2;
            std::ptr::with_exposed_provenance_mut(self.blocks[i])
        }

        unsafe fn resize(&self, _ptr: *mut u8, _size: usize) -> *mut u8 {
            std::ptr::with_exposed_provenance_mut(self.blocks[1])
        }

        unsafe fn release(&self, _ptr: *mut u8) {}
    }

    struct SpinLock(AtomicBool);

    unsafe impl RawMutex for SpinLock {
        #[allow(clippy::declare_interior_mutable_const)]
        const INIT: Self = Self(AtomicBool::new(false));

        type GuardMarker = GuardSend;

        fn lock(&self) {
            while !self.try_lock() {
                std::hint::spin_loop();
            }
        }

        fn try_lock(&self) -> bool {
            self.0
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        }

        unsafe fn unlock(&self) {
            self.0.store(false, Ordering::Release);
        }
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn here(line: u32) -> AllocationSite {
        AllocationSite::new("test.rs", line, None)
    }

    fn quiet() -> Tracker {
        Tracker::new(TrackerConfig::quiet().initial_buckets(16))
    }

    #[test]
    fn allocate_registers_and_release_unregisters() {
        let t = quiet();
        let p = t.try_allocate(20, here(1)).unwrap();
        assert!(!p.is_null());
        assert_eq!(t.live_count(), 1);
        assert_eq!(t.live_bytes(), 20);
        assert!(t.contains(p));
        let record = t.with_registry(|r| *r.get(p.addr()).unwrap());
        assert_eq!(record.size, 20);
        assert_eq!(record.site, here(1));

        unsafe { t.try_release(p, here(2)) }.unwrap();
        assert_eq!(t.live_count(), 0);
        assert!(!t.contains(p));
    }

    #[test]
    fn live_count_tracks_allocations_minus_releases() {
        let t = quiet();
        let blocks: Vec<*mut u8> = (1..=50).map(|n| t.allocate(n)).collect();
        assert_eq!(t.live_count(), 50);
        for (i, p) in blocks.iter().enumerate().filter(|(i, _)| i % 2 == 0) {
            unsafe { t.try_release(*p, here(i as u32)) }.unwrap();
        }
        assert_eq!(t.live_count(), 25);
        for p in blocks.iter().skip(1).step_by(2) {
            unsafe { t.release(*p) };
        }
        assert_eq!(t.live_count(), 0);
        let m = t.metrics();
        assert_eq!(m.allocations, 50);
        assert_eq!(m.releases, 50);
    }

    #[test]
    fn track_caller_records_this_file() {
        let t = quiet();
        let p = t.allocate(8);
        let site = t.with_registry(|r| r.get(p.addr()).unwrap().site);
        assert!(site.file.ends_with("tracker.rs"));
        assert!(site.line > 0);
        unsafe { t.release(p) };
    }

    #[test]
    fn site_macro_records_function() {
        let t = quiet();
        let p = t.try_allocate(4, crate::site!()).unwrap();
        let site = t.with_registry(|r| r.get(p.addr()).unwrap().site);
        assert!(site.function.unwrap().ends_with("site_macro_records_function"));
        unsafe { t.release(p) };
    }

    #[test]
    fn release_null_is_a_noop() {
        let alloc = CountingAllocator::default();
        let t = Tracker::with_allocator(alloc, TrackerConfig::quiet());
        let keep = t.allocate(4);
        unsafe { t.try_release(std::ptr::null_mut(), here(1)) }.unwrap();
        assert_eq!(t.live_count(), 1);
        assert_eq!(t.metrics().null_releases, 1);
        assert_eq!(t.allocator.releases.load(Ordering::Relaxed), 0);
        unsafe { t.release(keep) };
    }

    #[test]
    fn release_unknown_pointer_is_invalid() {
        let alloc = CountingAllocator::default();
        let t = Tracker::with_allocator(alloc, TrackerConfig::quiet());
        let mut local = 0u8;
        let bogus: *mut u8 = &mut local;
        let err = unsafe { t.try_release(bogus, here(9)) }.unwrap_err();
        assert_eq!(
            err,
            Fault::InvalidPointer {
                op: Op::Release,
                address: bogus.addr(),
                site: here(9),
            }
        );
        assert_eq!(err.exit_status(), 10);
        assert_eq!(t.allocator.releases.load(Ordering::Relaxed), 0);
        assert_eq!(t.metrics().faults, 1);
    }

    #[test]
    fn double_release_is_invalid() {
        let t = quiet();
        let p = t.allocate(16);
        unsafe { t.try_release(p, here(1)) }.unwrap();
        let err = unsafe { t.try_release(p, here(2)) }.unwrap_err();
        assert!(matches!(err, Fault::InvalidPointer { op: Op::Release, .. }));
    }

    #[test]
    fn resize_replaces_record() {
        let t = quiet();
        let p = t.allocate(10);
        let q = unsafe { t.try_resize(p, 4096, here(5)) }.unwrap();
        assert!(!q.is_null());
        assert_eq!(t.live_count(), 1);
        assert!(t.contains(q));
        if q != p {
            assert!(!t.contains(p));
        }
        let record = t.with_registry(|r| *r.get(q.addr()).unwrap());
        assert_eq!(record.size, 4096);
        assert_eq!(record.site, here(5));
        assert_eq!(t.metrics().resizes, 1);
        unsafe { t.release(q) };
    }

    #[test]
    fn resize_null_allocates() {
        let t = quiet();
        let p = unsafe { t.try_resize(std::ptr::null_mut(), 12, here(3)) }.unwrap();
        assert_eq!(t.live_count(), 1);
        assert_eq!(t.live_bytes(), 12);
        unsafe { t.release(p) };
    }

    #[test]
    fn resize_unknown_pointer_skips_allocator() {
        let alloc = CountingAllocator::default();
        let t = Tracker::with_allocator(alloc, TrackerConfig::quiet());
        let mut local = [0u8; 4];
        let err = unsafe { t.try_resize(local.as_mut_ptr(), 8, here(4)) }.unwrap_err();
        assert!(matches!(err, Fault::InvalidPointer { op: Op::Resize, .. }));
        assert_eq!(t.allocator.resizes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn failed_allocate_is_out_of_memory() {
        let alloc = FlakyAllocator::default();
        alloc.fail_allocate.store(true, Ordering::Relaxed);
        let t = Tracker::with_allocator(alloc, TrackerConfig::quiet());
        let err = t.try_allocate(64, here(7)).unwrap_err();
        assert_eq!(
            err,
            Fault::OutOfMemory {
                op: Op::Allocate,
                requested: 64,
                site: here(7),
                origin: OomOrigin::Allocator,
            }
        );
        assert_eq!(err.exit_status(), 11);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn failed_resize_keeps_old_record() {
        let t = Tracker::with_allocator(FlakyAllocator::default(), TrackerConfig::quiet());
        let p = t.try_allocate(32, here(1)).unwrap();
        t.allocator.fail_resize.store(true, Ordering::Relaxed);
        let err = unsafe { t.try_resize(p, 1 << 20, here(2)) }.unwrap_err();
        assert!(matches!(err, Fault::OutOfMemory { op: Op::Resize, requested, .. } if requested == 1 << 20));
        assert!(t.contains(p));
        assert_eq!(t.live_bytes(), 32);
        unsafe { t.try_release(p, here(3)) }.unwrap();
    }

    #[test]
    fn zeroed_allocation_is_zero_and_overflow_is_oom() {
        let t = quiet();
        let p = t.try_allocate_zeroed(16, 8, here(1)).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p, 128) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(t.live_bytes(), 128);
        unsafe { t.release(p) };

        let err = t.try_allocate_zeroed(usize::MAX, 2, here(2)).unwrap_err();
        assert!(matches!(
            err,
            Fault::OutOfMemory { op: Op::AllocateZeroed, requested: usize::MAX, .. }
        ));
    }

    #[test]
    fn duplicate_address_from_allocator() {
        let t = Tracker::with_allocator(FixedAllocator::new(), TrackerConfig::quiet());
        let p = t.try_allocate(8, here(1)).unwrap();
        let err = t.try_allocate(8, here(2)).unwrap_err();
        assert_eq!(
            err,
            Fault::DuplicateAddress {
                address: p.addr(),
                site: here(2),
            }
        );
        assert_eq!(err.exit_status(), 12);
        assert_eq!(t.live_count(), 1);
        unsafe { t.try_release(p, here(3)) }.unwrap();
    }

    #[test]
    fn resize_onto_live_address_leaves_moved_block_untracked() {
        let t = Tracker::with_allocator(TwoBlockAllocator::new(), TrackerConfig::quiet());
        let p = t.try_allocate(8, here(1)).unwrap();
        let q = t.try_allocate(16, here(2)).unwrap();
        let err = unsafe { t.try_resize(p, 24, here(3)) }.unwrap_err();
        assert_eq!(
            err,
            Fault::DuplicateAddress {
                address: q.addr(),
                site: here(3),
            }
        );
        assert!(!t.contains(p));
        assert!(t.contains(q));
        assert_eq!(t.live_bytes(), 16);
        unsafe { t.try_release(q, here(4)) }.unwrap();
    }

    #[test]
    fn passthrough_mode_keeps_no_records() {
        let alloc = CountingAllocator::default();
        let capture = Capture::default();
        let t = Tracker::with_allocator(alloc, TrackerConfig::default().tracking(false))
            .with_log(OpLog::to_writer(LogFormat::Text, capture.clone()));
        let p = t.try_allocate(24, here(1)).unwrap();
        assert_eq!(t.live_count(), 0);
        let q = unsafe { t.try_resize(p, 48, here(2)) }.unwrap();
        unsafe { t.try_release(q, here(3)) }.unwrap();
        assert_eq!(t.allocator.allocs.load(Ordering::Relaxed), 1);
        assert_eq!(t.allocator.resizes.load(Ordering::Relaxed), 1);
        assert_eq!(t.allocator.releases.load(Ordering::Relaxed), 1);
        assert_eq!(t.metrics().passthrough_ops, 3);
        assert_eq!(capture.text(), "");

        let mut dump = Vec::new();
        t.dump(&mut dump).unwrap();
        assert!(dump.is_empty());
    }

    #[test]
    fn verbose_emits_one_line_per_operation() {
        let capture = Capture::default();
        let t = Tracker::new(TrackerConfig::default().initial_buckets(16))
            .with_log(OpLog::to_writer(LogFormat::Text, capture.clone()));
        let p = t.try_allocate(20, here(3)).unwrap();
        let q = unsafe { t.try_resize(p, 10, here(4)) }.unwrap();
        unsafe { t.try_release(q, here(5)) }.unwrap();

        let text = capture.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            format!("malloc(20) -> {:#x} in test.rs, line 3.", p.addr())
        );
        assert_eq!(
            lines[1],
            format!("realloc({:#x}, 10) -> {:#x} in test.rs, line 4.", p.addr(), q.addr())
        );
        assert_eq!(lines[2], format!("free({:#x}) in test.rs, line 5.", q.addr()));
    }

    #[test]
    fn quiet_emits_nothing() {
        let capture = Capture::default();
        let t = Tracker::new(TrackerConfig::quiet())
            .with_log(OpLog::to_writer(LogFormat::Text, capture.clone()));
        let p = t.allocate(20);
        unsafe { t.release(p) };
        assert_eq!(capture.text(), "");
        assert_eq!(t.metrics().allocations, 1);
    }

    #[test]
    fn dump_lists_records_and_totals() {
        let t = quiet();
        let a = t.try_allocate(20, here(10)).unwrap();
        let b = t.try_allocate(25, here(11)).unwrap();

        let mut out = Vec::new();
        t.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("* HEAP DUMP *"));
        assert!(text.contains(&format!(
            "Heap ptr: {:#x} of size: 20 Allocated in file: test.rs On line: 10",
            a.addr()
        )));
        assert!(text.contains(&format!(
            "Heap ptr: {:#x} of size: 25 Allocated in file: test.rs On line: 11",
            b.addr()
        )));
        assert!(text.contains("Total Heap size: 45, number of items: 2"));

        let report = t.leaks();
        assert_eq!(report.sizes(), vec![20, 25]);
        unsafe {
            t.release(a);
            t.release(b);
        }
        assert!(t.leaks().is_empty());
    }

    #[test]
    fn json_dump_is_one_object() {
        let t = Tracker::new(TrackerConfig::quiet().log_format(LogFormat::Json));
        let p = t.try_allocate(7, here(1)).unwrap();
        let mut out = Vec::new();
        t.dump(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["total_bytes"], 7);
        assert_eq!(value["records"][0]["address"], format!("{:#x}", p.addr()));
        unsafe { t.release(p) };
    }

    #[test]
    fn custom_lock_type() {
        let t: Tracker<SystemAllocator, SpinLock> =
            Tracker::with_lock(SystemAllocator, TrackerConfig::quiet());
        let p = t.allocate(3);
        assert_eq!(t.live_count(), 1);
        unsafe { t.release(p) };
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn growth_past_initial_buckets() {
        let t = quiet();
        let blocks: Vec<*mut u8> = (0..500).map(|_| t.allocate(1)).collect();
        assert_eq!(t.live_count(), 500);
        assert!(t.with_registry(Registry::bucket_count) >= 512);
        for p in blocks {
            unsafe { t.release(p) };
        }
        assert_eq!(t.live_count(), 0);
    }
}
