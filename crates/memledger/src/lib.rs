//! memledger: allocation tracking over the system allocator.
//!
//! Every allocate, resize and release made through a [`Tracker`] is
//! forwarded to the real allocator and recorded in a live
//! [`Registry`] under one lock. Misuse is fail-fast: releasing or
//! resizing an address that is not live, or running out of memory, prints a
//! diagnostic to stdout and terminates the process with a distinct exit
//! status (see [`Fault`]). The `try_*` forms return the fault instead.
//!
//! # Modules
//!
//! - **Tracker** (`tracker`): the guarded allocate/resize/release façade
//! - **Allocator seam** (`alloc`): `RawAllocator` and the libc-backed `SystemAllocator`
//! - **Faults** (`fault`): fault taxonomy, exit statuses, fatal reporting
//! - **Configuration** (`config`): tracking / verbose switches from `MEMLEDGER_*`
//! - **Operation log** (`log`): per-call text or JSONL lines
//! - **Metrics** (`metrics`): atomic counters
//! - **Global** (`global`): process-wide tracker and free functions
//! - **C ABI** (`abi`): `memledger_malloc` and friends for C callers

pub mod abi;
pub mod alloc;
pub mod config;
pub mod fault;
pub mod global;
pub mod log;
pub mod metrics;
pub mod tracker;

pub use alloc::{RawAllocator, SystemAllocator};
pub use config::{LogFormat, TrackerConfig, global_config};
pub use fault::{Fault, OomOrigin};
pub use global::{
    allocate, allocate_zeroed, global_tracker, live_count, print_heap, release, resize,
};
pub use log::{Op, OpEvent, OpLog};
pub use memledger_registry::{
    AllocationRecord, AllocationSite, HeapReport, Registry, RegistryError, site,
};
pub use metrics::{MetricsSnapshot, TrackerMetrics};
pub use tracker::Tracker;
