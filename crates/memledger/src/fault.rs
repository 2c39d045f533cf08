//! Fault taxonomy and fatal reporting.
//!
//! Every fault is unrecoverable for the fatal entry points: the diagnostic is
//! written to stdout and flushed, then the process exits with a status that
//! identifies the fault class.
//!
//! | fault | default exit status |
//! |---|---|
//! | [`Fault::InvalidPointer`] | 10 |
//! | [`Fault::OutOfMemory`] | 11 |
//! | [`Fault::DuplicateAddress`] | 12 |
//!
//! The first two can be changed through [`TrackerConfig`].

use std::io::{self, Write};

use memledger_registry::{AllocationSite, RegistryError};
use parking_lot::lock_api::RawMutex;

use crate::alloc::RawAllocator;
use crate::config::TrackerConfig;
use crate::log::Op;
use crate::tracker::Tracker;

pub const INVALID_POINTER_EXIT_STATUS: i32 = 10;
pub const OUT_OF_MEMORY_EXIT_STATUS: i32 = 11;
pub const DUPLICATE_ADDRESS_EXIT_STATUS: i32 = 12;

/// What ran out of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomOrigin {
    /// The real allocator returned null.
    Allocator,
    /// The registry could not grow its own storage.
    Registry,
}

/// Misuse or exhaustion detected by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Resize or release of a non-null address with no live record.
    #[error("tried to {op}() an invalid pointer {address:#x} at {site}")]
    InvalidPointer {
        op: Op,
        address: usize,
        site: AllocationSite,
    },
    /// The real allocator returned null, or the registry could not grow.
    /// For [`OomOrigin::Registry`] `requested` is the tracking storage size.
    #[error("out of memory in {op}() at {site}: could not allocate {requested} bytes")]
    OutOfMemory {
        op: Op,
        requested: usize,
        site: AllocationSite,
        origin: OomOrigin,
    },
    /// The real allocator returned an address that is still live.
    #[error("allocator returned already-tracked address {address:#x} at {site}")]
    DuplicateAddress {
        address: usize,
        site: AllocationSite,
    },
}

impl Fault {
    /// Map a refused registry insertion onto the fault it represents.
    #[must_use]
    pub fn from_registry(err: RegistryError, op: Op, site: AllocationSite) -> Self {
        match err {
            RegistryError::DuplicateAddress { address } => Self::DuplicateAddress { address, site },
            RegistryError::CapacityExhausted { requested_bytes } => Self::OutOfMemory {
                op,
                requested: requested_bytes,
                site,
                origin: OomOrigin::Registry,
            },
        }
    }

    /// Exit status under the default configuration.
    #[must_use]
    pub const fn exit_status(&self) -> i32 {
        match self {
            Self::InvalidPointer { .. } => INVALID_POINTER_EXIT_STATUS,
            Self::OutOfMemory { .. } => OUT_OF_MEMORY_EXIT_STATUS,
            Self::DuplicateAddress { .. } => DUPLICATE_ADDRESS_EXIT_STATUS,
        }
    }

    /// Exit status with the overrides in `config` applied.
    #[must_use]
    pub const fn exit_status_for(&self, config: &TrackerConfig) -> i32 {
        match self {
            Self::InvalidPointer { .. } => config.invalid_pointer_exit_status,
            Self::OutOfMemory { .. } => config.out_of_memory_exit_status,
            Self::DuplicateAddress { .. } => DUPLICATE_ADDRESS_EXIT_STATUS,
        }
    }

    #[must_use]
    pub const fn site(&self) -> AllocationSite {
        match self {
            Self::InvalidPointer { site, .. }
            | Self::OutOfMemory { site, .. }
            | Self::DuplicateAddress { site, .. } => *site,
        }
    }
}

/// Write the fatal diagnostic for `fault` (without the heap dump).
pub fn write_diagnostic(out: &mut dyn Write, fault: &Fault) -> io::Result<()> {
    match fault {
        Fault::InvalidPointer { op, address, site } => write!(
            out,
            "MEMORY PANIC: Tried to {op}() an invalid pointer.\nPointer: {address:#x}\nOn line: {}\nIn file: {}\nAborted.\n",
            site.line, site.file
        ),
        Fault::OutOfMemory {
            requested,
            site,
            origin,
            ..
        } => {
            if *origin == OomOrigin::Registry {
                writeln!(out, "Failed to allocate more space to track allocations.")?;
            }
            write!(
                out,
                "Out of memory on line {} in file: {}.\nCould not allocate {requested} bytes.\nDumping heap:\n",
                site.line, site.file
            )
        }
        Fault::DuplicateAddress { address, site } => write!(
            out,
            "MEMORY PANIC: Allocator returned an address that is already tracked.\nPointer: {address:#x}\nOn line: {}\nIn file: {}\nAborted.\n",
            site.line, site.file
        ),
    }
}

/// Report `fault` on stdout and exit the process with the status configured
/// on `tracker`.
///
/// Out-of-memory faults are followed by a full heap dump of `tracker`, read
/// straight from the registry. Output is best effort: write errors are
/// dropped since the process is exiting anyway.
pub fn terminate<A, R>(fault: &Fault, tracker: &Tracker<A, R>) -> !
where
    A: RawAllocator,
    R: RawMutex,
{
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = write_diagnostic(&mut out, fault);
    if matches!(fault, Fault::OutOfMemory { .. }) {
        let _ = tracker.dump(&mut out);
    }
    let _ = out.flush();
    drop(out);
    std::process::exit(fault.exit_status_for(&tracker.config()))
}
