//! Live allocation registry for memledger.
//!
//! This crate holds the data structures that sit underneath every tracked
//! allocation: a record per live address, the call site it came from, and a
//! hash table keyed by address that supports insertion, exact-match removal
//! and full enumeration.
//!
//! # Architecture
//!
//! - **Records** (`record`): `AllocationRecord` and `AllocationSite`
//! - **Hashing** (`hash`): portable SplitMix64 mixing of addresses
//! - **Registry** (`registry`): growable table of buckets with inline slot + overflow chain
//! - **Reports** (`report`): `HeapReport` snapshots for heap dumps and leak checks
//!
//! Nothing here locks or performs I/O. Callers that share a `Registry`
//! across threads wrap it in their own lock.

#![deny(unsafe_code)]

pub mod error;
pub mod hash;
pub mod record;
pub mod registry;
pub mod report;
pub mod serde_address;

pub use error::RegistryError;
pub use record::{AllocationRecord, AllocationSite};
pub use registry::{Iter, Registry};
pub use report::HeapReport;

/// Capture the current call site, including the enclosing function path.
///
/// ```
/// let here = memledger_registry::site!();
/// assert_eq!(here.file, file!());
/// assert!(here.function.is_some());
/// ```
#[macro_export]
macro_rules! site {
    () => {{
        fn __memledger_here() {}
        fn __memledger_type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = __memledger_type_name_of(__memledger_here);
        let name = name.strip_suffix("::__memledger_here").unwrap_or(name);
        $crate::AllocationSite::new(file!(), line!(), Some(name)).with_column(column!())
    }};
}
