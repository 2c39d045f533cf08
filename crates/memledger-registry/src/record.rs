//! Allocation records and call-site provenance.

use std::fmt;
use std::panic::Location;

use serde::Serialize;

use crate::serde_address;

/// Where an allocate/resize/release call originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AllocationSite {
    /// Source file of the call.
    pub file: &'static str,
    /// Line of the call (1-based, 0 when unknown).
    pub line: u32,
    /// Column of the call (0 when unknown).
    pub column: u32,
    /// Enclosing function path, when the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<&'static str>,
}

impl AllocationSite {
    /// Placeholder used when no provenance is available.
    pub const UNKNOWN: Self = Self::new("<unknown>", 0, None);

    #[must_use]
    pub const fn new(file: &'static str, line: u32, function: Option<&'static str>) -> Self {
        Self {
            file,
            line,
            column: 0,
            function,
        }
    }

    #[must_use]
    pub const fn with_column(mut self, column: u32) -> Self {
        self.column = column;
        self
    }

    /// Site of the caller, resolved through `#[track_caller]`.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for AllocationSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line(), None).with_column(location.column())
    }
}

impl fmt::Display for AllocationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if let Some(function) = self.function {
            write!(f, " ({function})")?;
        }
        Ok(())
    }
}

/// Metadata for one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    /// Address returned by the real allocator. Unique among live records.
    #[serde(serialize_with = "serde_address::serialize")]
    pub address: usize,
    /// Bytes requested by the caller.
    pub size: usize,
    /// Call site that produced this address.
    pub site: AllocationSite,
}

impl AllocationRecord {
    #[must_use]
    pub const fn new(address: usize, size: usize, site: AllocationSite) -> Self {
        Self {
            address,
            size,
            site,
        }
    }
}
