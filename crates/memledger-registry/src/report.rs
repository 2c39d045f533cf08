//! Heap dump snapshots.

use std::fmt;

use serde::Serialize;

use crate::record::AllocationRecord;

/// Point-in-time copy of every live record plus totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapReport {
    pub records: Vec<AllocationRecord>,
    pub total_bytes: usize,
    pub count: usize,
}

impl HeapReport {
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = AllocationRecord>) -> Self {
        let records: Vec<AllocationRecord> = records.into_iter().collect();
        let total_bytes = records
            .iter()
            .fold(0usize, |acc, r| acc.saturating_add(r.size));
        let count = records.len();
        Self {
            records,
            total_bytes,
            count,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sizes of all records, ascending.
    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.records.iter().map(|r| r.size).collect();
        sizes.sort_unstable();
        sizes
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_heap_dump(f, self.records.iter(), self.total_bytes, self.count)
    }
}

/// Text heap dump: banner, one line per record, then the totals.
pub(crate) fn write_heap_dump<'a>(
    f: &mut fmt::Formatter<'_>,
    records: impl Iterator<Item = &'a AllocationRecord>,
    total_bytes: usize,
    count: usize,
) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "*************")?;
    writeln!(f, "* HEAP DUMP *")?;
    writeln!(f, "*************")?;
    for record in records {
        write!(
            f,
            "Heap ptr: {:#x} of size: {} Allocated in file: {} On line: {}",
            record.address, record.size, record.site.file, record.site.line
        )?;
        if let Some(function) = record.site.function {
            write!(f, " In function: {function}")?;
        }
        writeln!(f)?;
    }
    writeln!(f)?;
    writeln!(f, "Total Heap size: {total_bytes}, number of items: {count}")?;
    writeln!(f)
}
