//! Address-keyed allocation registry.
//!
//! A power-of-two array of buckets. Each bucket has one inline slot and a
//! singly linked overflow chain for further records that hash to the same
//! index. Records within a bucket are kept in insertion order.
//!
//! Chain nodes live in one registry-owned pool and link to each other by
//! index; released nodes go on a free list and are reused before the pool
//! grows. Every piece of storage the registry needs is reserved fallibly, so
//! running out of memory is reported as [`RegistryError::CapacityExhausted`]
//! instead of aborting, and a refused insert leaves the registry unchanged.
//!
//! The table doubles once the load factor would exceed 3/4, rehashing every
//! record, so chains stay short (expected length below one). A lookup is
//! O(chain length) in the worst case; growth is O(n) and amortised O(1)
//! per insert.
//!
//! The registry does no locking. Share it across threads behind a mutex.

use std::fmt;
use std::iter::FusedIterator;
use std::mem;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::error::RegistryError;
use crate::hash::bucket_index;
use crate::record::AllocationRecord;
use crate::report::{HeapReport, write_heap_dump};

/// Default number of buckets for a new registry.
pub const DEFAULT_BUCKETS: usize = 4096;

/// Smallest bucket array a registry will use.
pub const MIN_BUCKETS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Node {
    record: AllocationRecord,
    /// Next node in the chain, or in the free list once released.
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    /// Oldest record in the bucket. `None` implies an empty chain.
    inline: Option<AllocationRecord>,
    head: Option<usize>,
}

/// Registry of live allocations keyed by address.
#[derive(Debug)]
pub struct Registry {
    buckets: Vec<Bucket>,
    nodes: Vec<Node>,
    free: Option<usize>,
    len: usize,
    live_bytes: usize,
}

impl Registry {
    /// Create an empty registry with [`DEFAULT_BUCKETS`] buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUCKETS)
    }

    /// Create an empty registry with at least `buckets` buckets.
    ///
    /// The count is rounded up to a power of two and to at least
    /// [`MIN_BUCKETS`].
    #[must_use]
    pub fn with_capacity(buckets: usize) -> Self {
        let count = buckets
            .max(MIN_BUCKETS)
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        Self {
            buckets: vec![Bucket::default(); count],
            nodes: Vec::new(),
            free: None,
            len: 0,
            live_bytes: 0,
        }
    }

    /// Register a new allocation.
    ///
    /// Fails without modifying the registry if the address is already live or
    /// if storage for the record could not be reserved.
    pub fn insert(&mut self, record: AllocationRecord) -> Result<(), RegistryError> {
        if self.contains(record.address) {
            return Err(RegistryError::DuplicateAddress {
                address: record.address,
            });
        }
        self.try_reserve(1)?;
        let index = bucket_index(record.address, self.buckets.len());
        self.place(index, record);
        self.len += 1;
        self.live_bytes = self.live_bytes.saturating_add(record.size);
        Ok(())
    }

    /// Reserve storage so that the next `additional` inserts of fresh
    /// addresses cannot fail for lack of memory.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), RegistryError> {
        while self.needs_growth(additional) {
            self.grow()?;
        }
        self.reserve_nodes(additional)
    }

    /// Remove the record for exactly `address`, returning it if it was live.
    pub fn remove(&mut self, address: usize) -> Option<AllocationRecord> {
        let index = bucket_index(address, self.buckets.len());
        let bucket = self.buckets[index];
        let record = if bucket.inline?.address == address {
            let promoted = bucket.head.map(|head| {
                let node = self.nodes[head];
                self.buckets[index].head = node.next;
                self.release_node(head);
                node.record
            });
            mem::replace(&mut self.buckets[index].inline, promoted)?
        } else {
            let mut prev: Option<usize> = None;
            let mut cursor = bucket.head;
            loop {
                let current = cursor?;
                let node = self.nodes[current];
                if node.record.address == address {
                    match prev {
                        None => self.buckets[index].head = node.next,
                        Some(p) => self.nodes[p].next = node.next,
                    }
                    self.release_node(current);
                    break node.record;
                }
                prev = Some(current);
                cursor = node.next;
            }
        };
        self.len -= 1;
        self.live_bytes = self.live_bytes.saturating_sub(record.size);
        Some(record)
    }

    /// Look up the record for exactly `address`.
    #[must_use]
    pub fn get(&self, address: usize) -> Option<&AllocationRecord> {
        let bucket = &self.buckets[bucket_index(address, self.buckets.len())];
        let inline = bucket.inline.as_ref()?;
        if inline.address == address {
            return Some(inline);
        }
        let mut cursor = bucket.head;
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            if node.record.address == address {
                return Some(&node.record);
            }
            cursor = node.next;
        }
        None
    }

    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        self.get(address).is_some()
    }

    /// Number of live records.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.len
    }

    /// Sum of the sizes of all live records.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Longest bucket (inline slot plus chain). Diagnostic only.
    #[must_use]
    pub fn max_chain_len(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| {
                let mut len = usize::from(bucket.inline.is_some());
                let mut cursor = bucket.head;
                while let Some(index) = cursor {
                    len += 1;
                    cursor = self.nodes[index].next;
                }
                len
            })
            .max()
            .unwrap_or(0)
    }

    /// Traverse every live record: bucket order, then chain order.
    ///
    /// The order carries no meaning beyond being stable while the registry is
    /// not mutated. Each call starts a fresh traversal.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            buckets: self.buckets.iter(),
            nodes: &self.nodes,
            inline: None,
            chain: None,
            remaining: self.len,
        }
    }

    /// Snapshot every live record together with the totals.
    #[must_use]
    pub fn report(&self) -> HeapReport {
        HeapReport::from_records(self.iter().copied())
    }

    /// Borrowing heap dump. Formats and serializes like [`HeapReport`]
    /// without copying the records.
    #[must_use]
    pub fn dump(&self) -> Dump<'_> {
        Dump(self)
    }

    fn needs_growth(&self, additional: usize) -> bool {
        // len + additional > buckets * 3/4
        let wanted = self.len.saturating_add(additional);
        wanted.saturating_mul(4) > self.buckets.len().saturating_mul(3)
    }

    fn reserve_nodes(&mut self, additional: usize) -> Result<(), RegistryError> {
        if additional <= 1 && self.free.is_some() {
            return Ok(());
        }
        self.nodes.try_reserve(additional).map_err(|_| {
            RegistryError::CapacityExhausted {
                requested_bytes: self
                    .nodes
                    .len()
                    .saturating_add(additional)
                    .saturating_mul(mem::size_of::<Node>()),
            }
        })
    }

    fn grow(&mut self) -> Result<(), RegistryError> {
        let requested_buckets = self.buckets.len().saturating_mul(2);
        let mut table: Vec<Bucket> = Vec::new();
        table.try_reserve_exact(requested_buckets).map_err(|_| {
            RegistryError::CapacityExhausted {
                requested_bytes: requested_buckets.saturating_mul(mem::size_of::<Bucket>()),
            }
        })?;
        // After rehashing any record may need a chain node of its own.
        self.reserve_nodes(self.len)?;
        table.resize(requested_buckets, Bucket::default());

        let old = mem::replace(&mut self.buckets, table);
        for bucket in old {
            if let Some(record) = bucket.inline {
                let index = bucket_index(record.address, requested_buckets);
                self.place(index, record);
            }
            let mut cursor = bucket.head;
            while let Some(node) = cursor {
                cursor = self.nodes[node].next;
                self.relink(node);
            }
        }
        Ok(())
    }

    /// Store `record` in bucket `index`. Storage must already be reserved.
    fn place(&mut self, index: usize, record: AllocationRecord) {
        if self.buckets[index].inline.is_none() {
            self.buckets[index].inline = Some(record);
            return;
        }
        let node = match self.free {
            Some(free) => {
                self.free = self.nodes[free].next;
                self.nodes[free] = Node { record, next: None };
                free
            }
            None => {
                self.nodes.push(Node { record, next: None });
                self.nodes.len() - 1
            }
        };
        self.append(index, node);
    }

    /// Move an existing node into the bucket its record now hashes to.
    fn relink(&mut self, node: usize) {
        let record = self.nodes[node].record;
        let index = bucket_index(record.address, self.buckets.len());
        if self.buckets[index].inline.is_none() {
            self.buckets[index].inline = Some(record);
            self.release_node(node);
        } else {
            self.nodes[node].next = None;
            self.append(index, node);
        }
    }

    fn append(&mut self, index: usize, node: usize) {
        let Some(mut tail) = self.buckets[index].head else {
            self.buckets[index].head = Some(node);
            return;
        };
        while let Some(next) = self.nodes[tail].next {
            tail = next;
        }
        self.nodes[tail].next = Some(node);
    }

    fn release_node(&mut self, node: usize) {
        self.nodes[node].next = self.free;
        self.free = Some(node);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a AllocationRecord;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing traversal over a [`Registry`].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    buckets: std::slice::Iter<'a, Bucket>,
    nodes: &'a [Node],
    inline: Option<&'a AllocationRecord>,
    chain: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a AllocationRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.inline.take() {
                self.remaining -= 1;
                return Some(record);
            }
            if let Some(index) = self.chain {
                let node = &self.nodes[index];
                self.chain = node.next;
                self.remaining -= 1;
                return Some(&node.record);
            }
            let bucket = self.buckets.next()?;
            self.inline = bucket.inline.as_ref();
            self.chain = bucket.head;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl FusedIterator for Iter<'_> {}

/// Heap dump read straight from a [`Registry`]; see [`Registry::dump`].
#[derive(Debug, Clone, Copy)]
pub struct Dump<'a>(&'a Registry);

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_heap_dump(f, self.0.iter(), self.0.live_bytes, self.0.len)
    }
}

impl Serialize for Dump<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("HeapReport", 3)?;
        state.serialize_field("records", &Records(self.0))?;
        state.serialize_field("total_bytes", &self.0.live_bytes)?;
        state.serialize_field("count", &self.0.len)?;
        state.end()
    }
}

struct Records<'a>(&'a Registry);

impl Serialize for Records<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}
