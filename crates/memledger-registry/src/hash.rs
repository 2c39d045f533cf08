//! Address hashing.
//!
//! Addresses are hashed by their integer value only, so the result is the
//! same on every platform for the same number. The mixer is the 64-bit
//! finalizer from SplitMix64: every input bit affects the low output bits,
//! which matters because allocator addresses share their low 4 bits.

/// Mix an address into a well-distributed 64-bit value.
#[must_use]
#[inline]
pub const fn mix(address: usize) -> u64 {
    let mut z = address as u64;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Bucket for `address` in a table of `bucket_count` buckets.
///
/// `bucket_count` must be a power of two.
#[must_use]
#[inline]
pub const fn bucket_index(address: usize, bucket_count: usize) -> usize {
    debug_assert!(bucket_count.is_power_of_two());
    (mix(address) as usize) & (bucket_count - 1)
}
