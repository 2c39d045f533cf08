//! Registry error types.

/// Reasons an insertion into the registry can be refused.
///
/// Removal and lookup never fail; absence is reported through `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A live record already exists for this address.
    #[error("address {address:#x} is already tracked")]
    DuplicateAddress { address: usize },
    /// Storage for the bucket array or the chain pool could not be grown.
    #[error("could not allocate {requested_bytes} bytes of tracking storage")]
    CapacityExhausted { requested_bytes: usize },
}
