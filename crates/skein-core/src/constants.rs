//! Protocol-wide limits.

/// Maximum number of parents a vertex may reference.
pub const MAX_PARENTS_PER_VERTEX: usize = 128;

/// Maximum number of transactions a vertex may carry.
pub const MAX_TXS_PER_VERTEX: usize = 128;

/// Maximum number of vertex blobs accepted in (or packed into) one
/// `Ancestors` response. Anything past this is truncated, not an error.
pub const MAX_ANCESTORS_RETURNED: usize = 2048;

/// Byte budget for one `Ancestors` response.
pub const MAX_ANCESTORS_BYTES: usize = 2 * 1024 * 1024;

/// Concurrent `GetAncestors` requests a bootstrapping chain keeps in flight.
pub const MAX_OUTSTANDING_FETCHES: usize = 10;

/// Decoded vertices kept by the serializer's lookup cache.
pub const VERTEX_CACHE_SIZE: usize = 1024;

/// Vertex IDs the bootstrapper remembers as already processed.
pub const PROCESSED_CACHE_SIZE: usize = 2048;
