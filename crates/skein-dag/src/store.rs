//! The serializer seam: everything the engine may ask of durable DAG state.

use crate::vertex::Vertex;
use skein_core::{SkeinError, Status, VertexId};

/// The authoritative vertex arena backed by durable storage.
///
/// Lookups take `&mut self`: implementations maintain an internal LRU of
/// decoded vertices. All mutations for one chain are serialized by the
/// owning chain actor, so no further synchronization is layered here.
pub trait VertexStore {
    /// Parse wire bytes, verify the declared chain, and store the vertex as
    /// `Processing` if it was unknown. Idempotent for known vertices.
    fn parse_vertex(&mut self, bytes: &[u8]) -> Result<Vertex, SkeinError>;

    /// Fetch a known vertex. `UnknownVertex` — a typed miss, so callers can
    /// tell "fetch it from a peer" apart from real failures.
    fn get_vertex(&mut self, id: &VertexId) -> Result<Vertex, SkeinError>;

    fn vertex_status(&mut self, id: &VertexId) -> Status;

    /// The current frontier: accepted vertices with no accepted descendant.
    fn edge(&self) -> Vec<VertexId>;

    /// Transition a vertex to `Accepted`, moving the frontier atomically.
    /// Requires every parent accepted and every contained transaction
    /// accepted; violating that is a programming error and fails loudly.
    /// Accepting an already-accepted vertex is a no-op.
    fn accept_vertex(&mut self, id: &VertexId) -> Result<(), SkeinError>;

    /// Transition a vertex to `Rejected`. Idempotent.
    fn reject_vertex(&mut self, id: &VertexId) -> Result<(), SkeinError>;

    /// Construct (or re-surface) the stop vertex closing the DAG over the
    /// given parents. Height is 1 + max(parent heights).
    fn build_stop_vertex(&mut self, parents: Vec<VertexId>) -> Result<Vertex, SkeinError>;

    /// True iff the frontier is exactly one accepted stop vertex.
    fn stop_vertex_accepted(&mut self) -> Result<bool, SkeinError>;
}
