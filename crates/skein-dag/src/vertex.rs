//! The decoded, engine-facing vertex.

use crate::tx::TxHandle;
use crate::wire::WireVertex;
use skein_core::{ChainId, VertexId};

/// An immutable vertex with its transactions decoded.
///
/// Parents are stored as IDs, never as references — the serializer's arena
/// is the single authority for resolving them, which permits lazy loading
/// from storage and rules out cyclic ownership.
#[derive(Clone)]
pub struct Vertex {
    id: VertexId,
    chain_id: ChainId,
    height: u64,
    parents: Vec<VertexId>,
    txs: Vec<TxHandle>,
    bytes: Vec<u8>,
    stop_vertex: bool,
}

impl Vertex {
    pub fn from_wire(wire: &WireVertex, txs: Vec<TxHandle>) -> Vertex {
        Vertex {
            id: wire.id(),
            chain_id: wire.chain_id(),
            height: wire.height(),
            parents: wire.parents().to_vec(),
            txs,
            bytes: wire.bytes().to_vec(),
            stop_vertex: wire.is_stop_vertex(),
        }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// 1 + max(parent heights); 0 for a parentless vertex.
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn parents(&self) -> &[VertexId] {
        &self.parents
    }

    pub fn txs(&self) -> &[TxHandle] {
        &self.txs
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_stop_vertex(&self) -> bool {
        self.stop_vertex
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("height", &self.height)
            .field("parents", &self.parents.len())
            .field("txs", &self.txs.len())
            .field("stop_vertex", &self.stop_vertex)
            .finish()
    }
}
