//! Correlation of outstanding ancestor fetches.
//!
//! One entry per in-flight `GetAncestors` request. The reverse index
//! enforces single-flight per vertex ID, and `remove` is the only way a
//! response or timeout is matched to what was asked — anything that does
//! not correlate is unsolicited and dropped by the caller.

use skein_core::{NodeId, RequestId, VertexId};
use std::collections::HashMap;

#[derive(Default)]
pub struct OutstandingRequests {
    by_request: HashMap<(NodeId, RequestId), VertexId>,
    by_vertex: HashMap<VertexId, (NodeId, RequestId)>,
}

impl OutstandingRequests {
    pub fn new() -> OutstandingRequests {
        OutstandingRequests::default()
    }

    /// Record an in-flight request. Returns false (and records nothing) if
    /// the vertex already has a request outstanding or the (peer, request)
    /// key is taken.
    pub fn add(&mut self, peer: NodeId, request_id: RequestId, vertex_id: VertexId) -> bool {
        if self.by_vertex.contains_key(&vertex_id)
            || self.by_request.contains_key(&(peer, request_id))
        {
            return false;
        }
        self.by_request.insert((peer, request_id), vertex_id);
        self.by_vertex.insert(vertex_id, (peer, request_id));
        true
    }

    /// Correlate a response or timeout. Returns the vertex the request was
    /// for, or `None` for unsolicited/duplicate correlation.
    pub fn remove(&mut self, peer: &NodeId, request_id: RequestId) -> Option<VertexId> {
        let vertex_id = self.by_request.remove(&(*peer, request_id))?;
        self.by_vertex.remove(&vertex_id);
        Some(vertex_id)
    }

    pub fn contains_vertex(&self, vertex_id: &VertexId) -> bool {
        self.by_vertex.contains_key(vertex_id)
    }

    pub fn len(&self) -> usize {
        self.by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_request.is_empty()
    }
}
