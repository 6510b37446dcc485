//! Engine-side test collaborators.

use crate::traits::{Sender, Validators};
use skein_core::{NodeId, RequestId, VertexId};
use std::sync::{Arc, Mutex};

/// Records every outbound request; the shared log outlives the engine that
/// owns the sender.
#[derive(Clone, Default)]
pub struct RecordingSender {
    pub sent: Arc<Mutex<Vec<(NodeId, RequestId, VertexId)>>>,
}

impl RecordingSender {
    pub fn new() -> RecordingSender {
        RecordingSender::default()
    }

    pub fn log(&self) -> Vec<(NodeId, RequestId, VertexId)> {
        self.sent.lock().unwrap().clone()
    }

    /// How many requests were ever sent for `vertex_id`.
    pub fn requests_for(&self, vertex_id: &VertexId) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, v)| v == vertex_id)
            .count()
    }
}

impl Sender for RecordingSender {
    fn send_get_ancestors(&mut self, peer: NodeId, request_id: RequestId, vertex_id: VertexId) {
        self.sent.lock().unwrap().push((peer, request_id, vertex_id));
    }
}

/// Cycles through a fixed peer list.
pub struct RoundRobinValidators {
    peers: Vec<NodeId>,
    next: usize,
}

impl RoundRobinValidators {
    pub fn new(peers: Vec<NodeId>) -> RoundRobinValidators {
        RoundRobinValidators { peers, next: 0 }
    }
}

impl Validators for RoundRobinValidators {
    fn sample(&mut self) -> Option<NodeId> {
        if self.peers.is_empty() {
            return None;
        }
        let peer = self.peers[self.next % self.peers.len()];
        self.next += 1;
        Some(peer)
    }
}
