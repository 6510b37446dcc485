//! Seams to the external collaborators the engine drives.
//!
//! Transport, peer sampling, the vote-counting quorum logic, and the
//! consensus instance proper all live outside this crate; the engine only
//! sees these traits.

use crate::bag::VoteBag;
use skein_core::{NodeId, RequestId, SkeinError, VertexId};
use skein_dag::tx::TxHandle;

/// Fire-and-forget outbound messages. Sending never blocks the chain
/// actor; responses and timeouts come back later as engine events.
pub trait Sender {
    fn send_get_ancestors(&mut self, peer: NodeId, request_id: RequestId, vertex_id: VertexId);
}

/// Peer sampling over the current validator set. Weighting and membership
/// are maintained elsewhere; the engine only asks for the next peer to try.
pub trait Validators {
    fn sample(&mut self) -> Option<NodeId>;
}

/// The underlying consensus instance the voter drives.
pub trait Consensus {
    /// Whether the vertex has been issued into this instance. Votes for
    /// unissued vertices are bubbled to their parents instead.
    fn vertex_issued(&self, id: &VertexId) -> bool;

    /// Record one completed poll's bubbled votes.
    fn record_poll(&mut self, votes: VoteBag) -> Result<(), SkeinError>;

    /// Transactions orphaned by vertices that lost out; candidates for
    /// re-issuance.
    fn orphans(&self) -> Vec<skein_core::TxId>;

    /// True when no further poll can change any pending decision without
    /// new input.
    fn quiesce(&self) -> bool;
}

/// Vote counting for outstanding poll rounds, keyed by request ID.
/// Implementations decide quorum; until it is met, `vote` returns nothing.
pub trait PollAggregator {
    fn vote(
        &mut self,
        request_id: RequestId,
        peer: NodeId,
        response: Vec<VertexId>,
    ) -> Vec<VoteBag>;
}

/// Actions the poll resolver hands back to the enclosing engine.
pub trait EngineHooks {
    /// Re-batch orphaned transactions into a fresh vertex, bypassing the
    /// normal batching threshold so re-issuance cannot starve.
    fn issue_batch(&mut self, txs: Vec<TxHandle>) -> Result<(), SkeinError>;

    /// Schedule the next poll round immediately.
    fn repoll(&mut self);
}
