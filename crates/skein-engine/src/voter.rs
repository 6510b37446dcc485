//! Turning peer poll responses into recorded consensus decisions.
//!
//! One `Voter` exists per outstanding poll response. A response may name
//! vertices this node has not fetched yet; the voter then waits on those
//! fetches and resolves once its dependency set drains (an abandoned fetch
//! counts as drained — its votes just evaporate during bubbling). On
//! resolution the response goes through the vote aggregator, and each
//! completed poll's votes are bubbled so that votes cast for vertices we
//! have not issued locally land on their nearest issued ancestors instead
//! of vanishing.

use crate::bag::VoteBag;
use crate::traits::{Consensus, EngineHooks, PollAggregator};
use skein_core::{NodeId, RequestId, SkeinError, VertexId};
use skein_dag::heap::VertexHeap;
use skein_dag::store::VertexStore;
use skein_dag::tx::DagVm;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One poll record: who answered which round with which preference, and
/// the vertex fetches still pending before the answer can be counted.
struct Voter {
    peer: NodeId,
    request_id: RequestId,
    response: Vec<VertexId>,
    deps: HashSet<VertexId>,
}

pub struct PollResolver<M, VM, C, P, H>
where
    M: VertexStore,
    VM: DagVm,
    C: Consensus,
    P: PollAggregator,
    H: EngineHooks,
{
    manager: M,
    vm: VM,
    consensus: C,
    polls: P,
    hooks: H,
    voters: HashMap<u64, Voter>,
    waiting: HashMap<VertexId, Vec<u64>>,
    next_voter: u64,
}

impl<M, VM, C, P, H> PollResolver<M, VM, C, P, H>
where
    M: VertexStore,
    VM: DagVm,
    C: Consensus,
    P: PollAggregator,
    H: EngineHooks,
{
    pub fn new(manager: M, vm: VM, consensus: C, polls: P, hooks: H) -> Self {
        PollResolver {
            manager,
            vm,
            consensus,
            polls,
            hooks,
            voters: HashMap::new(),
            waiting: HashMap::new(),
            next_voter: 0,
        }
    }

    pub fn manager_mut(&mut self) -> &mut M {
        &mut self.manager
    }

    pub fn consensus_mut(&mut self) -> &mut C {
        &mut self.consensus
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Voters still blocked on vertex fetches.
    pub fn num_pending(&self) -> usize {
        self.voters.len()
    }

    /// Record a peer's poll response. Returns the vertex IDs that must be
    /// fetched (and then `fulfill`ed or `abandon`ed) before this response
    /// can be counted; empty means it was counted immediately.
    pub fn chits(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        votes: Vec<VertexId>,
    ) -> Result<Vec<VertexId>, SkeinError> {
        let mut deps = HashSet::new();
        for id in &votes {
            match self.manager.get_vertex(id) {
                Ok(_) => {}
                Err(SkeinError::UnknownVertex(_)) => {
                    deps.insert(*id);
                }
                Err(e) => return Err(e),
            }
        }
        let missing: Vec<VertexId> = deps.iter().copied().collect();

        let voter = Voter {
            peer,
            request_id,
            response: votes,
            deps,
        };
        if voter.deps.is_empty() {
            self.resolve(voter)?;
        } else {
            debug!(
                peer = %peer,
                request = request_id,
                pending = voter.deps.len(),
                "poll response blocked on vertex fetches"
            );
            let key = self.next_voter;
            self.next_voter += 1;
            for dep in &voter.deps {
                self.waiting.entry(*dep).or_default().push(key);
            }
            self.voters.insert(key, voter);
        }
        Ok(missing)
    }

    /// A failed poll counts as an empty response so the round still closes.
    pub fn query_failed(&mut self, peer: NodeId, request_id: RequestId) -> Result<(), SkeinError> {
        self.chits(peer, request_id, Vec::new()).map(|_| ())
    }

    /// A pending vertex fetch completed.
    pub fn fulfill(&mut self, id: &VertexId) -> Result<(), SkeinError> {
        self.signal(id, false)
    }

    /// A pending vertex fetch was given up on. Identical to `fulfill`:
    /// resolution proceeds and the bubbling pass drops the dead votes.
    pub fn abandon(&mut self, id: &VertexId) -> Result<(), SkeinError> {
        self.signal(id, true)
    }

    fn signal(&mut self, id: &VertexId, abandoned: bool) -> Result<(), SkeinError> {
        // Late or duplicate signals find no waiters: silent no-op.
        let Some(waiters) = self.waiting.remove(id) else {
            return Ok(());
        };
        if abandoned {
            debug!(vertex = %id, waiters = waiters.len(), "abandoning fetch dependency");
        }
        for key in waiters {
            let ready = match self.voters.get_mut(&key) {
                Some(voter) => {
                    voter.deps.remove(id);
                    voter.deps.is_empty()
                }
                None => false,
            };
            if ready {
                let voter = self.voters.remove(&key).expect("voter is present");
                self.resolve(voter)?;
            }
        }
        Ok(())
    }

    /// Submit the response to the aggregator; when this closes the round's
    /// quorum, bubble and record the results, re-issue any orphans, and
    /// repoll unless consensus has quiesced.
    fn resolve(&mut self, voter: Voter) -> Result<(), SkeinError> {
        let results = self
            .polls
            .vote(voter.request_id, voter.peer, voter.response);
        if results.is_empty() {
            return Ok(());
        }

        let mut bubbled = Vec::with_capacity(results.len());
        for bag in results {
            bubbled.push(self.bubble_votes(bag)?);
        }
        for bag in bubbled {
            debug!(vertices = bag.len(), "finishing poll");
            self.consensus.record_poll(bag)?;
        }

        // Orphaned transactions get re-batched, forced past the batching
        // threshold, so losing a vertex never strands its transactions.
        let orphans = self.consensus.orphans();
        let mut txs = Vec::with_capacity(orphans.len());
        for tx_id in orphans {
            match self.vm.get_tx(&tx_id) {
                Ok(tx) => txs.push(tx),
                Err(e) => {
                    warn!(tx = %tx_id, error = %e, "failed to fetch tx during attempted re-issuance");
                }
            }
        }
        if !txs.is_empty() {
            debug!(count = txs.len(), "re-issuing orphaned transactions");
            self.hooks.issue_batch(txs)?;
        }

        if self.consensus.quiesce() {
            debug!("consensus can quiesce");
            return Ok(());
        }
        debug!("consensus can't quiesce; repolling");
        self.hooks.repoll();
        Ok(())
    }

    /// Reattribute votes for unissued vertices to their parents, walking
    /// max-height-first so every vertex is settled before its ancestors.
    fn bubble_votes(&mut self, mut votes: VoteBag) -> Result<VoteBag, SkeinError> {
        let mut heap = VertexHeap::new();
        for id in votes.ids() {
            match self.manager.get_vertex(&id) {
                Ok(vtx) => {
                    heap.push(vtx.id(), vtx.height());
                }
                Err(SkeinError::UnknownVertex(_)) => {
                    debug!(vertex = %id, dropped = votes.get(&id).len(), "dropping votes: vertex unknown");
                    votes.remove(&id);
                }
                Err(e) => return Err(e),
            }
        }

        while let Some(id) = heap.pop() {
            let status = self.manager.vertex_status(&id);
            if !status.fetched() {
                debug!(vertex = %id, dropped = votes.get(&id).len(), "dropping votes: vertex unknown");
                votes.remove(&id);
                continue;
            }
            if status.decided() {
                debug!(
                    vertex = %id,
                    status = %status,
                    dropped = votes.get(&id).len(),
                    "dropping votes: vertex already decided"
                );
                votes.remove(&id);
                continue;
            }
            if !self.consensus.vertex_issued(&id) {
                let set = votes.remove(&id);
                debug!(vertex = %id, bubbled = set.len(), "bubbling votes: vertex not yet issued");
                let vtx = self.manager.get_vertex(&id)?;
                for parent in vtx.parents() {
                    votes.union(*parent, set);
                    match self.manager.get_vertex(parent) {
                        Ok(pv) => {
                            heap.push(pv.id(), pv.height());
                        }
                        Err(SkeinError::UnknownVertex(_)) => {
                            // Unknown parent: push it anyway so its votes
                            // are dropped when it pops.
                            heap.push(*parent, 0);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{Status, TxId};
    use skein_dag::testing::{TestStore, TestTx, TestVm};
    use skein_dag::tx::TxHandle;
    use skein_dag::DagTx;
    use std::sync::{Arc, Mutex};

    fn chain() -> skein_core::ChainId {
        skein_core::ChainId::from_bytes([1u8; 32])
    }

    fn peer(n: u8) -> NodeId {
        NodeId::from_bytes([n; 32])
    }

    // ── Doubles ──────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockConsensus {
        issued: HashSet<VertexId>,
        recorded: Vec<VoteBag>,
        orphans: Vec<TxId>,
        quiescent: bool,
    }

    impl Consensus for MockConsensus {
        fn vertex_issued(&self, id: &VertexId) -> bool {
            self.issued.contains(id)
        }

        fn record_poll(&mut self, votes: VoteBag) -> Result<(), SkeinError> {
            self.recorded.push(votes);
            Ok(())
        }

        fn orphans(&self) -> Vec<TxId> {
            self.orphans.clone()
        }

        fn quiesce(&self) -> bool {
            self.quiescent
        }
    }

    /// Counts responses per request; closes the round at `threshold`,
    /// assigning voter indices in arrival order.
    struct MockPolls {
        threshold: usize,
        received: HashMap<RequestId, Vec<Vec<VertexId>>>,
    }

    impl MockPolls {
        fn new(threshold: usize) -> MockPolls {
            MockPolls {
                threshold,
                received: HashMap::new(),
            }
        }
    }

    impl PollAggregator for MockPolls {
        fn vote(
            &mut self,
            request_id: RequestId,
            _peer: NodeId,
            response: Vec<VertexId>,
        ) -> Vec<VoteBag> {
            let entry = self.received.entry(request_id).or_default();
            entry.push(response);
            if entry.len() < self.threshold {
                return Vec::new();
            }
            let responses = self.received.remove(&request_id).unwrap();
            let mut bag = VoteBag::new();
            for (i, response) in responses.into_iter().enumerate() {
                for id in response {
                    bag.add(id, i as u8);
                }
            }
            vec![bag]
        }
    }

    #[derive(Default)]
    struct MockHooks {
        issued_batches: Arc<Mutex<Vec<Vec<TxHandle>>>>,
        repolls: usize,
    }

    impl EngineHooks for MockHooks {
        fn issue_batch(&mut self, txs: Vec<TxHandle>) -> Result<(), SkeinError> {
            self.issued_batches.lock().unwrap().push(txs);
            Ok(())
        }

        fn repoll(&mut self) {
            self.repolls += 1;
        }
    }

    type Resolver = PollResolver<TestStore, TestVm, MockConsensus, MockPolls, MockHooks>;

    fn resolver(store: TestStore, threshold: usize) -> Resolver {
        let vm = store.vm();
        PollResolver::new(
            store,
            vm,
            MockConsensus::default(),
            MockPolls::new(threshold),
            MockHooks::default(),
        )
    }

    // ── Bubbling ─────────────────────────────────────────────────────────────

    #[test]
    fn vote_for_unissued_vertex_bubbles_to_issued_ancestor() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);
        let v1 = store.add_vertex(&[v0], &[b"t1"]);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(v0); // v1 not issued

        let missing = r.chits(peer(1), 1, vec![v1]).unwrap();
        assert!(missing.is_empty());

        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].get(&v0).len(), 1, "vote fully attributed to v0");
        assert!(recorded[0].get(&v1).is_empty(), "no vote left on v1");
    }

    #[test]
    fn bubbling_walks_multiple_unissued_levels() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);
        let v1 = store.add_vertex(&[v0], &[b"t1"]);
        let v2 = store.add_vertex(&[v1], &[b"t2"]);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(v0);

        r.chits(peer(1), 1, vec![v2]).unwrap();
        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded[0].get(&v0).len(), 1);
        assert!(recorded[0].get(&v1).is_empty());
        assert!(recorded[0].get(&v2).is_empty());
    }

    #[test]
    fn votes_for_decided_vertices_are_dropped_not_bubbled() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);
        let rejected = store.add_vertex(&[v0], &[b"t1"]);
        store.set_status(rejected, Status::Rejected);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(v0);

        r.chits(peer(1), 1, vec![rejected]).unwrap();
        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].is_empty(), "rejected vertex votes never attributed");
    }

    #[test]
    fn diamond_parents_each_get_the_bubbled_vote_once() {
        let mut store = TestStore::new(chain());
        let a = store.add_vertex(&[], &[b"a"]);
        let b = store.add_vertex(&[], &[b"b"]);
        let child = store.add_vertex(&[a, b], &[b"c"]);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(a);
        r.consensus_mut().issued.insert(b);

        r.chits(peer(1), 1, vec![child]).unwrap();
        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded[0].get(&a).len(), 1);
        assert_eq!(recorded[0].get(&b).len(), 1);
    }

    // ── Quorum and dependency gating ─────────────────────────────────────────

    #[test]
    fn below_quorum_resolution_is_silent() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);

        let mut r = resolver(store, 2);
        r.consensus_mut().issued.insert(v0);

        r.chits(peer(1), 1, vec![v0]).unwrap();
        assert!(r.consensus_mut().recorded.is_empty());
        assert_eq!(r.hooks_mut().repolls, 0);
    }

    #[test]
    fn quorum_met_by_second_voter() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);

        let mut r = resolver(store, 2);
        r.consensus_mut().issued.insert(v0);

        r.chits(peer(1), 1, vec![v0]).unwrap();
        r.chits(peer(2), 1, vec![v0]).unwrap();
        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].get(&v0).len(), 2);
    }

    #[test]
    fn vote_waits_for_fetch_then_fulfills() {
        let mut store = TestStore::new(chain());
        let unknown = store.make_vertex(&[], &[b"u"]);
        let unknown_id = unknown.id();

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(unknown_id);

        let missing = r.chits(peer(1), 1, vec![unknown_id]).unwrap();
        assert_eq!(missing, vec![unknown_id]);
        assert_eq!(r.num_pending(), 1);
        assert!(r.consensus_mut().recorded.is_empty());

        // The fetch lands: insert and fulfill.
        let vtx = unknown;
        r.manager_mut().insert(&vtx);
        r.fulfill(&unknown_id).unwrap();

        assert_eq!(r.num_pending(), 0);
        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].get(&unknown_id).len(), 1);
    }

    #[test]
    fn abandoned_fetch_still_resolves_with_votes_dropped() {
        let mut store = TestStore::new(chain());
        let unknown = store.make_vertex(&[], &[b"u2"]);
        let unknown_id = unknown.id();

        let mut r = resolver(store, 1);
        r.chits(peer(1), 1, vec![unknown_id]).unwrap();
        assert_eq!(r.num_pending(), 1);

        r.abandon(&unknown_id).unwrap();
        assert_eq!(r.num_pending(), 0);
        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].is_empty());
    }

    #[test]
    fn late_fulfill_is_a_noop() {
        let store = TestStore::new(chain());
        let mut r = resolver(store, 1);
        r.fulfill(&VertexId::from_bytes([9u8; 32])).unwrap();
        assert!(r.consensus_mut().recorded.is_empty());
    }

    // ── Steady-state side effects ────────────────────────────────────────────

    #[test]
    fn orphans_are_reissued_forced() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);
        let orphan = TestTx::new(b"orphaned");
        let orphan_id = orphan.id();
        store.vm().register(orphan);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(v0);
        r.consensus_mut().orphans = vec![orphan_id];
        let batches = r.hooks_mut().issued_batches.clone();

        r.chits(peer(1), 1, vec![v0]).unwrap();
        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].id(), orphan_id);
    }

    #[test]
    fn unfetchable_orphan_is_skipped_not_fatal() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(v0);
        r.consensus_mut().orphans = vec![TxId::from_bytes([7u8; 32])];
        let batches = r.hooks_mut().issued_batches.clone();

        r.chits(peer(1), 1, vec![v0]).unwrap();
        assert!(batches.lock().unwrap().is_empty());
        assert_eq!(r.consensus_mut().recorded.len(), 1);
    }

    #[test]
    fn repolls_until_quiescent() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);

        let mut r = resolver(store, 1);
        r.consensus_mut().issued.insert(v0);

        r.chits(peer(1), 1, vec![v0]).unwrap();
        assert_eq!(r.hooks_mut().repolls, 1);

        r.consensus_mut().quiescent = true;
        r.chits(peer(1), 2, vec![v0]).unwrap();
        assert_eq!(r.hooks_mut().repolls, 1, "no repoll once quiescent");
    }

    #[test]
    fn failed_query_closes_the_round_as_empty() {
        let mut store = TestStore::new(chain());
        let v0 = store.add_vertex(&[], &[b"t0"]);

        let mut r = resolver(store, 2);
        r.consensus_mut().issued.insert(v0);

        r.chits(peer(1), 1, vec![v0]).unwrap();
        r.query_failed(peer(2), 1).unwrap();

        let recorded = &r.consensus_mut().recorded;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].get(&v0).len(), 1, "only the real vote counts");
    }
}
