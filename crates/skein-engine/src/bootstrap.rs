//! Bootstrapping a chain from an accepted-frontier hint.
//!
//! The bootstrapper walks the DAG backwards from the frontier vertices a
//! quorum of peers reported, fetching unknown ancestors one request per
//! vertex at a time, until nothing is missing; it then accepts everything
//! bottom-up through the durable job queues. Peers are adversarial:
//! responses may be truncated, reordered, unrelated, or never arrive, and
//! none of that is allowed to wedge or corrupt the chain.

use crate::requests::OutstandingRequests;
use crate::traits::{Sender, Validators};
use lru::LruCache;
use skein_core::constants::PROCESSED_CACHE_SIZE;
use skein_core::{BootstrapConfig, NodeId, RequestId, SkeinError, Status, TxId, VertexId};
use skein_dag::heap::VertexHeap;
use skein_dag::store::VertexStore;
use skein_dag::tx::DagVm;
use skein_dag::vertex::Vertex;
use skein_state::kv::Database;
use skein_state::queue::{JobId, JobQueue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

/// Lifecycle of one bootstrap run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    FetchingAncestors,
    Finalizing,
    Done,
}

pub struct Bootstrapper<D, M, VM, S, V>
where
    D: Database,
    M: VertexStore,
    VM: DagVm,
    S: Sender,
    V: Validators,
{
    config: BootstrapConfig,
    manager: M,
    vm: VM,
    sender: S,
    validators: V,
    /// Vertices awaiting acceptance, blocked on parents and own txs.
    vtx_jobs: JobQueue<D>,
    /// Transactions awaiting acceptance, blocked on their dependencies.
    tx_jobs: JobQueue<D>,
    outstanding: OutstandingRequests,
    /// Fetch targets not yet put on the wire. Cleared by `restart`; the
    /// durable missing set in `vtx_jobs` is not.
    need_to_fetch: VecDeque<VertexId>,
    need_set: HashSet<VertexId>,
    /// Vertices already walked this run; keeps response fan-out linear.
    processed: LruCache<VertexId, ()>,
    phase: Phase,
    request_id: RequestId,
    on_finished: Box<dyn FnMut(RequestId) + Send>,
    /// Set once a frontier has been seeded (or durable work was resumed);
    /// until then there is nothing meaningful to finish.
    seeded: bool,
    finished: bool,
}

impl<D, M, VM, S, V> Bootstrapper<D, M, VM, S, V>
where
    D: Database,
    M: VertexStore,
    VM: DagVm,
    S: Sender,
    V: Validators,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BootstrapConfig,
        manager: M,
        vm: VM,
        sender: S,
        validators: V,
        vtx_jobs: JobQueue<D>,
        tx_jobs: JobQueue<D>,
        on_finished: Box<dyn FnMut(RequestId) + Send>,
    ) -> Bootstrapper<D, M, VM, S, V> {
        Bootstrapper {
            config,
            manager,
            vm,
            sender,
            validators,
            vtx_jobs,
            tx_jobs,
            outstanding: OutstandingRequests::new(),
            need_to_fetch: VecDeque::new(),
            need_set: HashSet::new(),
            processed: LruCache::new(NonZeroUsize::new(PROCESSED_CACHE_SIZE).unwrap()),
            phase: Phase::Initializing,
            request_id: 0,
            on_finished,
            seeded: false,
            finished: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn manager(&mut self) -> &mut M {
        &mut self.manager
    }

    pub fn num_outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Begin (or resume) bootstrapping. Durable queue state from an
    /// interrupted run is revalidated and its still-missing vertices are
    /// fetched again.
    pub fn start(&mut self, request_id: RequestId) -> Result<(), SkeinError> {
        info!(request = request_id, "starting bootstrap");
        self.request_id = request_id;
        if self.phase == Phase::Initializing {
            self.phase = Phase::FetchingAncestors;
        }

        // Purge dependency edges satisfied before the previous run stopped.
        {
            let manager = &mut self.manager;
            let vm = &self.vm;
            self.vtx_jobs.revalidate(|dep| {
                if manager.vertex_status(&VertexId::from_bytes(*dep)) == Status::Accepted {
                    return true;
                }
                vm.get_tx(&TxId::from_bytes(*dep))
                    .map(|tx| tx.status() == Status::Accepted)
                    .unwrap_or(false)
            })?;
        }
        {
            let vm = &self.vm;
            self.tx_jobs.revalidate(|dep| {
                vm.get_tx(&TxId::from_bytes(*dep))
                    .map(|tx| tx.status() == Status::Accepted)
                    .unwrap_or(false)
            })?;
        }

        if !self.vtx_jobs.is_empty() || !self.tx_jobs.is_empty() || self.vtx_jobs.num_missing() > 0
        {
            // Durable work from an interrupted run: resume it.
            self.seeded = true;
        }
        for raw in self.vtx_jobs.missing_ids() {
            let id = VertexId::from_bytes(raw);
            if self.need_set.insert(id) {
                self.need_to_fetch.push_back(id);
            }
        }
        self.fetch_pending()
    }

    /// Seed the run with the accepted frontier a sampled quorum reported.
    pub fn force_accepted(&mut self, accepted: &[VertexId]) -> Result<(), SkeinError> {
        if self.phase == Phase::Initializing {
            self.phase = Phase::FetchingAncestors;
        }
        self.seeded = true;
        info!(frontier = accepted.len(), "seeding bootstrap from accepted frontier");

        let mut pending: Vec<VertexId> = self
            .vtx_jobs
            .missing_ids()
            .into_iter()
            .map(VertexId::from_bytes)
            .collect();
        pending.extend_from_slice(accepted);

        let mut to_process = Vec::new();
        for id in pending {
            match self.manager.get_vertex(&id) {
                Ok(vtx) => {
                    if self.manager.vertex_status(&id) == Status::Accepted {
                        self.vtx_jobs.remove_missing(id.as_bytes())?;
                    } else {
                        to_process.push(vtx);
                    }
                }
                Err(SkeinError::UnknownVertex(_)) => self.queue_fetch(id)?,
                Err(e) => return Err(e),
            }
        }
        self.process(to_process)
    }

    /// Re-enter with a newer frontier reported mid-bootstrap. The in-memory
    /// fetch working set is rebuilt; durable queues and live outstanding
    /// requests are kept, so nothing already proven fetchable is re-asked.
    pub fn restart(&mut self, accepted: &[VertexId]) -> Result<(), SkeinError> {
        debug!(frontier = accepted.len(), "restarting bootstrap with a newer frontier");
        self.need_to_fetch.clear();
        self.need_set.clear();
        self.phase = Phase::FetchingAncestors;
        self.force_accepted(accepted)
    }

    /// Handle an `Ancestors` response: a depth-first batch of vertex blobs,
    /// conventionally led by the requested vertex, but ordering is
    /// untrusted. Blobs parse in order until the first unusable one; a
    /// response contributing nothing triggers a fresh request elsewhere.
    pub fn ancestors(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
        blobs: Vec<Vec<u8>>,
    ) -> Result<(), SkeinError> {
        let Some(requested) = self.outstanding.remove(&peer, request_id) else {
            debug!(peer = %peer, request = request_id, "dropping unsolicited Ancestors response");
            return Ok(());
        };

        // A blob is usable only if something actually needs it: the
        // requested vertex, a durably recorded missing ancestor, or a
        // parent of a vertex this same response already delivered.
        // Ordering within the response proves nothing.
        let mut eligible: HashSet<VertexId> = self
            .vtx_jobs
            .missing_ids()
            .iter()
            .map(|raw| VertexId::from_bytes(*raw))
            .collect();
        eligible.insert(requested);

        let mut parsed: Vec<Vertex> = Vec::new();
        for blob in blobs.iter().take(self.config.max_ancestors_received) {
            match self.manager.parse_vertex(blob) {
                Ok(vtx) => {
                    if !eligible.contains(&vtx.id()) {
                        debug!(peer = %peer, vertex = %vtx.id(), "ignoring unneeded vertex in response");
                        continue;
                    }
                    for parent in vtx.parents() {
                        eligible.insert(*parent);
                    }
                    parsed.push(vtx);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(peer = %peer, error = %e, "stopping at unusable ancestor blob");
                    break;
                }
            }
        }

        if parsed.is_empty() {
            debug!(vertex = %requested, peer = %peer, "response contributed nothing; refetching");
            if self.need_set.insert(requested) {
                self.need_to_fetch.push_back(requested);
            }
            return self.fetch_pending();
        }

        self.process(parsed)?;

        // Ordering is untrusted: the requested vertex is satisfied only if
        // the response actually delivered it, never by position.
        match self.manager.get_vertex(&requested) {
            Ok(_) => {}
            Err(SkeinError::UnknownVertex(_)) => {
                if !self.outstanding.contains_vertex(&requested)
                    && self.need_set.insert(requested)
                {
                    self.need_to_fetch.push_back(requested);
                }
            }
            Err(e) => return Err(e),
        }
        self.fetch_pending()
    }

    /// Handle a fetch timeout or peer-reported failure: retry against the
    /// next sampled peer. There is no retry cap — the network is assumed
    /// eventually responsive, and a stall is visible through `phase`.
    pub fn get_ancestors_failed(
        &mut self,
        peer: NodeId,
        request_id: RequestId,
    ) -> Result<(), SkeinError> {
        let Some(requested) = self.outstanding.remove(&peer, request_id) else {
            debug!(peer = %peer, request = request_id, "dropping unknown GetAncestorsFailed");
            return Ok(());
        };
        debug!(vertex = %requested, peer = %peer, "ancestor fetch failed; retrying elsewhere");
        if self.need_set.insert(requested) {
            self.need_to_fetch.push_back(requested);
        }
        self.fetch_pending()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Record `id` as required-but-unknown, durably and in the working set.
    fn queue_fetch(&mut self, id: VertexId) -> Result<(), SkeinError> {
        self.vtx_jobs.add_missing(*id.as_bytes())?;
        if !self.outstanding.contains_vertex(&id) && self.need_set.insert(id) {
            self.need_to_fetch.push_back(id);
        }
        Ok(())
    }

    /// Walk known vertices highest-first, enqueue their acceptance jobs,
    /// and queue fetches for unknown parents.
    fn process(&mut self, vtxs: Vec<Vertex>) -> Result<(), SkeinError> {
        let mut heap = VertexHeap::new();
        let mut lookup: HashMap<VertexId, Vertex> = HashMap::new();
        for vtx in vtxs {
            if self.processed.contains(&vtx.id()) {
                continue;
            }
            if heap.push(vtx.id(), vtx.height()) {
                lookup.insert(vtx.id(), vtx);
            }
        }

        while let Some(id) = heap.pop() {
            let Some(vtx) = lookup.remove(&id) else {
                continue;
            };
            match self.manager.vertex_status(&id) {
                Status::Accepted => {
                    self.vtx_jobs.remove_missing(id.as_bytes())?;
                    self.processed.put(id, ());
                }
                Status::Rejected => {
                    return Err(SkeinError::Corruption(format!(
                        "rejected vertex {id} reached from the accepted frontier"
                    )));
                }
                Status::Unknown => {
                    self.queue_fetch(id)?;
                }
                Status::Processing => {
                    self.vtx_jobs.remove_missing(id.as_bytes())?;

                    let mut unmet: Vec<JobId> = Vec::new();
                    for parent in vtx.parents() {
                        if self.manager.vertex_status(parent) != Status::Accepted {
                            unmet.push(*parent.as_bytes());
                        }
                    }
                    for tx in vtx.txs() {
                        if tx.status() == Status::Accepted {
                            continue;
                        }
                        unmet.push(*tx.id().as_bytes());
                        let tx_unmet: Vec<JobId> = tx
                            .dependencies()
                            .into_iter()
                            .filter(|dep| {
                                self.vm
                                    .get_tx(dep)
                                    .map(|d| d.status() != Status::Accepted)
                                    .unwrap_or(true)
                            })
                            .map(|dep| *dep.as_bytes())
                            .collect();
                        self.tx_jobs.push(*tx.id().as_bytes(), &tx_unmet)?;
                    }
                    if self.vtx_jobs.push(*id.as_bytes(), &unmet)? {
                        debug!(vertex = %id, deps = unmet.len(), "enqueued vertex for acceptance");
                    }
                    self.processed.put(id, ());

                    for parent in vtx.parents() {
                        if self.processed.contains(parent) {
                            continue;
                        }
                        match self.manager.get_vertex(parent) {
                            Ok(pv) => {
                                if heap.push(pv.id(), pv.height()) {
                                    lookup.insert(pv.id(), pv);
                                }
                            }
                            Err(SkeinError::UnknownVertex(_)) => self.queue_fetch(*parent)?,
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
        self.fetch_pending()
    }

    /// Put queued fetch targets on the wire, one outstanding request per
    /// vertex, up to the configured fan-out.
    fn fetch_pending(&mut self) -> Result<(), SkeinError> {
        while self.outstanding.len() < self.config.max_outstanding_fetches {
            let Some(id) = self.need_to_fetch.pop_front() else {
                break;
            };
            self.need_set.remove(&id);

            if self.outstanding.contains_vertex(&id) {
                continue;
            }
            match self.manager.get_vertex(&id) {
                Ok(_) => {
                    // Arrived via another response while queued.
                    self.vtx_jobs.remove_missing(id.as_bytes())?;
                    continue;
                }
                Err(SkeinError::UnknownVertex(_)) => {}
                Err(e) => return Err(e),
            }

            let Some(peer) = self.validators.sample() else {
                warn!(vertex = %id, "no peer available to fetch from; will retry");
                self.need_set.insert(id);
                self.need_to_fetch.push_front(id);
                break;
            };
            self.request_id += 1;
            self.outstanding.add(peer, self.request_id, id);
            debug!(vertex = %id, peer = %peer, request = self.request_id, "requesting ancestors");
            self.sender.send_get_ancestors(peer, self.request_id, id);
        }
        self.check_finish()
    }

    /// Once nothing is missing or in flight, drain the acceptance queues
    /// bottom-up and finish.
    fn check_finish(&mut self) -> Result<(), SkeinError> {
        if !self.seeded
            || self.phase == Phase::Done
            || !self.need_to_fetch.is_empty()
            || !self.outstanding.is_empty()
            || self.vtx_jobs.num_missing() > 0
        {
            return Ok(());
        }

        self.phase = Phase::Finalizing;
        debug!(
            vertices = self.vtx_jobs.len(),
            txs = self.tx_jobs.len(),
            "executing deferred acceptance"
        );
        self.execute_queues()?;

        if self.vtx_jobs.is_empty() && self.tx_jobs.is_empty() {
            self.phase = Phase::Done;
            info!("bootstrap complete");
            if !self.finished {
                self.finished = true;
                (self.on_finished)(self.request_id);
            }
        } else {
            // Typically a transaction dependency that was never delivered.
            // Not an error: progress is stalled, not failed, and a restart
            // with a newer frontier may still unblock it.
            warn!(
                blocked_vertices = self.vtx_jobs.num_blocked(),
                blocked_txs = self.tx_jobs.num_blocked(),
                "acceptance stalled on unmet dependencies"
            );
            self.phase = Phase::FetchingAncestors;
        }
        Ok(())
    }

    /// Accept runnable transactions, then runnable vertices, to a fixed
    /// point. Dependents never run before their dependencies.
    fn execute_queues(&mut self) -> Result<(), SkeinError> {
        loop {
            let mut progressed = false;

            while let Some(raw) = self.tx_jobs.next_runnable() {
                let tx_id = TxId::from_bytes(raw);
                let tx = self.vm.get_tx(&tx_id).map_err(|e| match e {
                    SkeinError::UnknownTx(_) => SkeinError::Corruption(format!(
                        "queued transaction {tx_id} vanished from the VM"
                    )),
                    other => other,
                })?;
                match tx.status() {
                    Status::Accepted => {}
                    Status::Processing => {
                        tx.accept()?;
                        debug!(tx = %tx_id, "accepted transaction");
                    }
                    s => {
                        return Err(SkeinError::InvalidTransition {
                            from: s,
                            to: Status::Accepted,
                        });
                    }
                }
                self.tx_jobs.mark_executed(&raw)?;
                self.vtx_jobs.resolve(&raw)?;
                progressed = true;
            }

            while let Some(raw) = self.vtx_jobs.next_runnable() {
                let id = VertexId::from_bytes(raw);
                self.manager.accept_vertex(&id)?;
                self.vtx_jobs.mark_executed(&raw)?;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
        Ok(())
    }
}
