//! Test collaborators shared by the state and engine crates.
//!
//! `TestTx`/`TestVm` stand in for the virtual machine; `TestStore` is an
//! in-memory, non-durable `VertexStore` for exercising engine logic without
//! a database.

use crate::store::VertexStore;
use crate::tx::{DagTx, DagVm, InputId, TxHandle};
use crate::vertex::Vertex;
use crate::wire::WireVertex;
use skein_core::{ChainId, SkeinError, Status, TxId, VertexId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

// ── TestTx ───────────────────────────────────────────────────────────────────

/// A scripted transaction with interior-mutable status.
pub struct TestTx {
    id: TxId,
    bytes: Vec<u8>,
    deps: Vec<TxId>,
    inputs: Vec<InputId>,
    status: Mutex<Status>,
}

impl TestTx {
    pub fn new(bytes: &[u8]) -> Arc<TestTx> {
        Arc::new(TestTx {
            id: TxId::of(bytes),
            bytes: bytes.to_vec(),
            deps: Vec::new(),
            inputs: Vec::new(),
            status: Mutex::new(Status::Processing),
        })
    }

    pub fn with_deps(bytes: &[u8], deps: Vec<TxId>) -> Arc<TestTx> {
        Arc::new(TestTx {
            id: TxId::of(bytes),
            bytes: bytes.to_vec(),
            deps,
            inputs: Vec::new(),
            status: Mutex::new(Status::Processing),
        })
    }

    pub fn with_inputs(bytes: &[u8], inputs: Vec<InputId>) -> Arc<TestTx> {
        Arc::new(TestTx {
            id: TxId::of(bytes),
            bytes: bytes.to_vec(),
            deps: Vec::new(),
            inputs,
            status: Mutex::new(Status::Processing),
        })
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap() = status;
    }
}

impl DagTx for TestTx {
    fn id(&self) -> TxId {
        self.id
    }

    fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn dependencies(&self) -> Vec<TxId> {
        self.deps.clone()
    }

    fn input_ids(&self) -> Vec<InputId> {
        self.inputs.clone()
    }

    fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    fn verify(&self) -> Result<(), SkeinError> {
        Ok(())
    }

    fn accept(&self) -> Result<(), SkeinError> {
        let mut status = self.status.lock().unwrap();
        if *status == Status::Accepted {
            return Ok(());
        }
        if !status.valid_transition(Status::Accepted) {
            return Err(SkeinError::InvalidTransition {
                from: *status,
                to: Status::Accepted,
            });
        }
        *status = Status::Accepted;
        Ok(())
    }

    fn reject(&self) -> Result<(), SkeinError> {
        let mut status = self.status.lock().unwrap();
        if *status == Status::Rejected {
            return Ok(());
        }
        if !status.valid_transition(Status::Rejected) {
            return Err(SkeinError::InvalidTransition {
                from: *status,
                to: Status::Rejected,
            });
        }
        *status = Status::Rejected;
        Ok(())
    }
}

// ── TestVm ───────────────────────────────────────────────────────────────────

/// VM double: a registry of transactions keyed by payload and by ID.
/// Unregistered payloads parse into fresh dependency-free transactions.
#[derive(Clone, Default)]
pub struct TestVm {
    inner: Arc<Mutex<VmInner>>,
}

#[derive(Default)]
struct VmInner {
    by_bytes: HashMap<Vec<u8>, TxHandle>,
    by_id: HashMap<TxId, TxHandle>,
}

impl TestVm {
    pub fn new() -> TestVm {
        TestVm::default()
    }

    pub fn register(&self, tx: Arc<TestTx>) -> TxHandle {
        self.register_handle(tx)
    }

    pub fn register_handle(&self, tx: TxHandle) -> TxHandle {
        let mut inner = self.inner.lock().unwrap();
        inner.by_bytes.insert(tx.bytes(), tx.clone());
        inner.by_id.insert(tx.id(), tx.clone());
        tx
    }

    pub fn tx(&self, id: &TxId) -> Option<TxHandle> {
        self.inner.lock().unwrap().by_id.get(id).cloned()
    }
}

impl DagVm for TestVm {
    fn parse_tx(&self, bytes: &[u8]) -> Result<TxHandle, SkeinError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tx) = inner.by_bytes.get(bytes) {
            return Ok(tx.clone());
        }
        let tx: TxHandle = TestTx::new(bytes);
        inner.by_bytes.insert(bytes.to_vec(), tx.clone());
        inner.by_id.insert(tx.id(), tx.clone());
        Ok(tx)
    }

    fn get_tx(&self, id: &TxId) -> Result<TxHandle, SkeinError> {
        self.inner
            .lock()
            .unwrap()
            .by_id
            .get(id)
            .cloned()
            .ok_or(SkeinError::UnknownTx(*id))
    }
}

// ── TestStore ────────────────────────────────────────────────────────────────

/// In-memory `VertexStore`. Vertices can be *made* (bytes exist somewhere on
/// the network) without being *inserted* (known locally), which is exactly
/// the gap bootstrap tests need to exercise.
pub struct TestStore {
    chain_id: ChainId,
    vm: TestVm,
    universe: HashMap<VertexId, Vertex>,
    status: HashMap<VertexId, Status>,
    edge: HashSet<VertexId>,
}

impl TestStore {
    pub fn new(chain_id: ChainId) -> TestStore {
        TestStore {
            chain_id,
            vm: TestVm::new(),
            universe: HashMap::new(),
            status: HashMap::new(),
            edge: HashSet::new(),
        }
    }

    pub fn vm(&self) -> TestVm {
        self.vm.clone()
    }

    /// Build a vertex (registering its transactions with the VM) without
    /// making it known to the local arena.
    pub fn make_vertex(&mut self, parents: &[VertexId], tx_payloads: &[impl AsRef<[u8]>]) -> Vertex {
        let height = parents
            .iter()
            .map(|p| {
                self.universe
                    .get(p)
                    .map(|v| v.height() + 1)
                    .unwrap_or_default()
            })
            .max()
            .unwrap_or(0);
        let blobs: Vec<Vec<u8>> = tx_payloads.iter().map(|p| p.as_ref().to_vec()).collect();
        let txs: Vec<TxHandle> = blobs
            .iter()
            .map(|b| self.vm.register(TestTx::new(b)))
            .collect();
        let wire = WireVertex::build(self.chain_id, height, parents.to_vec(), blobs)
            .expect("test vertex is well-formed");
        let vtx = Vertex::from_wire(&wire, txs);
        self.universe.insert(vtx.id(), vtx.clone());
        vtx
    }

    /// Like `make_vertex` but with explicit transaction handles.
    pub fn make_vertex_with_txs(&mut self, parents: &[VertexId], txs: Vec<Arc<TestTx>>) -> Vertex {
        let height = parents
            .iter()
            .map(|p| {
                self.universe
                    .get(p)
                    .map(|v| v.height() + 1)
                    .unwrap_or_default()
            })
            .max()
            .unwrap_or(0);
        let handles: Vec<TxHandle> = txs.into_iter().map(|t| self.vm.register(t)).collect();
        let blobs: Vec<Vec<u8>> = handles.iter().map(|t| t.bytes()).collect();
        let wire = WireVertex::build(self.chain_id, height, parents.to_vec(), blobs)
            .expect("test vertex is well-formed");
        let vtx = Vertex::from_wire(&wire, handles);
        self.universe.insert(vtx.id(), vtx.clone());
        vtx
    }

    /// Mark a made vertex as known locally (`Processing`).
    pub fn insert(&mut self, vtx: &Vertex) {
        self.status.entry(vtx.id()).or_insert(Status::Processing);
    }

    /// Take over a vertex made by another store (e.g. to model a restarted
    /// node): its data and transactions become resolvable here, but it is
    /// not marked known until `insert`.
    pub fn adopt(&mut self, vtx: &Vertex) {
        for tx in vtx.txs() {
            self.vm.register_handle(tx.clone());
        }
        self.universe.entry(vtx.id()).or_insert_with(|| vtx.clone());
    }

    /// Make a vertex and immediately insert it.
    pub fn add_vertex(&mut self, parents: &[VertexId], tx_payloads: &[impl AsRef<[u8]>]) -> VertexId {
        let vtx = self.make_vertex(parents, tx_payloads);
        self.insert(&vtx);
        vtx.id()
    }

    /// Direct status override for scripting voter scenarios.
    pub fn set_status(&mut self, id: VertexId, status: Status) {
        self.status.insert(id, status);
    }
}

impl VertexStore for TestStore {
    fn parse_vertex(&mut self, bytes: &[u8]) -> Result<Vertex, SkeinError> {
        let wire = WireVertex::parse(bytes)?;
        if wire.chain_id() != self.chain_id {
            return Err(SkeinError::WrongChain {
                expected: self.chain_id,
                got: wire.chain_id(),
            });
        }
        let txs = wire
            .tx_blobs()
            .iter()
            .map(|b| self.vm.parse_tx(b))
            .collect::<Result<Vec<_>, _>>()?;
        let vtx = Vertex::from_wire(&wire, txs);
        self.universe.entry(vtx.id()).or_insert_with(|| vtx.clone());
        self.status.entry(vtx.id()).or_insert(Status::Processing);
        Ok(vtx)
    }

    fn get_vertex(&mut self, id: &VertexId) -> Result<Vertex, SkeinError> {
        match self.status.get(id) {
            Some(s) if s.fetched() => self
                .universe
                .get(id)
                .cloned()
                .ok_or(SkeinError::UnknownVertex(*id)),
            _ => Err(SkeinError::UnknownVertex(*id)),
        }
    }

    fn vertex_status(&mut self, id: &VertexId) -> Status {
        self.status.get(id).copied().unwrap_or(Status::Unknown)
    }

    fn edge(&self) -> Vec<VertexId> {
        self.edge.iter().copied().collect()
    }

    fn accept_vertex(&mut self, id: &VertexId) -> Result<(), SkeinError> {
        let vtx = self.get_vertex(id)?;
        if self.vertex_status(id) == Status::Accepted {
            return Ok(());
        }
        let missing = vtx
            .parents()
            .iter()
            .filter(|p| self.status.get(*p).copied() != Some(Status::Accepted))
            .count()
            + vtx
                .txs()
                .iter()
                .filter(|t| t.status() != Status::Accepted)
                .count();
        if missing > 0 {
            return Err(SkeinError::MissingDependencies {
                vertex: *id,
                missing,
            });
        }
        self.status.insert(*id, Status::Accepted);
        for parent in vtx.parents() {
            self.edge.remove(parent);
        }
        self.edge.insert(*id);
        Ok(())
    }

    fn reject_vertex(&mut self, id: &VertexId) -> Result<(), SkeinError> {
        self.status.insert(*id, Status::Rejected);
        Ok(())
    }

    fn build_stop_vertex(&mut self, parents: Vec<VertexId>) -> Result<Vertex, SkeinError> {
        let mut height = 0u64;
        for p in &parents {
            let parent = self.get_vertex(p)?;
            height = height.max(parent.height() + 1);
        }
        let wire = WireVertex::build_stop(self.chain_id, height, parents)?;
        let vtx = Vertex::from_wire(&wire, Vec::new());
        self.universe.entry(vtx.id()).or_insert_with(|| vtx.clone());
        self.status.entry(vtx.id()).or_insert(Status::Processing);
        Ok(vtx)
    }

    fn stop_vertex_accepted(&mut self) -> Result<bool, SkeinError> {
        let edge = self.edge();
        if edge.len() != 1 {
            return Ok(false);
        }
        let vtx = self.get_vertex(&edge[0])?;
        Ok(vtx.is_stop_vertex() && self.vertex_status(&edge[0]) == Status::Accepted)
    }
}
