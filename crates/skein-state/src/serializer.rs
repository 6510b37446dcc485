//! The durable DAG serializer.
//!
//! `DagState` is the single authority for vertex bytes, statuses, and the
//! accepted frontier. All lookups funnel through one bounded cache keyed by
//! vertex ID; status transitions are explicit methods that commit their
//! batch of mutations atomically through the versioned overlay. One chain
//! actor owns each `DagState`, so there is no interior locking.

use crate::kv::Database;
use crate::versioned::VersionedDb;
use lru::LruCache;
use skein_core::constants::VERTEX_CACHE_SIZE;
use skein_core::{ChainId, SkeinError, Status, VertexId};
use skein_dag::store::VertexStore;
use skein_dag::tx::{DagVm, TxHandle};
use skein_dag::vertex::Vertex;
use skein_dag::wire::WireVertex;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

const VERTEX_PREFIX: &[u8] = b"v/";
const STATUS_PREFIX: &[u8] = b"s/";
const EDGE_PREFIX: &[u8] = b"e/";

fn key(prefix: &[u8], id: &VertexId) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + 32);
    k.extend_from_slice(prefix);
    k.extend_from_slice(id.as_bytes());
    k
}

pub struct DagState<D: Database, VM: DagVm> {
    chain_id: ChainId,
    vm: VM,
    db: VersionedDb<D>,
    cache: LruCache<VertexId, Vertex>,
    status_cache: HashMap<VertexId, Status>,
    edge: HashSet<VertexId>,
}

impl<D: Database, VM: DagVm> DagState<D, VM> {
    /// Open the serializer over `db`, restoring the durable frontier.
    pub fn open(chain_id: ChainId, vm: VM, db: D) -> Result<DagState<D, VM>, SkeinError> {
        let db = VersionedDb::new(db);
        let mut edge = HashSet::new();
        for (k, _) in db.scan_prefix(EDGE_PREFIX)? {
            let raw = &k[EDGE_PREFIX.len()..];
            if raw.len() != 32 {
                return Err(SkeinError::Corruption(format!(
                    "frontier key of length {}",
                    raw.len()
                )));
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(raw);
            edge.insert(VertexId::from_bytes(arr));
        }
        Ok(DagState {
            chain_id,
            vm,
            db,
            cache: LruCache::new(NonZeroUsize::new(VERTEX_CACHE_SIZE).unwrap()),
            status_cache: HashMap::new(),
            edge,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn vm(&self) -> &VM {
        &self.vm
    }

    fn status_checked(&mut self, id: &VertexId) -> Result<Status, SkeinError> {
        if let Some(s) = self.status_cache.get(id) {
            return Ok(*s);
        }
        let status = match self.db.get(&key(STATUS_PREFIX, id))? {
            Some(raw) if raw.len() == 1 => Status::from_byte(raw[0]).ok_or_else(|| {
                SkeinError::Corruption(format!("undecodable status byte {}", raw[0]))
            })?,
            Some(raw) => {
                return Err(SkeinError::Corruption(format!(
                    "status value of length {}",
                    raw.len()
                )));
            }
            None => Status::Unknown,
        };
        if status != Status::Unknown {
            self.status_cache.insert(*id, status);
        }
        Ok(status)
    }

    fn decode_txs(&self, wire: &WireVertex) -> Result<Vec<TxHandle>, SkeinError> {
        wire.tx_blobs()
            .iter()
            .map(|b| self.vm.parse_tx(b))
            .collect()
    }

    /// Store a freshly parsed or built vertex as `Processing`.
    fn store_new(&mut self, wire: &WireVertex) -> Result<(), SkeinError> {
        let id = wire.id();
        self.db.put(key(VERTEX_PREFIX, &id), wire.bytes());
        self.db
            .put(key(STATUS_PREFIX, &id), [Status::Processing.as_byte()]);
        self.db.commit()?;
        self.status_cache.insert(id, Status::Processing);
        debug!(vertex = %id, height = wire.height(), "stored new vertex");
        Ok(())
    }
}

impl<D: Database, VM: DagVm> VertexStore for DagState<D, VM> {
    fn parse_vertex(&mut self, bytes: &[u8]) -> Result<Vertex, SkeinError> {
        let wire = WireVertex::parse(bytes)?;
        if wire.chain_id() != self.chain_id {
            return Err(SkeinError::WrongChain {
                expected: self.chain_id,
                got: wire.chain_id(),
            });
        }
        let txs = self.decode_txs(&wire)?;
        let vtx = Vertex::from_wire(&wire, txs);
        if self.status_checked(&vtx.id())? == Status::Unknown {
            self.store_new(&wire)?;
        }
        self.cache.put(vtx.id(), vtx.clone());
        Ok(vtx)
    }

    fn get_vertex(&mut self, id: &VertexId) -> Result<Vertex, SkeinError> {
        if let Some(vtx) = self.cache.get(id) {
            return Ok(vtx.clone());
        }
        let bytes = self
            .db
            .get(&key(VERTEX_PREFIX, id))?
            .ok_or(SkeinError::UnknownVertex(*id))?;
        // We wrote these bytes; failure to re-parse them means the store is
        // no longer trustworthy.
        let wire = WireVertex::parse(&bytes)
            .map_err(|e| SkeinError::Corruption(format!("stored vertex {id}: {e}")))?;
        let txs = self.decode_txs(&wire)?;
        let vtx = Vertex::from_wire(&wire, txs);
        self.cache.put(*id, vtx.clone());
        Ok(vtx)
    }

    fn vertex_status(&mut self, id: &VertexId) -> Status {
        match self.status_checked(id) {
            Ok(status) => status,
            Err(e) => {
                warn!(vertex = %id, error = %e, "status lookup failed");
                Status::Unknown
            }
        }
    }

    fn edge(&self) -> Vec<VertexId> {
        self.edge.iter().copied().collect()
    }

    fn accept_vertex(&mut self, id: &VertexId) -> Result<(), SkeinError> {
        match self.status_checked(id)? {
            Status::Accepted => {
                debug!(vertex = %id, "accept of already-accepted vertex is a no-op");
                return Ok(());
            }
            Status::Rejected => {
                return Err(SkeinError::InvalidTransition {
                    from: Status::Rejected,
                    to: Status::Accepted,
                });
            }
            Status::Unknown | Status::Processing => {}
        }
        let vtx = self.get_vertex(id)?;

        let mut missing = 0usize;
        for parent in vtx.parents() {
            if self.status_checked(parent)? != Status::Accepted {
                missing += 1;
            }
        }
        missing += vtx
            .txs()
            .iter()
            .filter(|tx| tx.status() != Status::Accepted)
            .count();
        if missing > 0 {
            return Err(SkeinError::MissingDependencies {
                vertex: *id,
                missing,
            });
        }

        // Status and frontier move in one atomic commit.
        self.db
            .put(key(STATUS_PREFIX, id), [Status::Accepted.as_byte()]);
        self.db.put(key(EDGE_PREFIX, id), Vec::new());
        for parent in vtx.parents() {
            self.db.delete(key(EDGE_PREFIX, parent));
        }
        self.db.commit()?;

        self.status_cache.insert(*id, Status::Accepted);
        self.edge.insert(*id);
        for parent in vtx.parents() {
            self.edge.remove(parent);
        }
        info!(vertex = %id, height = vtx.height(), "accepted vertex");
        Ok(())
    }

    fn reject_vertex(&mut self, id: &VertexId) -> Result<(), SkeinError> {
        match self.status_checked(id)? {
            Status::Rejected => return Ok(()),
            Status::Accepted => {
                return Err(SkeinError::InvalidTransition {
                    from: Status::Accepted,
                    to: Status::Rejected,
                });
            }
            Status::Unknown => return Err(SkeinError::UnknownVertex(*id)),
            Status::Processing => {}
        }
        self.db
            .put(key(STATUS_PREFIX, id), [Status::Rejected.as_byte()]);
        self.db.commit()?;
        self.status_cache.insert(*id, Status::Rejected);
        debug!(vertex = %id, "rejected vertex");
        Ok(())
    }

    fn build_stop_vertex(&mut self, parents: Vec<VertexId>) -> Result<Vertex, SkeinError> {
        let mut height = 0u64;
        for parent_id in &parents {
            let parent = self.get_vertex(parent_id)?;
            height = height.max(parent.height().saturating_add(1));
        }
        let wire = WireVertex::build_stop(self.chain_id, height, parents)?;
        // Idempotent: the identical stop vertex may already exist.
        if self.status_checked(&wire.id())? == Status::Unknown {
            self.store_new(&wire)?;
        }
        let vtx = Vertex::from_wire(&wire, Vec::new());
        self.cache.put(vtx.id(), vtx.clone());
        Ok(vtx)
    }

    fn stop_vertex_accepted(&mut self) -> Result<bool, SkeinError> {
        let edge = self.edge();
        if edge.len() != 1 {
            return Ok(false);
        }
        let vtx = self.get_vertex(&edge[0])?;
        Ok(vtx.is_stop_vertex() && self.status_checked(&edge[0])? == Status::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemDb;
    use skein_dag::testing::{TestTx, TestVm};

    fn chain() -> ChainId {
        ChainId::from_bytes([3u8; 32])
    }

    fn open_state(db: MemDb) -> DagState<MemDb, TestVm> {
        DagState::open(chain(), TestVm::new(), db).unwrap()
    }

    /// Build wire bytes for a vertex carrying one registered, accepted tx.
    fn accepted_tx_vertex(
        state: &mut DagState<MemDb, TestVm>,
        parents: Vec<VertexId>,
        height: u64,
        payload: &[u8],
    ) -> WireVertex {
        let tx = TestTx::new(payload);
        tx.set_status(Status::Accepted);
        state.vm().register(tx);
        WireVertex::build(chain(), height, parents, vec![payload.to_vec()]).unwrap()
    }

    #[test]
    fn parse_stores_processing() {
        let mut state = open_state(MemDb::new());
        let wire = accepted_tx_vertex(&mut state, vec![], 0, b"t0");
        let vtx = state.parse_vertex(wire.bytes()).unwrap();
        assert_eq!(state.vertex_status(&vtx.id()), Status::Processing);
        // Idempotent re-parse.
        let again = state.parse_vertex(wire.bytes()).unwrap();
        assert_eq!(again.id(), vtx.id());
        assert_eq!(state.vertex_status(&vtx.id()), Status::Processing);
    }

    #[test]
    fn wrong_chain_is_typed() {
        let mut state = open_state(MemDb::new());
        let other = ChainId::from_bytes([9u8; 32]);
        let wire = WireVertex::build(other, 0, vec![], vec![b"t".to_vec()]).unwrap();
        assert!(matches!(
            state.parse_vertex(wire.bytes()),
            Err(SkeinError::WrongChain { .. })
        ));
    }

    #[test]
    fn unknown_vertex_is_typed() {
        let mut state = open_state(MemDb::new());
        let id = VertexId::from_bytes([8u8; 32]);
        assert!(matches!(
            state.get_vertex(&id),
            Err(SkeinError::UnknownVertex(_))
        ));
    }

    #[test]
    fn accept_moves_frontier() {
        let mut state = open_state(MemDb::new());
        let parent = accepted_tx_vertex(&mut state, vec![], 0, b"p");
        let parent_id = state.parse_vertex(parent.bytes()).unwrap().id();
        state.accept_vertex(&parent_id).unwrap();
        assert_eq!(state.edge(), vec![parent_id]);

        let child = accepted_tx_vertex(&mut state, vec![parent_id], 1, b"c");
        let child_id = state.parse_vertex(child.bytes()).unwrap().id();
        state.accept_vertex(&child_id).unwrap();

        assert_eq!(state.edge(), vec![child_id]);
        assert_eq!(state.vertex_status(&parent_id), Status::Accepted);
        assert_eq!(state.vertex_status(&child_id), Status::Accepted);
    }

    #[test]
    fn accept_is_idempotent() {
        let mut state = open_state(MemDb::new());
        let wire = accepted_tx_vertex(&mut state, vec![], 0, b"x");
        let id = state.parse_vertex(wire.bytes()).unwrap().id();
        state.accept_vertex(&id).unwrap();
        state.accept_vertex(&id).unwrap();
        assert_eq!(state.edge(), vec![id]);
    }

    #[test]
    fn accept_with_unaccepted_parent_fails_loudly() {
        let mut state = open_state(MemDb::new());
        let parent = accepted_tx_vertex(&mut state, vec![], 0, b"p2");
        let parent_id = state.parse_vertex(parent.bytes()).unwrap().id();
        // parent left Processing
        let child = accepted_tx_vertex(&mut state, vec![parent_id], 1, b"c2");
        let child_id = state.parse_vertex(child.bytes()).unwrap().id();
        assert!(matches!(
            state.accept_vertex(&child_id),
            Err(SkeinError::MissingDependencies { .. })
        ));
    }

    #[test]
    fn accept_with_unaccepted_tx_fails_loudly() {
        let mut state = open_state(MemDb::new());
        let tx = TestTx::new(b"pending");
        state.vm().register(tx); // stays Processing
        let wire = WireVertex::build(chain(), 0, vec![], vec![b"pending".to_vec()]).unwrap();
        let id = state.parse_vertex(wire.bytes()).unwrap().id();
        assert!(matches!(
            state.accept_vertex(&id),
            Err(SkeinError::MissingDependencies { .. })
        ));
    }

    #[test]
    fn frontier_survives_reopen() {
        let db = MemDb::new();
        let vm = TestVm::new();
        let id = {
            let mut state = DagState::open(chain(), vm.clone(), db.clone()).unwrap();
            let tx = TestTx::new(b"d");
            tx.set_status(Status::Accepted);
            vm.register(tx);
            let wire = WireVertex::build(chain(), 0, vec![], vec![b"d".to_vec()]).unwrap();
            let id = state.parse_vertex(wire.bytes()).unwrap().id();
            state.accept_vertex(&id).unwrap();
            id
        };
        let mut reopened = DagState::open(chain(), vm, db).unwrap();
        assert_eq!(reopened.edge(), vec![id]);
        assert_eq!(reopened.vertex_status(&id), Status::Accepted);
        // Cold cache still resolves the vertex from storage.
        assert_eq!(reopened.get_vertex(&id).unwrap().id(), id);
    }

    #[test]
    fn stop_vertex_lifecycle() {
        let mut state = open_state(MemDb::new());
        let wire = accepted_tx_vertex(&mut state, vec![], 0, b"base");
        let base_id = state.parse_vertex(wire.bytes()).unwrap().id();
        state.accept_vertex(&base_id).unwrap();
        assert!(!state.stop_vertex_accepted().unwrap());

        let stop = state.build_stop_vertex(vec![base_id]).unwrap();
        assert!(stop.is_stop_vertex());
        assert_eq!(stop.height(), 1);
        // Idempotent rebuild yields the identical vertex.
        let again = state.build_stop_vertex(vec![base_id]).unwrap();
        assert_eq!(again.id(), stop.id());

        state.accept_vertex(&stop.id()).unwrap();
        assert!(state.stop_vertex_accepted().unwrap());
    }

    #[test]
    fn reject_is_monotonic() {
        let mut state = open_state(MemDb::new());
        let wire = accepted_tx_vertex(&mut state, vec![], 0, b"r");
        let id = state.parse_vertex(wire.bytes()).unwrap().id();
        state.reject_vertex(&id).unwrap();
        state.reject_vertex(&id).unwrap();
        assert_eq!(state.vertex_status(&id), Status::Rejected);
        assert!(matches!(
            state.accept_vertex(&id),
            Err(SkeinError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn malformed_bytes_are_typed() {
        let mut state = open_state(MemDb::new());
        assert!(matches!(
            state.parse_vertex(&[0xff, 0x01, 0x02]),
            Err(SkeinError::MalformedVertex(_))
        ));
    }
}
