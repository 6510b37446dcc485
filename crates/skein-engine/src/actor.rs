//! The per-chain event actor.
//!
//! All engine state for one chain is owned by a single task; network
//! deliveries, timeout notices, and control calls arrive as queued events
//! and are applied strictly one at a time. Cross-chain concurrency is
//! tasks side by side, never shared mutable state.

use crate::bootstrap::Bootstrapper;
use crate::traits::{Sender, Validators};
use skein_core::{NodeId, RequestId, SkeinError, VertexId};
use skein_dag::store::VertexStore;
use skein_dag::tx::DagVm;
use skein_state::kv::Database;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Everything the outside world may tell a bootstrapping chain.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Start {
        request_id: RequestId,
    },
    ForceAccepted {
        frontier: Vec<VertexId>,
    },
    Restart {
        frontier: Vec<VertexId>,
    },
    Ancestors {
        peer: NodeId,
        request_id: RequestId,
        vertices: Vec<Vec<u8>>,
    },
    GetAncestorsFailed {
        peer: NodeId,
        request_id: RequestId,
    },
    /// Poll responses that race ahead of bootstrap completion; dropped
    /// until the chain reaches normal operation.
    Chits {
        peer: NodeId,
        request_id: RequestId,
        votes: Vec<VertexId>,
    },
}

/// Cloneable submission side of a chain's event queue.
#[derive(Clone)]
pub struct ChainHandle {
    events: mpsc::Sender<EngineEvent>,
}

impl ChainHandle {
    /// Enqueue an event; false if the chain actor is gone.
    pub async fn send(&self, event: EngineEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn start(&self, request_id: RequestId) -> bool {
        self.send(EngineEvent::Start { request_id }).await
    }

    pub async fn force_accepted(&self, frontier: Vec<VertexId>) -> bool {
        self.send(EngineEvent::ForceAccepted { frontier }).await
    }

    pub async fn ancestors(
        &self,
        peer: NodeId,
        request_id: RequestId,
        vertices: Vec<Vec<u8>>,
    ) -> bool {
        self.send(EngineEvent::Ancestors {
            peer,
            request_id,
            vertices,
        })
        .await
    }

    pub async fn get_ancestors_failed(&self, peer: NodeId, request_id: RequestId) -> bool {
        self.send(EngineEvent::GetAncestorsFailed { peer, request_id })
            .await
    }
}

pub struct ChainActor<D, M, VM, S, V>
where
    D: Database,
    M: VertexStore,
    VM: DagVm,
    S: Sender,
    V: Validators,
{
    bootstrapper: Bootstrapper<D, M, VM, S, V>,
    events: mpsc::Receiver<EngineEvent>,
}

impl<D, M, VM, S, V> ChainActor<D, M, VM, S, V>
where
    D: Database,
    M: VertexStore,
    VM: DagVm,
    S: Sender,
    V: Validators,
{
    pub fn new(
        bootstrapper: Bootstrapper<D, M, VM, S, V>,
        capacity: usize,
    ) -> (ChainActor<D, M, VM, S, V>, ChainHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ChainActor {
                bootstrapper,
                events: rx,
            },
            ChainHandle { events: tx },
        )
    }

    pub fn bootstrapper_mut(&mut self) -> &mut Bootstrapper<D, M, VM, S, V> {
        &mut self.bootstrapper
    }

    /// Drain events until every handle is dropped. Consistency errors abort
    /// the actor and surface to the enclosing engine; everything else is
    /// handled where it happens.
    pub async fn run(mut self) -> Result<(), SkeinError> {
        while let Some(event) = self.events.recv().await {
            let result = match event {
                EngineEvent::Start { request_id } => self.bootstrapper.start(request_id),
                EngineEvent::ForceAccepted { frontier } => {
                    self.bootstrapper.force_accepted(&frontier)
                }
                EngineEvent::Restart { frontier } => self.bootstrapper.restart(&frontier),
                EngineEvent::Ancestors {
                    peer,
                    request_id,
                    vertices,
                } => self.bootstrapper.ancestors(peer, request_id, vertices),
                EngineEvent::GetAncestorsFailed { peer, request_id } => {
                    self.bootstrapper.get_ancestors_failed(peer, request_id)
                }
                EngineEvent::Chits { peer, request_id, .. } => {
                    debug!(peer = %peer, request = request_id, "dropping poll response during bootstrap");
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!(error = %e, "chain actor aborting");
                return Err(e);
            }
        }
        Ok(())
    }
}
