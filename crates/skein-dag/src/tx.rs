//! The transaction seam between the DAG and the virtual machine.
//!
//! Transaction semantics (execution, verification, conflict resolution) are
//! the VM's business. The DAG only needs identity, explicit dependency
//! edges, the conflicting-resource identifiers, and the decision lifecycle.

use skein_core::{SkeinError, Status, TxId};
use std::sync::Arc;

/// Identifier of a resource a transaction consumes. Two transactions that
/// share an input ID conflict; the surrounding consensus instance derives
/// conflict sets from these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId(pub [u8; 32]);

/// A transaction as seen by the DAG.
///
/// Implementations live in the VM; status mutation is interior so handles
/// can be shared between the vertex arena and the job queues.
pub trait DagTx: Send + Sync {
    fn id(&self) -> TxId;

    fn bytes(&self) -> Vec<u8>;

    /// Transactions that must be accepted before this one may be.
    fn dependencies(&self) -> Vec<TxId>;

    /// Resources consumed; used for conflict-set derivation.
    fn input_ids(&self) -> Vec<InputId>;

    fn status(&self) -> Status;

    /// Semantic validity check, performed before issuance.
    fn verify(&self) -> Result<(), SkeinError>;

    fn accept(&self) -> Result<(), SkeinError>;

    fn reject(&self) -> Result<(), SkeinError>;
}

pub type TxHandle = Arc<dyn DagTx>;

/// The VM collaborator: parses transaction payloads out of vertices and
/// re-surfaces known transactions for re-issuance.
pub trait DagVm: Send {
    /// Parse a transaction blob carried by a vertex.
    fn parse_tx(&self, bytes: &[u8]) -> Result<TxHandle, SkeinError>;

    /// Look up a known transaction, e.g. an orphan queued for re-issuance.
    /// Returns `UnknownTx` if the VM has never seen it.
    fn get_tx(&self, id: &TxId) -> Result<TxHandle, SkeinError>;
}
