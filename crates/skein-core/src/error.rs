use crate::ids::{ChainId, TxId, VertexId};
use thiserror::Error;

/// Error taxonomy for the DAG bootstrap-and-vote subsystem.
///
/// Protocol errors (`MalformedVertex`, `WrongChain`) are dropped close to
/// where they arise and never abort a chain. Liveness errors
/// (`UnknownVertex`, `UnknownTx`) drive fetches and retries. Consistency
/// errors (`Storage`, `Serialization`, `Corruption`) are fatal to the chain
/// actor: durable state may no longer be trustworthy.
#[derive(Debug, Error)]
pub enum SkeinError {
    // ── Liveness ─────────────────────────────────────────────────────────────
    #[error("unknown vertex: {0}")]
    UnknownVertex(VertexId),

    #[error("unknown transaction: {0}")]
    UnknownTx(TxId),

    // ── Protocol ─────────────────────────────────────────────────────────────
    #[error("malformed vertex: {0}")]
    MalformedVertex(String),

    #[error("vertex declares chain {got}, expected {expected}")]
    WrongChain { expected: ChainId, got: ChainId },

    // ── Consistency ──────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt durable state: {0}")]
    Corruption(String),

    // ── Invariant violations ─────────────────────────────────────────────────
    #[error("vertex {vertex} accepted with {missing} unmet dependencies")]
    MissingDependencies { vertex: VertexId, missing: usize },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: crate::Status, to: crate::Status },
}

impl SkeinError {
    /// True for errors that mean "fetch it from the network", not failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SkeinError::UnknownVertex(_) | SkeinError::UnknownTx(_))
    }

    /// True for errors that must abort the chain actor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SkeinError::Storage(_)
                | SkeinError::Serialization(_)
                | SkeinError::Corruption(_)
                | SkeinError::MissingDependencies { .. }
                | SkeinError::InvalidTransition { .. }
        )
    }
}
