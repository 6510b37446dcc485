//! Canonical vertex wire format.
//!
//! A vertex is immutable once built: its identity is the BLAKE3 hash of the
//! exact serialized bytes, so any re-encoding must be byte-identical.
//! Parsing performs structural validation only — it does not look up
//! parents or interpret transaction payloads.

use serde::{Deserialize, Serialize};
use skein_core::constants::{MAX_PARENTS_PER_VERTEX, MAX_TXS_PER_VERTEX};
use skein_core::{ChainId, SkeinError, VertexId};
use std::collections::HashSet;

/// Codec version for an ordinary transaction-carrying vertex.
pub const CODEC_VERSION: u16 = 0;

/// Codec version for a stop vertex: carries no transactions and marks
/// intentional DAG closure.
pub const CODEC_VERSION_STOP: u16 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Inner {
    codec_version: u16,
    chain_id: ChainId,
    height: u64,
    parents: Vec<VertexId>,
    txs: Vec<Vec<u8>>,
}

/// A structurally validated vertex, paired with its canonical bytes and
/// content-addressed ID.
#[derive(Clone, Debug)]
pub struct WireVertex {
    inner: Inner,
    id: VertexId,
    bytes: Vec<u8>,
}

impl WireVertex {
    /// Build an ordinary vertex. Parents are sorted and deduplicated to keep
    /// the encoding canonical.
    pub fn build(
        chain_id: ChainId,
        height: u64,
        parents: Vec<VertexId>,
        txs: Vec<Vec<u8>>,
    ) -> Result<WireVertex, SkeinError> {
        Self::build_inner(CODEC_VERSION, chain_id, height, parents, txs)
    }

    /// Build a stop vertex over the given parents.
    pub fn build_stop(
        chain_id: ChainId,
        height: u64,
        parents: Vec<VertexId>,
    ) -> Result<WireVertex, SkeinError> {
        Self::build_inner(CODEC_VERSION_STOP, chain_id, height, parents, Vec::new())
    }

    fn build_inner(
        codec_version: u16,
        chain_id: ChainId,
        height: u64,
        mut parents: Vec<VertexId>,
        txs: Vec<Vec<u8>>,
    ) -> Result<WireVertex, SkeinError> {
        parents.sort();
        parents.dedup();
        let inner = Inner {
            codec_version,
            chain_id,
            height,
            parents,
            txs,
        };
        verify(&inner)?;
        let bytes = bincode::serialize(&inner)
            .map_err(|e| SkeinError::Serialization(e.to_string()))?;
        let id = VertexId::of(&bytes);
        Ok(WireVertex { inner, id, bytes })
    }

    /// Parse and structurally validate wire bytes. The declared chain ID is
    /// checked by the serializer, not here.
    pub fn parse(bytes: &[u8]) -> Result<WireVertex, SkeinError> {
        let inner: Inner = bincode::deserialize(bytes)
            .map_err(|e| SkeinError::MalformedVertex(e.to_string()))?;
        verify(&inner)?;
        Ok(WireVertex {
            inner,
            id: VertexId::of(bytes),
            bytes: bytes.to_vec(),
        })
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn chain_id(&self) -> ChainId {
        self.inner.chain_id
    }

    pub fn height(&self) -> u64 {
        self.inner.height
    }

    pub fn parents(&self) -> &[VertexId] {
        &self.inner.parents
    }

    pub fn tx_blobs(&self) -> &[Vec<u8>] {
        &self.inner.txs
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_stop_vertex(&self) -> bool {
        self.inner.codec_version == CODEC_VERSION_STOP
    }
}

fn verify(inner: &Inner) -> Result<(), SkeinError> {
    match inner.codec_version {
        CODEC_VERSION => {
            if inner.txs.is_empty() {
                return Err(SkeinError::MalformedVertex(
                    "vertex carries no transactions".into(),
                ));
            }
        }
        CODEC_VERSION_STOP => {
            if !inner.txs.is_empty() {
                return Err(SkeinError::MalformedVertex(
                    "stop vertex carries transactions".into(),
                ));
            }
        }
        v => {
            return Err(SkeinError::MalformedVertex(format!(
                "unsupported codec version {v}"
            )));
        }
    }

    if inner.parents.len() > MAX_PARENTS_PER_VERTEX {
        return Err(SkeinError::MalformedVertex(format!(
            "{} parents exceeds maximum {MAX_PARENTS_PER_VERTEX}",
            inner.parents.len()
        )));
    }
    if inner.txs.len() > MAX_TXS_PER_VERTEX {
        return Err(SkeinError::MalformedVertex(format!(
            "{} transactions exceeds maximum {MAX_TXS_PER_VERTEX}",
            inner.txs.len()
        )));
    }

    // Sorted-and-unique parents keep the byte encoding canonical.
    for pair in inner.parents.windows(2) {
        if pair[0] >= pair[1] {
            return Err(SkeinError::MalformedVertex(
                "parent IDs not sorted and unique".into(),
            ));
        }
    }

    let mut seen = HashSet::with_capacity(inner.txs.len());
    for blob in &inner.txs {
        if blob.is_empty() {
            return Err(SkeinError::MalformedVertex("empty transaction blob".into()));
        }
        if !seen.insert(blake3::hash(blob)) {
            return Err(SkeinError::MalformedVertex(
                "duplicate transaction in vertex".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn chain() -> ChainId {
        ChainId::from_bytes([42u8; 32])
    }

    #[test]
    fn build_parse_round_trip() {
        let parents = vec![
            VertexId::from_bytes([1u8; 32]),
            VertexId::from_bytes([2u8; 32]),
        ];
        let vtx = WireVertex::build(chain(), 3, parents.clone(), vec![vec![9, 9]]).unwrap();
        let parsed = WireVertex::parse(vtx.bytes()).unwrap();
        assert_eq!(parsed.id(), vtx.id());
        assert_eq!(parsed.height(), 3);
        assert_eq!(parsed.parents(), parents.as_slice());
        assert!(!parsed.is_stop_vertex());
    }

    #[test]
    fn id_is_hash_of_bytes() {
        let vtx = WireVertex::build(chain(), 0, vec![], vec![vec![1]]).unwrap();
        assert_eq!(vtx.id(), VertexId::of(vtx.bytes()));
    }

    #[test]
    fn build_canonicalizes_parent_order() {
        let a = VertexId::from_bytes([9u8; 32]);
        let b = VertexId::from_bytes([1u8; 32]);
        let v1 = WireVertex::build(chain(), 1, vec![a, b], vec![vec![7]]).unwrap();
        let v2 = WireVertex::build(chain(), 1, vec![b, a, b], vec![vec![7]]).unwrap();
        assert_eq!(v1.id(), v2.id());
        assert_eq!(v1.parents(), &[b, a]);
    }

    #[test]
    fn parse_rejects_unsorted_parents() {
        let inner = Inner {
            codec_version: CODEC_VERSION,
            chain_id: chain(),
            height: 1,
            parents: vec![VertexId::from_bytes([2u8; 32]), VertexId::from_bytes([1u8; 32])],
            txs: vec![vec![1]],
        };
        let bytes = bincode::serialize(&inner).unwrap();
        assert!(matches!(
            WireVertex::parse(&bytes),
            Err(SkeinError::MalformedVertex(_))
        ));
    }

    #[test]
    fn parse_rejects_duplicate_txs() {
        let inner = Inner {
            codec_version: CODEC_VERSION,
            chain_id: chain(),
            height: 0,
            parents: vec![],
            txs: vec![vec![5], vec![5]],
        };
        let bytes = bincode::serialize(&inner).unwrap();
        assert!(matches!(
            WireVertex::parse(&bytes),
            Err(SkeinError::MalformedVertex(_))
        ));
    }

    #[test]
    fn ordinary_vertex_needs_txs() {
        assert!(matches!(
            WireVertex::build(chain(), 0, vec![], vec![]),
            Err(SkeinError::MalformedVertex(_))
        ));
    }

    #[test]
    fn stop_vertex_carries_none() {
        let parent = WireVertex::build(chain(), 0, vec![], vec![vec![1]]).unwrap();
        let stop = WireVertex::build_stop(chain(), 1, vec![parent.id()]).unwrap();
        assert!(stop.is_stop_vertex());
        assert!(stop.tx_blobs().is_empty());
        let parsed = WireVertex::parse(stop.bytes()).unwrap();
        assert!(parsed.is_stop_vertex());
    }

    #[test]
    fn parse_rejects_unknown_codec_version() {
        let inner = Inner {
            codec_version: 7,
            chain_id: chain(),
            height: 0,
            parents: vec![],
            txs: vec![],
        };
        let bytes = bincode::serialize(&inner).unwrap();
        assert!(matches!(
            WireVertex::parse(&bytes),
            Err(SkeinError::MalformedVertex(_))
        ));
    }

    #[test]
    fn parse_rejects_random_garbage() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xda6);
        for len in [0usize, 1, 7, 64, 500] {
            let mut bytes = vec![0u8; len];
            rng.fill(&mut bytes[..]);
            // Whatever bincode makes of it, it must never panic and must
            // surface as a protocol error, not a crash.
            match WireVertex::parse(&bytes) {
                Ok(v) => assert_eq!(v.id(), VertexId::of(&bytes)),
                Err(SkeinError::MalformedVertex(_)) => {}
                Err(other) => panic!("unexpected error class: {other}"),
            }
        }
    }
}
