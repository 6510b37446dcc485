//! Building `Ancestors` response batches.
//!
//! Serves a peer's `GetAncestors` request: a depth-first batch of vertex
//! bytes beginning with the requested vertex. The batch is a pre-fetch
//! optimization only — receivers must not rely on it being complete or
//! ordered, so the caps here are free to truncate anywhere.

use crate::store::VertexStore;
use skein_core::{SkeinError, VertexId};
use std::collections::HashSet;
use tracing::debug;

/// Collect up to `max_vertices` vertex blobs (bounded by `max_bytes` total)
/// reachable from `start` by following parent edges, depth-first, starting
/// with `start` itself.
///
/// Returns `UnknownVertex` only if `start` itself is unknown; unknown
/// ancestors just end their branch of the traversal.
pub fn collect_ancestors<M: VertexStore>(
    store: &mut M,
    start: &VertexId,
    max_vertices: usize,
    max_bytes: usize,
) -> Result<Vec<Vec<u8>>, SkeinError> {
    let first = store.get_vertex(start)?;

    let mut batch: Vec<Vec<u8>> = Vec::new();
    let mut total = 0usize;
    let mut visited: HashSet<VertexId> = HashSet::new();
    let mut stack = vec![first];

    while let Some(vtx) = stack.pop() {
        if batch.len() >= max_vertices {
            break;
        }
        if !visited.insert(vtx.id()) {
            continue;
        }

        let bytes = vtx.bytes().to_vec();
        if total + bytes.len() > max_bytes && !batch.is_empty() {
            break;
        }
        total += bytes.len();
        batch.push(bytes);

        for parent_id in vtx.parents().iter().rev() {
            if visited.contains(parent_id) {
                continue;
            }
            match store.get_vertex(parent_id) {
                Ok(parent) => stack.push(parent),
                Err(SkeinError::UnknownVertex(_)) => {
                    debug!(vertex = %parent_id, "skipping unknown ancestor");
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(batch)
}
