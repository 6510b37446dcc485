//! Durable dependency-tracking job queues.
//!
//! Bootstrap keeps two of these — one for vertices, one for transactions.
//! A job is a 32-byte item ID plus the set of dependency IDs that must
//! resolve before it may run. Every mutation writes through to the
//! database, so an interrupted bootstrap resumes without re-deriving
//! dependencies it already proved. The queue does not execute anything
//! itself; the bootstrapper pops runnable IDs and interprets them.

use crate::kv::{Batch, Database};
use skein_core::SkeinError;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Raw 32-byte item identifier. Vertex and transaction IDs are both
/// content hashes, so one keyspace serves both queues.
pub type JobId = [u8; 32];

pub struct JobQueue<D: Database> {
    db: D,
    name: &'static str,
    /// Every job currently tracked (runnable or blocked).
    jobs: HashSet<JobId>,
    /// Unmet dependencies per blocked job.
    deps: HashMap<JobId, HashSet<JobId>>,
    /// Reverse index: dependency -> jobs waiting on it.
    blocking: HashMap<JobId, HashSet<JobId>>,
    runnable: VecDeque<JobId>,
    runnable_set: HashSet<JobId>,
    /// Item IDs known to be required but not yet held locally.
    missing: HashSet<JobId>,
}

fn job_key(name: &str, id: &JobId) -> Vec<u8> {
    let mut k = Vec::with_capacity(name.len() + 6 + 32);
    k.extend_from_slice(name.as_bytes());
    k.extend_from_slice(b"/job/");
    k.extend_from_slice(id);
    k
}

fn dep_key(name: &str, id: &JobId, dep: &JobId) -> Vec<u8> {
    let mut k = Vec::with_capacity(name.len() + 6 + 64);
    k.extend_from_slice(name.as_bytes());
    k.extend_from_slice(b"/dep/");
    k.extend_from_slice(id);
    k.extend_from_slice(dep);
    k
}

fn miss_key(name: &str, id: &JobId) -> Vec<u8> {
    let mut k = Vec::with_capacity(name.len() + 7 + 32);
    k.extend_from_slice(name.as_bytes());
    k.extend_from_slice(b"/miss/");
    k.extend_from_slice(id);
    k
}

fn take32(raw: &[u8]) -> Result<JobId, SkeinError> {
    if raw.len() < 32 {
        return Err(SkeinError::Corruption(format!(
            "queue key fragment of length {}",
            raw.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&raw[..32]);
    Ok(arr)
}

impl<D: Database> JobQueue<D> {
    /// Open the queue named `name`, restoring durable jobs, dependency
    /// edges, and the missing-ID set.
    pub fn open(db: D, name: &'static str) -> Result<JobQueue<D>, SkeinError> {
        let mut queue = JobQueue {
            db,
            name,
            jobs: HashSet::new(),
            deps: HashMap::new(),
            blocking: HashMap::new(),
            runnable: VecDeque::new(),
            runnable_set: HashSet::new(),
            missing: HashSet::new(),
        };

        let mut job_prefix = name.as_bytes().to_vec();
        job_prefix.extend_from_slice(b"/job/");
        for (k, _) in queue.db.scan_prefix(&job_prefix)? {
            queue.jobs.insert(take32(&k[job_prefix.len()..])?);
        }

        let mut dep_prefix = name.as_bytes().to_vec();
        dep_prefix.extend_from_slice(b"/dep/");
        for (k, _) in queue.db.scan_prefix(&dep_prefix)? {
            let rest = &k[dep_prefix.len()..];
            let id = take32(rest)?;
            let dep = take32(&rest[32..])?;
            if !queue.jobs.contains(&id) {
                return Err(SkeinError::Corruption(
                    "dependency edge for absent job".into(),
                ));
            }
            queue.deps.entry(id).or_default().insert(dep);
            queue.blocking.entry(dep).or_default().insert(id);
        }

        let mut miss_prefix = name.as_bytes().to_vec();
        miss_prefix.extend_from_slice(b"/miss/");
        for (k, _) in queue.db.scan_prefix(&miss_prefix)? {
            queue.missing.insert(take32(&k[miss_prefix.len()..])?);
        }

        for id in queue.jobs.iter().copied().collect::<Vec<_>>() {
            if !queue.deps.contains_key(&id) {
                queue.make_runnable(id);
            }
        }
        debug!(
            queue = name,
            jobs = queue.jobs.len(),
            blocked = queue.deps.len(),
            missing = queue.missing.len(),
            "opened job queue"
        );
        Ok(queue)
    }

    fn make_runnable(&mut self, id: JobId) {
        if self.runnable_set.insert(id) {
            self.runnable.push_back(id);
        }
    }

    /// Track a job with the given unmet dependencies. Returns false (and
    /// does nothing) if the job is already tracked.
    pub fn push(&mut self, id: JobId, unmet: &[JobId]) -> Result<bool, SkeinError> {
        if self.jobs.contains(&id) {
            return Ok(false);
        }
        let mut batch = Batch::new();
        batch.put(job_key(self.name, &id), Vec::new());
        for dep in unmet {
            batch.put(dep_key(self.name, &id, dep), Vec::new());
        }
        self.db.write(batch)?;

        self.jobs.insert(id);
        if unmet.is_empty() {
            self.make_runnable(id);
        } else {
            let set: HashSet<JobId> = unmet.iter().copied().collect();
            for dep in &set {
                self.blocking.entry(*dep).or_default().insert(id);
            }
            self.deps.insert(id, set);
        }
        Ok(true)
    }

    pub fn has_job(&self, id: &JobId) -> bool {
        self.jobs.contains(id)
    }

    /// Mark `dep` satisfied. Jobs whose last dependency this was become
    /// runnable; their IDs are returned. Unknown deps are a silent no-op,
    /// which is what makes late or duplicate resolutions harmless.
    pub fn resolve(&mut self, dep: &JobId) -> Result<Vec<JobId>, SkeinError> {
        let Some(waiters) = self.blocking.remove(dep) else {
            return Ok(Vec::new());
        };
        let mut batch = Batch::new();
        let mut ready = Vec::new();
        for id in waiters {
            batch.delete(dep_key(self.name, &id, dep));
            if let Some(set) = self.deps.get_mut(&id) {
                set.remove(dep);
                if set.is_empty() {
                    self.deps.remove(&id);
                    self.make_runnable(id);
                    ready.push(id);
                }
            }
        }
        self.db.write(batch)?;
        Ok(ready)
    }

    /// Pop the next runnable job ID, if any.
    pub fn next_runnable(&mut self) -> Option<JobId> {
        let id = self.runnable.pop_front()?;
        self.runnable_set.remove(&id);
        Some(id)
    }

    /// Remove an executed job durably and resolve it as a dependency of
    /// whatever was waiting on it.
    pub fn mark_executed(&mut self, id: &JobId) -> Result<Vec<JobId>, SkeinError> {
        self.db.delete(&job_key(self.name, id))?;
        self.jobs.remove(id);
        self.resolve(id)
    }

    /// Re-check recorded dependencies against current truth: any dep for
    /// which `resolved` returns true is purged. Covers the crash window
    /// between an item being accepted durably and its queue entry being
    /// resolved.
    pub fn revalidate<F>(&mut self, mut resolved: F) -> Result<Vec<JobId>, SkeinError>
    where
        F: FnMut(&JobId) -> bool,
    {
        let satisfied: Vec<JobId> = self
            .blocking
            .keys()
            .filter(|dep| resolved(dep))
            .copied()
            .collect();
        let mut ready = Vec::new();
        for dep in satisfied {
            ready.extend(self.resolve(&dep)?);
        }
        Ok(ready)
    }

    // ── Missing-ID working set ────────────────────────────────────────────────

    pub fn add_missing(&mut self, id: JobId) -> Result<(), SkeinError> {
        if self.missing.insert(id) {
            self.db.put(&miss_key(self.name, &id), &[])?;
        }
        Ok(())
    }

    pub fn remove_missing(&mut self, id: &JobId) -> Result<(), SkeinError> {
        if self.missing.remove(id) {
            self.db.delete(&miss_key(self.name, id))?;
        }
        Ok(())
    }

    pub fn missing_ids(&self) -> Vec<JobId> {
        self.missing.iter().copied().collect()
    }

    pub fn num_missing(&self) -> usize {
        self.missing.len()
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// True when nothing is tracked: no runnable jobs, no blocked jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn num_blocked(&self) -> usize {
        self.deps.len()
    }

    pub fn num_runnable(&self) -> usize {
        self.runnable.len()
    }
}
