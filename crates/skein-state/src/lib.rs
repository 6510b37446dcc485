pub mod kv;
pub mod queue;
pub mod serializer;
pub mod versioned;

pub use kv::{Batch, Database, MemDb, SledDb};
pub use queue::{JobId, JobQueue};
pub use serializer::DagState;
pub use versioned::VersionedDb;
