pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod status;

pub use config::BootstrapConfig;
pub use error::SkeinError;
pub use ids::{ChainId, NodeId, RequestId, TxId, VertexId};
pub use status::Status;
