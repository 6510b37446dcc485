pub mod ancestors;
pub mod heap;
pub mod store;
pub mod testing;
pub mod tx;
pub mod vertex;
pub mod wire;

pub use heap::VertexHeap;
pub use store::VertexStore;
pub use tx::{DagTx, DagVm, InputId, TxHandle};
pub use vertex::Vertex;
pub use wire::WireVertex;
