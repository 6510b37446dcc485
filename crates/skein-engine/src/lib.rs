pub mod actor;
pub mod bag;
pub mod bootstrap;
pub mod requests;
pub mod subnet;
pub mod testing;
pub mod traits;
pub mod voter;

pub use actor::{ChainActor, ChainHandle, EngineEvent};
pub use bag::{BitSet64, VoteBag};
pub use bootstrap::{Bootstrapper, Phase};
pub use requests::OutstandingRequests;
pub use subnet::Subnet;
pub use traits::{Consensus, EngineHooks, PollAggregator, Sender, Validators};
pub use voter::PollResolver;
