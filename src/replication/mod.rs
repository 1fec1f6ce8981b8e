pub mod actor;
pub mod checksum;
pub mod coordinator;
pub mod log;
pub mod membership;
pub mod quorum;
pub mod replica;
pub mod rpc;
pub mod types;

pub use actor::{GetState, NodeActor, NodeStateInfo};
pub use coordinator::Coordinator;
pub use log::{SharedLog, VersionedLog};
pub use membership::Membership;
pub use quorum::{ConfirmationTable, DivergencePolicy, QuorumPolicy};
pub use replica::{CommitOutcome, Replica};
pub use rpc::WireMessage;
pub use types::{Committed, ContentId, ContentRef, Entry, PeerId, Version};
