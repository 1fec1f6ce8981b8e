pub mod behaviour;
pub mod gossip;
pub mod memory;
pub mod transport;

pub use gossip::GossipTransport;
pub use memory::{MemoryHub, MemoryTransport};
pub use transport::{Inbound, Transport};
