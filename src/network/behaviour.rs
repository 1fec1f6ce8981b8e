use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use libp2p::{
    gossipsub::{self, MessageAuthenticity},
    mdns,
    swarm::NetworkBehaviour,
};
use tokio::io;

/// Carries the replication topic (hello, propose, ack, commit) over
/// gossipsub; mDNS finds other nodes on the LAN so they can be added as
/// explicit gossip peers.
#[derive(NetworkBehaviour)]
pub struct Behaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
}

impl Behaviour {
    pub fn new(
        key: &libp2p::identity::Keypair,
        heartbeat_interval: Duration,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // Periodic hello beacons repeat the same body, so the id includes
        // the sender and its sequence number
        let message_id_fn = |message: &gossipsub::Message| {
            let mut s = DefaultHasher::new();
            message.source.hash(&mut s);
            message.sequence_number.hash(&mut s);
            message.data.hash(&mut s);
            gossipsub::MessageId::from(s.finish().to_string())
        };

        // Proposals and commits are signed by the publishing node
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(heartbeat_interval)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .message_id_fn(message_id_fn)
            .build()
            .map_err(|msg| io::Error::new(io::ErrorKind::Other, msg))?;

        let gossipsub =
            gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossipsub_config)?;
        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), key.public().to_peer_id())?;

        Ok(Behaviour { gossipsub, mdns })
    }
}
