use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{gossipsub, mdns, noise, swarm::SwarmEvent, tcp, yamux, Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::behaviour::{Behaviour, BehaviourEvent};
use super::transport::{Inbound, Transport};
use crate::config::NetworkConfig;
use crate::util::errors::{ReplicationError, Result};

const CHANNEL_CAPACITY: usize = 1024;

struct PublishRequest {
    data: Vec<u8>,
    reply: oneshot::Sender<Result<()>>,
}

/// Gossipsub-backed transport. The swarm runs on its own task; this handle
/// only forwards publish requests to it.
#[derive(Clone)]
pub struct GossipTransport {
    local_peer_id: PeerId,
    commands: mpsc::Sender<PublishRequest>,
}

impl GossipTransport {
    /// Build the swarm, subscribe to the configured topic, start listening,
    /// and spawn the event loop.
    pub fn spawn(
        config: &NetworkConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<(Self, mpsc::Receiver<Inbound>)> {
        let heartbeat = config.heartbeat_interval();
        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key| Behaviour::new(key, heartbeat))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(config.idle_timeout()))
            .build();

        let topic = gossipsub::IdentTopic::new(config.topic.clone());
        swarm.behaviour_mut().gossipsub.subscribe(&topic)?;
        swarm.listen_on(config.listen_addr.parse()?)?;

        for addr in &config.bootstrap {
            let addr: Multiaddr = addr.parse()?;
            tracing::info!("Dialing bootstrap peer {}", addr);
            swarm.dial(addr)?;
        }

        let local_peer_id = *swarm.local_peer_id();
        tracing::info!("Local peer id: {local_peer_id}");

        let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(run_swarm(swarm, topic, commands_rx, inbound_tx, shutdown));

        Ok((
            Self {
                local_peer_id,
                commands: commands_tx,
            },
            inbound_rx,
        ))
    }
}

#[async_trait]
impl Transport for GossipTransport {
    async fn publish(&self, data: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PublishRequest { data, reply })
            .await
            .map_err(|_| ReplicationError::Transport("swarm task stopped".to_string()))?;

        rx.await
            .map_err(|_| ReplicationError::Transport("swarm task dropped request".to_string()))?
    }

    fn local_id(&self) -> Option<String> {
        Some(self.local_peer_id.to_string())
    }
}

async fn run_swarm(
    mut swarm: Swarm<Behaviour>,
    topic: gossipsub::IdentTopic,
    mut commands: mpsc::Receiver<PublishRequest>,
    inbound: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Swarm loop shutting down");
                break;
            }
            Some(request) = commands.recv() => {
                let result = match swarm.behaviour_mut().gossipsub.publish(topic.clone(), request.data) {
                    Ok(_) => Ok(()),
                    // Nobody to deliver to is not a failure for a broadcast
                    Err(gossipsub::PublishError::InsufficientPeers) => {
                        tracing::debug!("Published with no connected peers");
                        Ok(())
                    }
                    Err(e) => Err(ReplicationError::Transport(e.to_string())),
                };
                let _ = request.reply.send(result);
            }
            event = swarm.select_next_some() => {
                handle_swarm_event(&mut swarm, event, &inbound).await;
            }
        }
    }
}

async fn handle_swarm_event(
    swarm: &mut Swarm<Behaviour>,
    event: SwarmEvent<BehaviourEvent>,
    inbound: &mpsc::Sender<Inbound>,
) {
    match event {
        SwarmEvent::Behaviour(BehaviourEvent::Mdns(mdns::Event::Discovered(list))) => {
            for (peer_id, _addr) in list {
                tracing::debug!("mDNS discovered peer {peer_id}");
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }
        }
        SwarmEvent::Behaviour(BehaviourEvent::Mdns(mdns::Event::Expired(list))) => {
            for (peer_id, _addr) in list {
                tracing::debug!("mDNS peer expired {peer_id}");
                swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
            }
        }
        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            let from = message.source.unwrap_or(propagation_source).to_string();
            let delivered = inbound
                .send(Inbound {
                    from: Some(from),
                    data: message.data,
                })
                .await;
            if delivered.is_err() {
                tracing::warn!("Inbound receiver dropped, discarding topic message");
            }
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!("Listening on {address}");
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            tracing::debug!("Connected to {peer_id}");
        }
        _ => {}
    }
}
