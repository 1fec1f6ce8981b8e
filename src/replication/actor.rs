use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use super::log::SharedLog;
use super::membership::Membership;
use super::quorum::ConfirmationTable;
use super::replica::{CommitOutcome, Replica};
use super::rpc::{Hello, WireMessage};
use super::types::{Checksum, PeerId, Version};
use crate::config::Role;
use crate::network::{Inbound, Transport};

/// Raw topic message delivered by the transport
#[derive(Message)]
#[rtype(result = "()")]
pub struct HandleInbound(pub Inbound);

/// Decoded protocol message
#[derive(Message)]
#[rtype(result = "()")]
pub struct HandleWireMessage {
    pub from: Option<String>,
    pub message: WireMessage,
}

/// Broadcast a presence beacon now
#[derive(Message)]
#[rtype(result = "()")]
pub struct AnnouncePresence;

/// Get current node state (for monitoring)
#[derive(Message)]
#[rtype(result = "NodeStateInfo")]
pub struct GetState;

#[derive(Debug, Clone)]
pub struct NodeStateInfo {
    pub peer_id: PeerId,
    pub committed_version: Version,
    pub pending_versions: Vec<Version>,
    pub known_peers: usize,
    pub log_checksum: Checksum,
}

impl<A, M> actix::dev::MessageResponse<A, M> for NodeStateInfo
where
    A: Actor,
    M: Message<Result = NodeStateInfo>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

/// Inbound side of a node: runs the replica protocol, tracks membership,
/// and feeds acks to the coordinator's confirmation table.
///
/// On the leader the log belongs to the coordinator, so proposals and
/// commits seen on the topic are ignored there.
pub struct NodeActor {
    role: Role,
    replica: Replica,
    log: Arc<SharedLog>,
    membership: Arc<Membership>,
    confirmations: Arc<ConfirmationTable>,
    transport: Arc<dyn Transport>,
    hello_interval: Option<Duration>,
    hello_handle: Option<SpawnHandle>,
}

impl Actor for NodeActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("Node actor started for {}", self.replica.peer_id());

        ctx.notify(AnnouncePresence);
        if let Some(interval) = self.hello_interval {
            let handle = ctx.run_interval(interval, |_act, ctx| {
                ctx.notify(AnnouncePresence);
            });
            self.hello_handle = Some(handle);
        }
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        if let Some(handle) = self.hello_handle.take() {
            ctx.cancel_future(handle);
        }
        tracing::info!("Node actor stopped for {}", self.replica.peer_id());
    }
}

impl NodeActor {
    pub fn new(
        peer_id: PeerId,
        role: Role,
        log: Arc<SharedLog>,
        membership: Arc<Membership>,
        confirmations: Arc<ConfirmationTable>,
        transport: Arc<dyn Transport>,
        hello_interval: Option<Duration>,
    ) -> Self {
        Self {
            role,
            replica: Replica::new(peer_id),
            log,
            membership,
            confirmations,
            transport,
            hello_interval,
            hello_handle: None,
        }
    }

    fn broadcast(&self, message: WireMessage, ctx: &mut Context<Self>) {
        let transport = self.transport.clone();
        let kind = message.kind();

        let fut = async move {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to encode {}: {}", kind, e);
                    return;
                }
            };
            if let Err(e) = transport.publish(bytes).await {
                tracing::warn!("Failed to publish {}: {}", kind, e);
            }
        };

        ctx.spawn(fut.into_actor(self));
    }
}

impl Handler<HandleInbound> for NodeActor {
    type Result = ();

    fn handle(&mut self, msg: HandleInbound, ctx: &mut Context<Self>) -> Self::Result {
        match WireMessage::decode(&msg.0.data) {
            Ok(message) => {
                ctx.notify(HandleWireMessage {
                    from: msg.0.from,
                    message,
                });
            }
            Err(e) => {
                tracing::debug!(
                    "Dropping invalid topic message from {:?}: {}",
                    msg.0.from,
                    e
                );
            }
        }
    }
}

impl Handler<HandleWireMessage> for NodeActor {
    type Result = ();

    fn handle(&mut self, msg: HandleWireMessage, ctx: &mut Context<Self>) -> Self::Result {
        match msg.message {
            WireMessage::Hello(hello) => {
                // Answer newcomers so they learn about us without waiting for the next beacon
                if self.membership.on_presence(&hello.peer_id) {
                    ctx.notify(AnnouncePresence);
                }
            }

            WireMessage::Ack(ack) => {
                if self.confirmations.record(ack.version, &ack.peer_id, ack.hash) {
                    tracing::info!(
                        "ACK from {} for version {} -> hash={}",
                        ack.peer_id,
                        ack.version,
                        ack.hash
                    );
                } else {
                    tracing::debug!(
                        "Ignoring ACK from {} for version {}: no open round",
                        ack.peer_id,
                        ack.version
                    );
                }
            }

            WireMessage::Propose(propose) if self.role == Role::Leader => {
                tracing::debug!(
                    "Leader ignoring proposal {} from {:?}",
                    propose.version,
                    msg.from
                );
            }

            WireMessage::Commit(commit) if self.role == Role::Leader => {
                tracing::debug!(
                    "Leader ignoring commit {} ({}) from {:?}",
                    commit.version,
                    commit.content_id,
                    msg.from
                );
            }

            WireMessage::Propose(propose) => {
                let ack = {
                    let log = self.log.lock();
                    self.replica.on_propose(&log, propose)
                };
                if let Some(ack) = ack {
                    self.broadcast(WireMessage::Ack(ack), ctx);
                }
            }

            WireMessage::Commit(commit) => {
                let version = commit.version;
                let outcome = {
                    let mut log = self.log.lock();
                    self.replica.on_commit(&mut log, commit)
                };
                match outcome {
                    Ok(CommitOutcome::Applied { .. }) | Ok(CommitOutcome::Stale { .. }) => {}
                    Ok(CommitOutcome::Gap { committed }) => {
                        tracing::warn!(
                            "Commit {} left unapplied, local log ends at {}",
                            version,
                            committed
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to apply commit {}: {}", version, e);
                    }
                }
            }
        }
    }
}

impl Handler<AnnouncePresence> for NodeActor {
    type Result = ();

    fn handle(&mut self, _msg: AnnouncePresence, ctx: &mut Context<Self>) -> Self::Result {
        tracing::debug!("Announcing presence: {}", self.replica.peer_id());
        let hello = WireMessage::Hello(Hello {
            peer_id: self.replica.peer_id().to_string(),
        });
        self.broadcast(hello, ctx);
    }
}

impl Handler<GetState> for NodeActor {
    type Result = NodeStateInfo;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Context<Self>) -> Self::Result {
        NodeStateInfo {
            peer_id: self.replica.peer_id().to_string(),
            committed_version: self.log.current_version(),
            pending_versions: self.replica.pending_versions(),
            known_peers: self.membership.len(),
            log_checksum: self.log.lock().checksum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryHub;
    use crate::replication::rpc::{Ack, Commit, Propose};
    use crate::replication::types::ContentRef;
    use tokio::sync::mpsc;

    struct Harness {
        addr: Addr<NodeActor>,
        log: Arc<SharedLog>,
        membership: Arc<Membership>,
        confirmations: Arc<ConfirmationTable>,
        // Everything the actor publishes, seen from another endpoint
        observed: mpsc::Receiver<Inbound>,
    }

    fn start(peer_id: &str) -> Harness {
        start_as(peer_id, Role::Peer)
    }

    fn start_as(peer_id: &str, role: Role) -> Harness {
        let hub = MemoryHub::new();
        let (transport, _own_rx) = hub.join(peer_id);
        let (_observer, observed) = hub.join("observer");

        let log = Arc::new(SharedLog::new());
        let membership = Arc::new(Membership::new());
        let confirmations = Arc::new(ConfirmationTable::new());
        let addr = NodeActor::new(
            peer_id.to_string(),
            role,
            log.clone(),
            membership.clone(),
            confirmations.clone(),
            Arc::new(transport),
            None,
        )
        .start();

        Harness {
            addr,
            log,
            membership,
            confirmations,
            observed,
        }
    }

    async fn next_message(rx: &mut mpsc::Receiver<Inbound>) -> WireMessage {
        let inbound = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("hub closed");
        WireMessage::decode(&inbound.data).unwrap()
    }

    async fn deliver(addr: &Addr<NodeActor>, message: WireMessage) {
        addr.send(HandleWireMessage {
            from: Some("leader".to_string()),
            message,
        })
        .await
        .unwrap();
    }

    #[actix_rt::test]
    async fn test_announces_on_start() {
        let mut h = start("p1");
        assert_eq!(
            next_message(&mut h.observed).await,
            WireMessage::Hello(Hello {
                peer_id: "p1".to_string()
            })
        );
    }

    #[actix_rt::test]
    async fn test_propose_is_acked_and_commit_applied() {
        let mut h = start("p1");
        let _hello = next_message(&mut h.observed).await;

        let propose = Propose {
            version: 1,
            candidate_state: vec![],
        };
        deliver(&h.addr, WireMessage::Propose(propose)).await;

        match next_message(&mut h.observed).await {
            WireMessage::Ack(Ack { version, peer_id, hash }) => {
                assert_eq!(version, 1);
                assert_eq!(peer_id, "p1");
                assert_eq!(hash, 0);
            }
            other => panic!("expected ack, got {:?}", other),
        }

        let commit = Commit {
            version: 1,
            content_id: "QmA".to_string(),
            annotation: None,
        };
        deliver(&h.addr, WireMessage::Commit(commit)).await;

        let state = h.addr.send(GetState).await.unwrap();
        assert_eq!(state.committed_version, 1);
        assert!(state.pending_versions.is_empty());
        assert_eq!(h.log.snapshot()[0].content_id, "QmA");
    }

    #[actix_rt::test]
    async fn test_stale_propose_emits_nothing() {
        let mut h = start("p1");
        let _hello = next_message(&mut h.observed).await;

        h.log
            .lock()
            .append(crate::replication::types::Entry::new(1, "QmA".to_string(), None))
            .unwrap();

        let stale = Propose {
            version: 1,
            candidate_state: vec![ContentRef::new(1, "QmZ")],
        };
        deliver(&h.addr, WireMessage::Propose(stale)).await;

        // Flush: a fresh hello from a new peer triggers a reply beacon
        deliver(
            &h.addr,
            WireMessage::Hello(Hello {
                peer_id: "p2".to_string(),
            }),
        )
        .await;
        assert!(matches!(
            next_message(&mut h.observed).await,
            WireMessage::Hello(_)
        ));
        assert_eq!(h.log.current_version(), 1);
    }

    #[actix_rt::test]
    async fn test_hello_and_ack_update_shared_state() {
        let h = start_as("leader", Role::Leader);
        h.confirmations.open(4);

        deliver(
            &h.addr,
            WireMessage::Hello(Hello {
                peer_id: "p7".to_string(),
            }),
        )
        .await;
        deliver(
            &h.addr,
            WireMessage::Ack(Ack {
                version: 4,
                peer_id: "p7".to_string(),
                hash: 55,
            }),
        )
        .await;

        assert!(h.membership.contains("p7"));
        assert_eq!(h.confirmations.confirmations(4).get("p7"), Some(&55));
    }

    #[actix_rt::test]
    async fn test_malformed_inbound_is_dropped() {
        let h = start("p1");
        h.addr
            .send(HandleInbound(Inbound {
                from: Some("x".to_string()),
                data: b"{not json".to_vec(),
            }))
            .await
            .unwrap();

        let state = h.addr.send(GetState).await.unwrap();
        assert_eq!(state.committed_version, 0);
        assert_eq!(state.known_peers, 0);
    }

    #[actix_rt::test]
    async fn test_leader_ignores_foreign_propose_and_commit() {
        let mut h = start_as("leader", Role::Leader);
        let _hello = next_message(&mut h.observed).await;

        deliver(
            &h.addr,
            WireMessage::Propose(Propose {
                version: 1,
                candidate_state: vec![],
            }),
        )
        .await;
        deliver(
            &h.addr,
            WireMessage::Commit(Commit {
                version: 1,
                content_id: "QmForeign".to_string(),
                annotation: None,
            }),
        )
        .await;

        let state = h.addr.send(GetState).await.unwrap();
        assert_eq!(state.committed_version, 0);
        assert!(state.pending_versions.is_empty());
        assert!(h.log.snapshot().is_empty());

        // No ack went out for the proposal
        let quiet = tokio::time::timeout(Duration::from_millis(100), h.observed.recv()).await;
        assert!(quiet.is_err());
    }
}
