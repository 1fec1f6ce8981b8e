//! Wiring for a single process: shared state, the node actor, the inbound
//! pump, and (on the leader) the coordinator.

use std::sync::Arc;

use actix::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::annotate::{Annotator, HttpAnnotator};
use crate::config::{AnnotationConfig, BlobStoreConfig, Config, NodeConfig, Role};
use crate::network::{Inbound, Transport};
use crate::replication::actor::{GetState, HandleInbound, NodeActor, NodeStateInfo};
use crate::replication::{
    ConfirmationTable, Coordinator, Committed, Entry, Membership, PeerId, SharedLog, Version,
};
use crate::storage::{BlobStore, FsBlobStore, IpfsBlobStore};
use crate::util::errors::{ReplicationError, Result};

/// Peer id from config, else the transport's identity, else `peer-temp-xxxxxx`
pub fn resolve_peer_id(config: &NodeConfig, transport: &dyn Transport) -> PeerId {
    if let Some(peer_id) = &config.peer_id {
        return peer_id.clone();
    }
    if let Some(peer_id) = transport.local_id() {
        return peer_id;
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let peer_id = format!("peer-temp-{}", suffix.to_lowercase());
    tracing::warn!("No peer id available, using temporary id {}", peer_id);
    peer_id
}

pub fn build_blob_store(config: &BlobStoreConfig) -> Result<Arc<dyn BlobStore>> {
    match config {
        BlobStoreConfig::Ipfs { api_url } => Ok(Arc::new(IpfsBlobStore::new(api_url.clone()))),
        BlobStoreConfig::Fs { data_dir } => {
            let store = FsBlobStore::new(data_dir.clone())?;
            tracing::info!("Storing blobs under {}", store.data_dir().display());
            Ok(Arc::new(store))
        }
    }
}

pub fn build_annotator(config: &AnnotationConfig) -> Result<Option<Arc<dyn Annotator>>> {
    match &config.endpoint {
        Some(endpoint) => {
            let annotator = HttpAnnotator::new(endpoint.clone(), config.timeout())?;
            Ok(Some(Arc::new(annotator)))
        }
        None => Ok(None),
    }
}

/// A running node. Cheap to share behind an `Arc`.
pub struct Node {
    peer_id: PeerId,
    role: Role,
    log: Arc<SharedLog>,
    membership: Arc<Membership>,
    blobs: Arc<dyn BlobStore>,
    coordinator: Option<Arc<Coordinator>>,
    actor: Addr<NodeActor>,
}

impl Node {
    /// Start the node actor and the inbound pump. Must run inside an actix
    /// system; the pump stops when `shutdown` is cancelled.
    pub fn start(
        config: &Config,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Inbound>,
        blobs: Arc<dyn BlobStore>,
        annotator: Option<Arc<dyn Annotator>>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let peer_id = resolve_peer_id(&config.node, transport.as_ref());
        let role = config.node.role;

        let log = Arc::new(SharedLog::new());
        let membership = Arc::new(Membership::new());
        let confirmations = Arc::new(ConfirmationTable::new());

        let coordinator = match role {
            Role::Leader => Some(Arc::new(Coordinator::new(
                peer_id.clone(),
                config.replication.clone(),
                membership.clone(),
                log.clone(),
                confirmations.clone(),
                transport.clone(),
                blobs.clone(),
                annotator,
            ))),
            Role::Peer => None,
        };

        let actor = NodeActor::new(
            peer_id.clone(),
            role,
            log.clone(),
            membership.clone(),
            confirmations,
            transport,
            config.node.hello_interval(),
        )
        .start();

        spawn_inbound_pump(inbound, actor.clone(), shutdown);

        tracing::info!("Node {} started as {:?}", peer_id, role);

        Ok(Self {
            peer_id,
            role,
            log,
            membership,
            blobs,
            coordinator,
            actor,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Replicate a payload. Only the leader accepts submissions.
    pub async fn submit(&self, payload: Vec<u8>, name: &str) -> Result<Committed> {
        match &self.coordinator {
            Some(coordinator) => coordinator.submit(payload, name).await,
            None => Err(ReplicationError::NotLeader),
        }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.membership.snapshot().into_iter().collect()
    }

    pub fn log_snapshot(&self) -> (Version, Vec<Entry>) {
        let log = self.log.lock();
        (log.current_version(), log.entries().to_vec())
    }

    pub async fn fetch_blob(&self, content_id: &str) -> Result<Vec<u8>> {
        self.blobs.get(content_id).await
    }

    pub async fn state(&self) -> Result<NodeStateInfo> {
        self.actor
            .send(GetState)
            .await
            .map_err(|e| ReplicationError::Transport(format!("node actor unavailable: {}", e)))
    }
}

fn spawn_inbound_pump(
    mut inbound: mpsc::Receiver<Inbound>,
    actor: Addr<NodeActor>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Inbound pump shutting down");
                    break;
                }
                message = inbound.recv() => match message {
                    Some(message) => actor.do_send(HandleInbound(message)),
                    None => {
                        tracing::warn!("Transport closed its inbound channel");
                        break;
                    }
                }
            }
        }
    });
}
