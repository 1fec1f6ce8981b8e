use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use super::checksum::checksum_refs;
use super::log::SharedLog;
use super::membership::Membership;
use super::quorum::{evaluate, ConfirmationTable, DivergencePolicy, Tally};
use super::rpc::{Commit, Propose, WireMessage};
use super::types::{Checksum, Committed, ContentRef, Entry, PeerId, Version};
use crate::annotate::Annotator;
use crate::config::ReplicationConfig;
use crate::network::Transport;
use crate::storage::BlobStore;
use crate::util::errors::{ReplicationError, Result};

/// Leader side of the protocol.
///
/// `submit` runs one round at a time: propose, wait for quorum, then store
/// the payload, append, and broadcast the commit.
pub struct Coordinator {
    peer_id: PeerId,
    config: ReplicationConfig,
    membership: Arc<Membership>,
    log: Arc<SharedLog>,
    confirmations: Arc<ConfirmationTable>,
    transport: Arc<dyn Transport>,
    blobs: Arc<dyn BlobStore>,
    annotator: Option<Arc<dyn Annotator>>,
    round: AsyncMutex<()>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_id: PeerId,
        config: ReplicationConfig,
        membership: Arc<Membership>,
        log: Arc<SharedLog>,
        confirmations: Arc<ConfirmationTable>,
        transport: Arc<dyn Transport>,
        blobs: Arc<dyn BlobStore>,
        annotator: Option<Arc<dyn Annotator>>,
    ) -> Self {
        if config.leader_acks {
            membership.on_presence(&peer_id);
        }

        Self {
            peer_id,
            config,
            membership,
            log,
            confirmations,
            transport,
            blobs,
            annotator,
            round: AsyncMutex::new(()),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub async fn submit(&self, payload: Vec<u8>, name: &str) -> Result<Committed> {
        let _round = self.round.lock().await;

        let snapshot = self.membership.snapshot();
        if snapshot.is_empty() {
            tracing::warn!("Rejecting {}: no peers connected", name);
            return Err(ReplicationError::NoPeers);
        }

        let (version, candidate_state) = {
            let log = self.log.lock();
            (log.current_version() + 1, log.content_refs())
        };

        tracing::info!(
            "New proposal: version {} ({}) to {} peer(s)",
            version,
            name,
            snapshot.len()
        );

        // Open before publishing so early acks are not dropped
        self.confirmations.open(version);

        let outcome = self.run_round(version, candidate_state, &snapshot).await;
        let result = match outcome {
            Ok(checksum) => self.finalize(version, checksum, payload, name).await,
            Err(e) => Err(e),
        };

        self.confirmations.close(version);
        if let Err(e) = &result {
            tracing::warn!("Round for version {} failed: {}", version, e);
        }
        result
    }

    async fn run_round(
        &self,
        version: Version,
        candidate_state: Vec<ContentRef>,
        snapshot: &BTreeSet<PeerId>,
    ) -> Result<Checksum> {
        if self.config.leader_acks {
            let own = checksum_refs(&candidate_state);
            self.confirmations.record(version, &self.peer_id, own);
        }

        let propose = WireMessage::Propose(Propose {
            version,
            candidate_state,
        });
        self.transport.publish(propose.encode()?).await?;

        self.wait_for_quorum(version, snapshot).await
    }

    async fn wait_for_quorum(&self, version: Version, snapshot: &BTreeSet<PeerId>) -> Result<Checksum> {
        let policy = self.config.quorum;
        let required = policy.required(snapshot.len());
        let deadline = Instant::now() + self.config.round_timeout();
        let mut acks_seen = self.confirmations.subscribe();

        tracing::info!(
            "Waiting for quorum on version {}: snapshot={}, required={}",
            version,
            snapshot.len(),
            required
        );

        let mut reported_divergence: Option<Vec<(PeerId, Checksum)>> = None;

        loop {
            acks_seen.borrow_and_update();
            let confirmations = self.confirmations.confirmations(version);

            match evaluate(policy, snapshot, &confirmations) {
                Tally::Reached { checksum, acks } => {
                    tracing::info!(
                        "Quorum reached for version {} ({}/{}) hash={}",
                        version,
                        acks,
                        snapshot.len(),
                        checksum
                    );
                    return Ok(checksum);
                }
                Tally::Diverged { checksums } => {
                    if first_report(&mut reported_divergence, &checksums) {
                        tracing::warn!(
                            "Divergent checksums for version {}: {:?}",
                            version,
                            checksums
                        );
                    }
                    if self.config.divergence == DivergencePolicy::FailFast {
                        return Err(ReplicationError::Diverged { version, checksums });
                    }
                }
                Tally::Pending { .. } => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let acks = snapshot
                    .iter()
                    .filter(|p| confirmations.contains_key(*p))
                    .count();
                tracing::info!(
                    "Timeout ({}ms) waiting for quorum on version {}. Confirmed={}",
                    self.config.round_timeout_ms,
                    version,
                    acks
                );
                return Err(ReplicationError::QuorumTimeout {
                    version,
                    acks,
                    required,
                });
            }

            let wake_at = deadline.min(now + self.config.poll_interval());
            // Either an ack arrived or the poll interval elapsed; both re-evaluate
            let _ = tokio::time::timeout_at(wake_at, acks_seen.changed()).await;
        }
    }

    async fn finalize(
        &self,
        version: Version,
        checksum: Checksum,
        payload: Vec<u8>,
        name: &str,
    ) -> Result<Committed> {
        let content_id = self.blobs.add(payload.clone(), name).await?;

        let annotation = match &self.annotator {
            Some(annotator) => match annotator.annotate(&payload).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!("Annotation failed for {} (ignoring): {}", name, e);
                    None
                }
            },
            None => None,
        };

        self.log.lock().append(Entry::new(
            version,
            content_id.clone(),
            annotation.clone(),
        ))?;

        let commit = WireMessage::Commit(Commit {
            version,
            content_id: content_id.clone(),
            annotation,
        });
        match commit.encode() {
            Ok(bytes) => {
                if let Err(e) = self.transport.publish(bytes).await {
                    // Already committed locally; peers catch up from the next proposal
                    tracing::error!("Failed to broadcast commit for version {}: {}", version, e);
                }
            }
            Err(e) => tracing::error!("Failed to encode commit for version {}: {}", version, e),
        }

        tracing::info!(
            "Commit published: version={}, contentId={}, hash={}",
            version,
            content_id,
            checksum
        );

        Ok(Committed {
            version,
            content_id,
        })
    }
}

/// Whether `checksums` differs from the last divergence reported this round
fn first_report(reported: &mut Option<Vec<(PeerId, Checksum)>>, checksums: &[(PeerId, Checksum)]) -> bool {
    if reported.as_deref() == Some(checksums) {
        return false;
    }
    *reported = Some(checksums.to_vec());
    true
}
