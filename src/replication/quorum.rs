use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::types::{Checksum, PeerId, Version};

/// How many snapshot peers must ack before a round can commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuorumPolicy {
    /// ceil(n / 2) acks, or 1 when n <= 1
    #[default]
    Majority,
    /// Every peer in the round-start snapshot
    Unanimous,
}

impl QuorumPolicy {
    pub fn required(&self, peer_count: usize) -> usize {
        match self {
            QuorumPolicy::Majority => {
                if peer_count <= 1 {
                    1
                } else {
                    peer_count.div_ceil(2)
                }
            }
            QuorumPolicy::Unanimous => peer_count.max(1),
        }
    }
}

/// What to do when enough peers acked but their checksums disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DivergencePolicy {
    /// Keep collecting acks until they converge or the round times out
    #[default]
    WaitForTimeout,
    /// Abort the round as soon as divergence is observed
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tally {
    /// Enough snapshot peers agree on one checksum
    Reached { checksum: Checksum, acks: usize },
    /// Not enough acks yet
    Pending { acks: usize },
    /// Enough acks, but not all equal
    Diverged { checksums: Vec<(PeerId, Checksum)> },
}

/// Evaluate a round against the peer snapshot taken when it started.
///
/// Acks from peers outside the snapshot are not counted.
pub fn evaluate(
    policy: QuorumPolicy,
    snapshot: &BTreeSet<PeerId>,
    confirmations: &HashMap<PeerId, Checksum>,
) -> Tally {
    let required = policy.required(snapshot.len());
    let acked: Vec<(PeerId, Checksum)> = snapshot
        .iter()
        .filter_map(|peer| confirmations.get(peer).map(|h| (peer.clone(), *h)))
        .collect();

    if acked.len() < required {
        return Tally::Pending { acks: acked.len() };
    }

    let first = acked[0].1;
    if acked.iter().all(|(_, h)| *h == first) {
        Tally::Reached {
            checksum: first,
            acks: acked.len(),
        }
    } else {
        Tally::Diverged { checksums: acked }
    }
}

/// Per-version acknowledgement maps, one per open round.
///
/// Every recorded ack bumps a watch counter so a waiting round can
/// re-evaluate without polling.
#[derive(Debug)]
pub struct ConfirmationTable {
    rounds: Mutex<HashMap<Version, HashMap<PeerId, Checksum>>>,
    acks_seen: watch::Sender<u64>,
}

impl Default for ConfirmationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationTable {
    pub fn new() -> Self {
        let (acks_seen, _) = watch::channel(0);
        Self {
            rounds: Mutex::new(HashMap::new()),
            acks_seen,
        }
    }

    fn rounds(&self) -> MutexGuard<'_, HashMap<Version, HashMap<PeerId, Checksum>>> {
        self.rounds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn open(&self, version: Version) {
        self.rounds().insert(version, HashMap::new());
    }

    pub fn close(&self, version: Version) {
        self.rounds().remove(&version);
    }

    pub fn is_open(&self, version: Version) -> bool {
        self.rounds().contains_key(&version)
    }

    /// Record an ack. Acks for versions without an open round are dropped
    /// and `false` is returned.
    pub fn record(&self, version: Version, peer_id: &str, checksum: Checksum) -> bool {
        {
            let mut rounds = self.rounds();
            let Some(round) = rounds.get_mut(&version) else {
                return false;
            };
            round.insert(peer_id.to_string(), checksum);
        }

        self.acks_seen.send_modify(|n| *n = n.wrapping_add(1));
        true
    }

    pub fn confirmations(&self, version: Version) -> HashMap<PeerId, Checksum> {
        self.rounds().get(&version).cloned().unwrap_or_default()
    }

    /// Receiver that changes whenever any ack is recorded
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.acks_seen.subscribe()
    }
}
