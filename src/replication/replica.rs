use std::collections::BTreeMap;

use super::checksum::checksum_refs;
use super::log::VersionedLog;
use super::rpc::{Ack, Commit, Propose};
use super::types::{ContentRef, Entry, PeerId, Version};
use crate::util::errors::{ReplicationError, Result};

/// What a replica did with a commit message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Appended; the log now ends at `version`
    Applied { version: Version },
    /// Version already committed locally
    Stale { committed: Version },
    /// Nothing pending for this version and it does not follow our log
    Gap { committed: Version },
}

/// Peer side of the protocol: checksum proposals, apply commits.
///
/// The committed version is always read from the log passed in, so the
/// replica and a co-located coordinator can never disagree about it.
#[derive(Debug)]
pub struct Replica {
    peer_id: PeerId,
    pending: BTreeMap<Version, Vec<ContentRef>>,
}

impl Replica {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            pending: BTreeMap::new(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn pending_versions(&self) -> Vec<Version> {
        self.pending.keys().copied().collect()
    }

    /// Returns the ack to broadcast, or `None` for a stale or malformed proposal.
    pub fn on_propose(&mut self, log: &VersionedLog, propose: Propose) -> Option<Ack> {
        let committed = log.current_version();
        if propose.version <= committed {
            let stale = ReplicationError::StaleVersion {
                version: propose.version,
                committed,
            };
            tracing::debug!("Peer {} dropped proposal: {}", self.peer_id, stale);
            return None;
        }

        if let Err(e) = check_candidate(propose.version, &propose.candidate_state) {
            tracing::debug!(
                "Peer {} dropped proposal {}: {}",
                self.peer_id,
                propose.version,
                e
            );
            return None;
        }

        let hash = checksum_refs(&propose.candidate_state);
        tracing::info!(
            "Peer {} acking proposal {} ({} entries) hash={}",
            self.peer_id,
            propose.version,
            propose.candidate_state.len(),
            hash
        );
        self.pending.insert(propose.version, propose.candidate_state);

        Some(Ack {
            version: propose.version,
            peer_id: self.peer_id.clone(),
            hash,
        })
    }

    pub fn on_commit(&mut self, log: &mut VersionedLog, commit: Commit) -> Result<CommitOutcome> {
        let committed = log.current_version();
        if commit.version <= committed {
            tracing::debug!(
                "Peer {} ignored commit {} (committed: {})",
                self.peer_id,
                commit.version,
                committed
            );
            return Ok(CommitOutcome::Stale { committed });
        }

        let entry = Entry::new(commit.version, commit.content_id, commit.annotation);
        match self.pending.get(&commit.version) {
            Some(candidate) if !follows_local(candidate, log) => {
                tracing::warn!(
                    "Peer {} adopting leader's vector for version {} (local: {} entries, leader: {})",
                    self.peer_id,
                    commit.version,
                    committed,
                    candidate.len()
                );
                // Rebase and append on a copy; the log is replaced only if both succeed
                let mut staged = log.clone();
                staged.rebase(candidate)?;
                staged.append(entry)?;
                *log = staged;
            }
            Some(_) => log.append(entry)?,
            None if commit.version != committed + 1 => {
                tracing::warn!(
                    "Peer {} cannot apply commit {}: nothing pending and local log ends at {}",
                    self.peer_id,
                    commit.version,
                    committed
                );
                return Ok(CommitOutcome::Gap { committed });
            }
            None => log.append(entry)?,
        }

        self.pending = self.pending.split_off(&(commit.version + 1));

        tracing::info!(
            "Peer {} committed version {}",
            self.peer_id,
            commit.version
        );

        Ok(CommitOutcome::Applied {
            version: commit.version,
        })
    }
}

/// A candidate for `version` must hold exactly versions `1..version`, in order.
fn check_candidate(version: Version, candidate: &[ContentRef]) -> Result<()> {
    if candidate.len() as Version != version - 1 {
        return Err(ReplicationError::MalformedMessage(format!(
            "candidate has {} entries, expected {}",
            candidate.len(),
            version - 1
        )));
    }
    for (i, r) in candidate.iter().enumerate() {
        let expected = i as Version + 1;
        if r.version != expected {
            return Err(ReplicationError::MalformedMessage(format!(
                "candidate entry {} has version {}",
                expected, r.version
            )));
        }
    }
    Ok(())
}

fn follows_local(candidate: &[ContentRef], log: &VersionedLog) -> bool {
    candidate.len() as Version == log.current_version()
        && candidate
            .iter()
            .zip(log.entries())
            .all(|(r, e)| r.content_id == e.content_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn propose(version: Version, cids: &[&str]) -> Propose {
        Propose {
            version,
            candidate_state: cids
                .iter()
                .enumerate()
                .map(|(i, c)| ContentRef::new(i as Version + 1, *c))
                .collect(),
        }
    }

    fn commit(version: Version, cid: &str) -> Commit {
        Commit {
            version,
            content_id: cid.to_string(),
            annotation: None,
        }
    }

    #[test]
    fn test_ack_carries_candidate_checksum() {
        let log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());

        let ack = replica.on_propose(&log, propose(1, &[])).unwrap();
        assert_eq!(ack.version, 1);
        assert_eq!(ack.peer_id, "p1");
        assert_eq!(ack.hash, 0);
        assert_eq!(replica.pending_versions(), vec![1]);
    }

    #[test]
    fn test_two_replicas_agree_on_same_candidate() {
        let log = VersionedLog::new();
        let mut a = Replica::new("a".to_string());
        let mut b = Replica::new("b".to_string());

        let ha = a.on_propose(&log, propose(3, &["QmA", "QmB"])).unwrap().hash;
        let hb = b.on_propose(&log, propose(3, &["QmA", "QmB"])).unwrap().hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_stale_proposal_is_dropped() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());
        replica.on_propose(&log, propose(1, &[]));
        replica.on_commit(&mut log, commit(1, "QmA")).unwrap();

        let before = log.entries().to_vec();
        assert!(replica.on_propose(&log, propose(1, &[])).is_none());
        assert!(replica.pending_versions().is_empty());
        assert_eq!(log.entries(), before.as_slice());
    }

    #[test]
    fn test_duplicate_commit_is_idempotent() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());
        replica.on_propose(&log, propose(1, &[]));

        assert_eq!(
            replica.on_commit(&mut log, commit(1, "QmA")).unwrap(),
            CommitOutcome::Applied { version: 1 }
        );
        let once = log.entries().to_vec();

        assert_eq!(
            replica.on_commit(&mut log, commit(1, "QmA")).unwrap(),
            CommitOutcome::Stale { committed: 1 }
        );
        assert_eq!(log.entries(), once.as_slice());
    }

    #[test]
    fn test_commit_without_proposal_appends_next_version() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());

        assert_eq!(
            replica.on_commit(&mut log, commit(1, "QmA")).unwrap(),
            CommitOutcome::Applied { version: 1 }
        );
        assert_eq!(log.current_version(), 1);
    }

    #[test]
    fn test_gap_without_pending_is_dropped() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());

        assert_eq!(
            replica.on_commit(&mut log, commit(3, "QmC")).unwrap(),
            CommitOutcome::Gap { committed: 0 }
        );
        assert!(log.is_empty());
    }

    #[test]
    fn test_pending_candidate_fills_gap() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("late".to_string());

        replica.on_propose(&log, propose(3, &["QmA", "QmB"]));
        replica.on_commit(&mut log, commit(3, "QmC")).unwrap();

        assert_eq!(log.current_version(), 3);
        let ids: Vec<_> = log.entries().iter().map(|e| e.content_id.as_str()).collect();
        assert_eq!(ids, vec!["QmA", "QmB", "QmC"]);
        assert!(replica.pending_versions().is_empty());
    }

    #[test]
    fn test_commit_discards_older_pending() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());

        replica.on_propose(&log, propose(1, &[]));
        replica.on_propose(&log, propose(2, &["QmX"]));
        replica.on_commit(&mut log, commit(1, "QmA")).unwrap();

        assert_eq!(replica.pending_versions(), vec![2]);
    }

    #[test]
    fn test_malformed_candidate_is_not_acked() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());
        for (v, cid) in [(1, "QmA"), (2, "QmB")] {
            replica.on_commit(&mut log, commit(v, cid)).unwrap();
        }

        // Too short for version 3
        assert!(replica.on_propose(&log, propose(3, &[])).is_none());

        // Right length, but not dense
        let skewed = Propose {
            version: 3,
            candidate_state: vec![ContentRef::new(1, "QmA"), ContentRef::new(5, "QmB")],
        };
        assert!(replica.on_propose(&log, skewed).is_none());
        assert!(replica.pending_versions().is_empty());
    }

    #[test]
    fn test_bad_candidate_never_shrinks_committed_log() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());
        for (v, cid) in [(1, "QmA"), (2, "QmB")] {
            replica.on_commit(&mut log, commit(v, cid)).unwrap();
        }
        let before = log.entries().to_vec();

        assert!(replica.on_propose(&log, propose(3, &[])).is_none());
        assert_eq!(
            replica.on_commit(&mut log, commit(3, "QmC")).unwrap(),
            CommitOutcome::Applied { version: 3 }
        );
        assert_eq!(log.current_version(), 3);
        assert_eq!(&log.entries()[..2], before.as_slice());
    }

    #[test]
    fn test_failed_append_after_rebase_keeps_log() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());
        replica.on_commit(&mut log, commit(1, "QmA")).unwrap();
        let before = log.entries().to_vec();

        // Pending entry planted directly: it skips the proposal checks
        replica
            .pending
            .insert(3, vec![ContentRef::new(1, "QmZ")]);
        assert!(replica.on_commit(&mut log, commit(3, "QmC")).is_err());
        assert_eq!(log.entries(), before.as_slice());
    }

    #[test]
    fn test_rebase_replaces_divergent_prefix() {
        let mut log = VersionedLog::new();
        let mut replica = Replica::new("p1".to_string());
        replica.on_commit(&mut log, commit(1, "QmLocal")).unwrap();

        replica.on_propose(&log, propose(2, &["QmLeader"])).unwrap();
        replica.on_commit(&mut log, commit(2, "QmB")).unwrap();

        let ids: Vec<_> = log.entries().iter().map(|e| e.content_id.as_str()).collect();
        assert_eq!(ids, vec!["QmLeader", "QmB"]);
    }
}
