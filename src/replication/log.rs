use std::sync::{Mutex, MutexGuard};

use super::checksum::checksum_entries;
use super::types::{Checksum, ContentRef, Entry, Version};
use crate::util::errors::{ReplicationError, Result};

/// In-memory, append-only vector of committed entries.
///
/// Versions are dense: the entry at position `i` always has version `i + 1`.
#[derive(Debug, Default, Clone)]
pub struct VersionedLog {
    entries: Vec<Entry>,
}

impl VersionedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest committed version, 0 when empty
    pub fn current_version(&self) -> Version {
        self.entries.last().map(|e| e.version).unwrap_or(0)
    }

    pub fn append(&mut self, entry: Entry) -> Result<()> {
        let expected = self.current_version() + 1;
        if entry.version != expected {
            return Err(ReplicationError::LogInconsistency {
                expected,
                got: entry.version,
            });
        }

        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, version: Version) -> Option<&Entry> {
        if version == 0 {
            return None;
        }
        self.entries.get((version - 1) as usize)
    }

    /// The committed view as a proposal carries it
    pub fn content_refs(&self) -> Vec<ContentRef> {
        self.entries.iter().map(Entry::to_ref).collect()
    }

    pub fn checksum(&self) -> Checksum {
        checksum_entries(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the log with the leader's committed view.
    ///
    /// Annotations survive for positions whose content id is unchanged.
    /// Refs must be dense starting at version 1.
    pub fn rebase(&mut self, refs: &[ContentRef]) -> Result<()> {
        let mut rebased = Vec::with_capacity(refs.len());
        for (i, r) in refs.iter().enumerate() {
            let expected = i as Version + 1;
            if r.version != expected {
                return Err(ReplicationError::LogInconsistency {
                    expected,
                    got: r.version,
                });
            }

            let annotation = self
                .get(r.version)
                .filter(|local| local.content_id == r.content_id)
                .and_then(|local| local.annotation.clone());
            rebased.push(Entry::new(r.version, r.content_id.clone(), annotation));
        }

        if rebased.len() < self.entries.len() {
            tracing::warn!(
                "Rebase shrinks local log from {} to {} entries",
                self.entries.len(),
                rebased.len()
            );
        }

        self.entries = rebased;
        Ok(())
    }
}

/// `VersionedLog` shared between the node actor and the coordinator
#[derive(Debug, Default)]
pub struct SharedLog {
    inner: Mutex<VersionedLog>,
}

impl SharedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, VersionedLog> {
        // Mutations are a single push or a whole-vector swap, so a poisoned
        // log is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_version(&self) -> Version {
        self.lock().current_version()
    }

    pub fn snapshot(&self) -> Vec<Entry> {
        self.lock().entries().to_vec()
    }
}
