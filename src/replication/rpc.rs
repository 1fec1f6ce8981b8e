use serde::{Deserialize, Serialize};

use super::types::{Annotation, Checksum, ContentId, ContentRef, PeerId, Version};
use crate::util::errors::{ReplicationError, Result};

// Bound on a single topic message, enforced before parsing
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Presence beacon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub peer_id: PeerId,
}

/// Leader proposes appending to its committed vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Propose {
    pub version: Version,
    #[serde(default, alias = "saveddata")]
    pub candidate_state: Vec<ContentRef>,
}

/// A peer's checksum over a proposal's candidate state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub version: Version,
    pub peer_id: PeerId,
    pub hash: Checksum,
}

/// Leader finalized `version`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub version: Version,
    #[serde(alias = "cid")]
    pub content_id: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "embedding")]
    pub annotation: Option<Annotation>,
}

/// Everything that travels over the shared topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WireMessage {
    Hello(Hello),
    Propose(Propose),
    Ack(Ack),
    Commit(Commit),
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello(_) => "hello",
            WireMessage::Propose(_) => "propose",
            WireMessage::Ack(_) => "ack",
            WireMessage::Commit(_) => "commit",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ReplicationError::MalformedMessage(format!(
                "encoded message size {} exceeds maximum {}",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Parse a topic message. `type` is accepted in place of `action`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ReplicationError::MalformedMessage(format!(
                "message size {} exceeds maximum {}",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let mut value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ReplicationError::MalformedMessage(e.to_string()))?;

        if let Some(obj) = value.as_object_mut() {
            if !obj.contains_key("action") {
                if let Some(kind) = obj.remove("type") {
                    obj.insert("action".to_string(), kind);
                }
            }
        }

        serde_json::from_value(value).map_err(|e| ReplicationError::MalformedMessage(e.to_string()))
    }
}
