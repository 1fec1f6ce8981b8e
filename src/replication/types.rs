use serde::{Deserialize, Serialize};

/// Type alias for committed version numbers (0 means nothing committed yet)
pub type Version = u64;

/// Participant identifier
pub type PeerId = String;

/// Identifier returned by the blob store for a stored payload
pub type ContentId = String;

/// Output of the checksum fold, always below `CHECKSUM_MODULUS`
pub type Checksum = u32;

/// Feature vector attached to a committed entry
pub type Annotation = Vec<f32>;

/// A single committed entry in the replicated vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Position in the vector, starting at 1
    pub version: Version,
    /// Where the payload lives in the blob store
    #[serde(alias = "cid")]
    pub content_id: ContentId,
    /// Optional embedding of the payload
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "embedding")]
    pub annotation: Option<Annotation>,
}

impl Entry {
    pub fn new(version: Version, content_id: ContentId, annotation: Option<Annotation>) -> Self {
        Self {
            version,
            content_id,
            annotation,
        }
    }

    pub fn to_ref(&self) -> ContentRef {
        ContentRef {
            version: self.version,
            content_id: self.content_id.clone(),
        }
    }
}

/// Entry reference as carried in a proposal's candidate state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    pub version: Version,
    #[serde(alias = "cid")]
    pub content_id: ContentId,
}

impl ContentRef {
    pub fn new(version: Version, content_id: impl Into<ContentId>) -> Self {
        Self {
            version,
            content_id: content_id.into(),
        }
    }
}

/// Outcome of a successful submission
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Committed {
    pub version: Version,
    pub content_id: ContentId,
}
