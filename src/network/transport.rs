use async_trait::async_trait;

use crate::util::errors::Result;

/// A raw topic message as delivered by the transport
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Nominal sender, if the transport knows it
    pub from: Option<String>,
    pub data: Vec<u8>,
}

/// Publish side of the shared topic.
///
/// Inbound messages are handed out as an `mpsc::Receiver<Inbound>` when the
/// transport is created. Delivery is at-least-once with no ordering across
/// peers, and a node never receives its own publications.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, data: Vec<u8>) -> Result<()>;

    /// Identity the transport assigned to this node, if any
    fn local_id(&self) -> Option<String> {
        None
    }
}
