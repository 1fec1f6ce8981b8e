//! In-process topic shared by several nodes, used by the test suites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::transport::{Inbound, Transport};
use crate::util::errors::{ReplicationError, Result};

const HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    from: String,
    data: Vec<u8>,
}

/// A topic every joined endpoint publishes to and receives from
#[derive(Debug, Clone)]
pub struct MemoryHub {
    tx: broadcast::Sender<Envelope>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Join the topic as `id`. Must be called inside a tokio runtime.
    pub fn join(&self, id: impl Into<String>) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        let id = id.into();
        let mut rx = self.tx.subscribe();
        let (inbound_tx, inbound_rx) = mpsc::channel(HUB_CAPACITY);
        let muted = Arc::new(AtomicBool::new(false));

        let me = id.clone();
        let muted_rx = muted.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.from == me || muted_rx.load(Ordering::Relaxed) {
                            continue;
                        }
                        let inbound = Inbound {
                            from: Some(envelope.from),
                            data: envelope.data,
                        };
                        if inbound_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Endpoint {} lagged, {} messages lost", me, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let transport = MemoryTransport {
            id,
            tx: self.tx.clone(),
            muted,
        };
        (transport, inbound_rx)
    }
}

/// One node's handle on a `MemoryHub`
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    id: String,
    tx: broadcast::Sender<Envelope>,
    muted: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Cut this endpoint off: it neither sends nor receives until unmuted.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, data: Vec<u8>) -> Result<()> {
        if self.muted.load(Ordering::Relaxed) {
            return Ok(());
        }

        let envelope = Envelope {
            from: self.id.clone(),
            data,
        };
        // No subscribers is not an error for a pub/sub topic
        if self.tx.send(envelope).is_err() {
            tracing::debug!("Endpoint {} published with no subscribers", self.id);
        }
        Ok(())
    }

    fn local_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

/// Transport whose every publish fails, for exercising error paths
#[derive(Debug, Default, Clone)]
pub struct DeadTransport;

#[async_trait]
impl Transport for DeadTransport {
    async fn publish(&self, _data: Vec<u8>) -> Result<()> {
        Err(ReplicationError::Transport("transport is down".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_to_others_only() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.join("a");
        let (_b, mut b_rx) = hub.join("b");

        a.publish(b"hi".to_vec()).await.unwrap();

        let got = b_rx.recv().await.unwrap();
        assert_eq!(got.from.as_deref(), Some("a"));
        assert_eq!(got.data, b"hi");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_muted_endpoint_is_silent() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = hub.join("a");
        let (b, mut b_rx) = hub.join("b");

        a.set_muted(true);
        a.publish(b"lost".to_vec()).await.unwrap();
        a.set_muted(false);
        b.publish(b"ignored".to_vec()).await.unwrap();
        a.publish(b"kept".to_vec()).await.unwrap();

        let got = b_rx.recv().await.unwrap();
        assert_eq!(got.data, b"kept");
    }
}
