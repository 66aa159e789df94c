//! In-process publish/subscribe (spec.md §6), realized on
//! `tokio::sync::broadcast` the way the teacher's `networking` module
//! sketched a `NetworkManager`, but scoped to exactly the topic set this
//! system needs rather than a generic peer-to-peer transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

pub const TOPIC_RAW_TX_ADDED: &str = "raw_tx:added";
pub const TOPIC_TX_PROCESSING: &str = "tx:processing";
pub const TOPIC_TX_FINALIZED: &str = "tx:finalized";
pub const TOPIC_TX_RESET: &str = "tx:reset";
pub const TOPIC_RAW_TX_EXPIRED: &str = "raw_tx:expired";
pub const TOPIC_BLOCK_ADDED: &str = "block:added";
pub const TOPIC_FACE_COMPLETE: &str = "face:complete";
pub const TOPIC_CUBE_COMPLETE: &str = "cube:complete";
pub const TOPIC_SUPERCUBE_COMPLETE: &str = "supercube:complete";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTxAdded {
    pub leader: String,
    pub raw_tx_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLifecycle {
    pub leader: String,
    pub raw_tx_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockAdded {
    pub block_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceComplete {
    pub cube_id: String,
    pub face_index: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeComplete {
    pub cube_id: String,
    pub level: u32,
}

/// External collaborator (spec.md §6): topic-scoped pub/sub with
/// single-threaded in-order dispatch per topic.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>);
    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>>;
}

const CHANNEL_CAPACITY: usize = 1024;

/// Default real implementation: one `tokio::sync::broadcast` channel per
/// topic, created lazily on first publish or subscribe.
#[derive(Default)]
pub struct InProcessBroadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl InProcessBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.channels.read().await.get(topic) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Broadcaster for InProcessBroadcaster {
    async fn publish(&self, topic: &str, payload: Vec<u8>) {
        let sender = self.sender_for(topic).await;
        // A publish with no subscribers is not an error — matches the
        // teacher's event-emitter idiom of "fire and forget".
        let _ = sender.send(payload);
    }

    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender_for(topic).await.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let bus = InProcessBroadcaster::new();
        let mut rx = bus.subscribe(TOPIC_RAW_TX_ADDED).await;
        bus.publish(TOPIC_RAW_TX_ADDED, b"hello".to_vec()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InProcessBroadcaster::new();
        let mut added_rx = bus.subscribe(TOPIC_RAW_TX_ADDED).await;
        let mut finalized_rx = bus.subscribe(TOPIC_TX_FINALIZED).await;
        bus.publish(TOPIC_RAW_TX_ADDED, b"only-added".to_vec()).await;
        assert_eq!(added_rx.recv().await.unwrap(), b"only-added");
        assert!(finalized_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = InProcessBroadcaster::new();
        bus.publish(TOPIC_BLOCK_ADDED, b"noop".to_vec()).await;
    }
}
