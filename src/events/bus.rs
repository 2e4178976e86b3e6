use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    /// Partition key; metadata events use the entity name.
    pub key: String,
    pub payload: Vec<u8>,
    pub partition: usize,
    pub offset: u64,
}

/// Ordered stream of one partition for one consumer group.
#[derive(Debug)]
pub struct PartitionStream {
    pub partition: usize,
    pub receiver: mpsc::UnboundedReceiver<BusMessage>,
}

/// Partitioned, at-least-once publish/subscribe transport.
///
/// Messages sharing a key land on the same partition and are delivered in
/// publish order. Anything after a group's last committed offset may be
/// delivered again when the group subscribes anew.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Returns the offset assigned within the key's partition.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<u64>;

    async fn subscribe(&self, group: &str, topics: &[&str]) -> Result<Vec<PartitionStream>>;

    /// Mark everything up to and including `offset` as processed by `group`.
    async fn commit(&self, group: &str, partition: usize, offset: u64) -> Result<()>;
}
