use super::bus::{BusMessage, EventBus, PartitionStream};
use crate::core::{Result, SyncError};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

struct GroupSubscription {
    topics: HashSet<String>,
    sender: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct Partition {
    log: Vec<BusMessage>,
    /// Next offset each group expects after its last commit.
    committed: HashMap<String, u64>,
    subscribers: HashMap<String, GroupSubscription>,
}

/// In-process event bus with a retained log per partition.
///
/// Subscribing replays every retained message past the group's committed
/// offset, which is how redelivery after a restart is modelled.
pub struct InMemoryEventBus {
    partitions: Vec<Mutex<Partition>>,
}

impl InMemoryEventBus {
    pub fn new(partitions: usize) -> Self {
        let count = partitions.max(1);
        Self {
            partitions: (0..count).map(|_| Mutex::new(Partition::default())).collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    /// Retained messages of `topic` across all partitions, in partition order.
    pub fn messages(&self, topic: &str) -> Result<Vec<BusMessage>> {
        let mut out = Vec::new();
        for partition in &self.partitions {
            let guard = partition.lock()?;
            out.extend(guard.log.iter().filter(|m| m.topic == topic).cloned());
        }
        Ok(out)
    }

    /// Committed position of `group` on `partition` (next offset to process).
    pub fn committed_offset(&self, group: &str, partition: usize) -> Result<u64> {
        let guard = self.partition(partition)?.lock()?;
        Ok(guard.committed.get(group).copied().unwrap_or(0))
    }

    /// Messages on `group`'s topics published but not yet committed by it.
    /// Without an active subscription every retained message counts.
    pub fn lag(&self, group: &str) -> Result<u64> {
        let mut lag = 0;
        for partition in &self.partitions {
            let guard = partition.lock()?;
            let committed = guard.committed.get(group).copied().unwrap_or(0) as usize;
            let topics = guard.subscribers.get(group).map(|sub| &sub.topics);
            lag += guard
                .log
                .iter()
                .skip(committed)
                .filter(|m| topics.is_none_or(|topics| topics.contains(&m.topic)))
                .count() as u64;
        }
        Ok(lag)
    }

    fn partition(&self, index: usize) -> Result<&Mutex<Partition>> {
        self.partitions
            .get(index)
            .ok_or_else(|| SyncError::NotFound(format!("Partition {}", index)))
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<u64> {
        let index = self.partition_for(key);
        let mut guard = self.partition(index)?.lock()?;

        let message = BusMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            partition: index,
            offset: guard.log.len() as u64,
        };
        guard.log.push(message.clone());

        // Groups whose consumer went away keep their backlog in the log.
        guard.subscribers.retain(|_, sub| {
            if !sub.topics.contains(&message.topic) {
                return true;
            }
            sub.sender.send(message.clone()).is_ok()
        });

        debug!(topic, key, partition = index, offset = message.offset, "message published");
        Ok(message.offset)
    }

    async fn subscribe(&self, group: &str, topics: &[&str]) -> Result<Vec<PartitionStream>> {
        let topics: HashSet<String> = topics.iter().map(|t| t.to_string()).collect();
        let mut streams = Vec::with_capacity(self.partitions.len());

        for (index, partition) in self.partitions.iter().enumerate() {
            let (sender, receiver) = mpsc::unbounded_channel();
            let mut guard = partition.lock()?;
            let from = guard.committed.get(group).copied().unwrap_or(0) as usize;

            for message in guard.log.iter().skip(from) {
                if topics.contains(&message.topic) {
                    // Receiver is held locally, so this cannot fail.
                    let _ = sender.send(message.clone());
                }
            }

            guard.subscribers.insert(
                group.to_string(),
                GroupSubscription {
                    topics: topics.clone(),
                    sender,
                },
            );
            streams.push(PartitionStream {
                partition: index,
                receiver,
            });
        }

        Ok(streams)
    }

    async fn commit(&self, group: &str, partition: usize, offset: u64) -> Result<()> {
        let mut guard = self.partition(partition)?.lock()?;
        let next = offset + 1;
        let entry = guard.committed.entry(group.to_string()).or_insert(0);
        if next > *entry {
            *entry = next;
        }
        Ok(())
    }
}
