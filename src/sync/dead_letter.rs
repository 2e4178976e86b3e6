//! Where messages go when they cannot be applied.

use crate::core::Result;
use crate::events::{BusMessage, EventBus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

/// A message that was given up on, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub topic: String,
    pub key: String,
    pub partition: usize,
    pub offset: u64,
    /// Original body, lossily decoded as UTF-8.
    pub payload: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_message(message: &BusMessage, error: impl ToString, attempts: u32) -> Self {
        Self {
            topic: message.topic.clone(),
            key: message.key.clone(),
            partition: message.partition,
            offset: message.offset,
            payload: String::from_utf8_lossy(&message.payload).into_owned(),
            error: error.to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: DeadLetter) -> Result<()>;
}

/// Keeps dead letters in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.letters.lock()?.clone())
    }

    pub fn len(&self) -> usize {
        self.letters.lock().map(|letters| letters.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        self.letters.lock()?.push(letter);
        Ok(())
    }
}

/// Publishes dead letters as JSON onto a dedicated topic, keyed like the
/// original message.
pub struct BusDeadLetterSink {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl BusDeadLetterSink {
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for BusDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        let body = serde_json::to_vec(&letter)?;
        let offset = self.bus.publish(&self.topic, &letter.key, body).await?;
        event!(
            Level::INFO,
            topic = %self.topic,
            source_topic = %letter.topic,
            key = %letter.key,
            offset,
            "dead letter published"
        );
        Ok(())
    }
}
