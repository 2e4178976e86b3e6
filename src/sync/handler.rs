//! Applies one bus message to the registry.

use super::dead_letter::{DeadLetter, DeadLetterSink};
use super::retry::with_retry;
use crate::config::RetryPolicy;
use crate::core::Result;
use crate::events::{BusMessage, MetadataEvent};
use crate::registry::{ApplyOutcome, EntityRegistry, PurgeTicket};
use std::sync::Arc;
use tracing::{Level, event};

/// What happened to a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied(ApplyOutcome),
    DeadLettered,
}

/// Decodes metadata events and dispatches them to the registry.
///
/// Undecodable payloads are dead-lettered at once. Registry failures are
/// retried per policy when retryable, then dead-lettered. `process` never
/// returns an error so one bad message cannot stall its partition.
pub struct SyncHandler {
    registry: Arc<EntityRegistry>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
}

impl SyncHandler {
    pub fn new(registry: Arc<EntityRegistry>, dead_letters: Arc<dyn DeadLetterSink>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            dead_letters,
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub async fn process(&self, message: &BusMessage) -> ProcessOutcome {
        let (outcome, _purges) = self.process_tracked(message).await;
        outcome
    }

    /// `process`, plus the field purges the message queued. Until those
    /// resolve the message must not be committed.
    pub async fn process_tracked(&self, message: &BusMessage) -> (ProcessOutcome, Vec<PurgeTicket>) {
        let decoded = match MetadataEvent::decode(&message.topic, &message.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                event!(
                    Level::ERROR,
                    topic = %message.topic,
                    key = %message.key,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "undecodable metadata event"
                );
                self.dead_letter(DeadLetter::from_message(message, err, 1)).await;
                return (ProcessOutcome::DeadLettered, Vec::new());
            }
        };

        let outcome = with_retry(&self.retry, message.topic.as_str(), |_| self.apply_tracked(&decoded)).await;
        match outcome.result {
            Ok((applied, purges)) => (ProcessOutcome::Applied(applied), purges),
            Err(err) => {
                event!(
                    Level::ERROR,
                    topic = %message.topic,
                    key = %message.key,
                    partition = message.partition,
                    offset = message.offset,
                    attempts = outcome.attempts,
                    error = %err,
                    "registry update failed"
                );
                self.dead_letter(DeadLetter::from_message(message, err, outcome.attempts))
                    .await;
                (ProcessOutcome::DeadLettered, Vec::new())
            }
        }
    }

    /// Route a decoded event to its registry operation.
    pub async fn apply(&self, decoded: &MetadataEvent) -> Result<ApplyOutcome> {
        let (outcome, _purges) = self.apply_tracked(decoded).await?;
        Ok(outcome)
    }

    async fn apply_tracked(&self, decoded: &MetadataEvent) -> Result<(ApplyOutcome, Vec<PurgeTicket>)> {
        let outcome = match decoded {
            MetadataEvent::EntityCreated(p) => self.registry.apply_created(p).await?,
            MetadataEvent::EntityUpdated(p) => self.registry.apply_updated(p).await?,
            MetadataEvent::EntityDeleted(p) => self.registry.apply_deleted(p).await?,
            MetadataEvent::EntityMigrated(p) => self.registry.apply_migrated(p).await?,
            MetadataEvent::FieldCreated(p) => self.registry.apply_field_added(p).await?,
            MetadataEvent::FieldUpdated(p) => self.registry.apply_field_updated(p).await?,
            MetadataEvent::FieldDeleted(p) => return self.registry.apply_field_deleted_tracked(p).await,
        };
        Ok((outcome, Vec::new()))
    }

    async fn dead_letter(&self, letter: DeadLetter) {
        let (topic, offset) = (letter.topic.clone(), letter.offset);
        if let Err(err) = self.dead_letters.send(letter).await {
            event!(
                Level::ERROR,
                topic = %topic,
                offset,
                error = %err,
                "dead letter could not be stored, message is lost"
            );
        }
    }
}
