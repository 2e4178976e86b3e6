//! Event-driven synchronization of the registry with the metadata store.

pub mod consumer;
pub mod dead_letter;
pub mod handler;
pub mod retry;

pub use consumer::{ConsumerHandle, ConsumerStats, SyncConsumer};
pub use dead_letter::{BusDeadLetterSink, DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
pub use handler::{ProcessOutcome, SyncHandler};
pub use retry::{RetryOutcome, with_retry};
