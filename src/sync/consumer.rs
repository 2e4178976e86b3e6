//! Partition workers feeding the sync handler.

use super::handler::{ProcessOutcome, SyncHandler};
use crate::core::{Result, SyncError};
use crate::events::{EventBus, PartitionStream, Topic};
use crate::registry::PurgeTicket;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Level, debug, event};

/// Subscribes a consumer group to the metadata topics.
pub struct SyncConsumer {
    bus: Arc<dyn EventBus>,
    handler: Arc<SyncHandler>,
    group: String,
}

/// Counters shared by all partition workers.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub processed: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl ConsumerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::SeqCst)
    }
}

/// Running consumer. Dropping it without `shutdown` leaves workers running
/// until their streams close.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    handler: Arc<SyncHandler>,
    stats: Arc<ConsumerStats>,
}

impl SyncConsumer {
    pub fn new(bus: Arc<dyn EventBus>, handler: Arc<SyncHandler>, group: impl Into<String>) -> Self {
        Self {
            bus,
            handler,
            group: group.into(),
        }
    }

    /// Subscribe and spawn one worker per partition.
    pub async fn start(self) -> Result<ConsumerHandle> {
        let topics: Vec<&str> = Topic::METADATA.iter().map(Topic::as_str).collect();
        let streams = self.bus.subscribe(&self.group, &topics).await?;
        let (shutdown, watcher) = watch::channel(false);
        let stats = Arc::new(ConsumerStats::default());

        let workers = streams
            .into_iter()
            .map(|stream| {
                tokio::spawn(run_partition(
                    stream,
                    Arc::clone(&self.bus),
                    Arc::clone(&self.handler),
                    self.group.clone(),
                    watcher.clone(),
                    Arc::clone(&stats),
                ))
            })
            .collect::<Vec<_>>();

        event!(
            Level::INFO,
            group = %self.group,
            partitions = workers.len(),
            "sync consumer started"
        );

        Ok(ConsumerHandle {
            shutdown,
            workers,
            handler: self.handler,
            stats,
        })
    }
}

impl ConsumerHandle {
    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Stop taking new messages, let in-flight ones and their field purges
    /// finish, then stop the purge worker. Messages whose purge failed stay
    /// uncommitted and are redelivered on the next start.
    pub async fn shutdown(self) -> Result<()> {
        // Receivers only go away when every worker already exited.
        let _ = self.shutdown.send(true);

        let mut failed = 0;
        for joined in futures::future::join_all(self.workers).await {
            if let Err(err) = joined {
                failed += 1;
                event!(Level::ERROR, error = %err, "partition worker failed");
            }
        }

        self.handler.registry().shutdown().await;
        event!(
            Level::INFO,
            processed = self.stats.processed(),
            dead_lettered = self.stats.dead_lettered(),
            "sync consumer stopped"
        );

        if failed > 0 {
            return Err(SyncError::Shutdown(format!("{} partition worker(s) failed", failed)));
        }
        Ok(())
    }
}

async fn run_partition(
    mut stream: PartitionStream,
    bus: Arc<dyn EventBus>,
    handler: Arc<SyncHandler>,
    group: String,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<ConsumerStats>,
) {
    let partition = stream.partition;
    let mut commits = CommitTracker::default();
    let (settled_tx, mut settled_rx) = mpsc::unbounded_channel::<(u64, bool)>();
    debug!(partition, "partition worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let message = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            Some((offset, finished)) = settled_rx.recv() => {
                commits.resolve(offset, finished);
                commit(bus.as_ref(), &group, partition, commits.watermark()).await;
                continue;
            }
            message = stream.receiver.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let (outcome, purges) = handler.process_tracked(&message).await;
        stats.processed.fetch_add(1, Ordering::SeqCst);
        if outcome == ProcessOutcome::DeadLettered {
            stats.dead_lettered.fetch_add(1, Ordering::SeqCst);
        }

        if purges.is_empty() {
            commits.processed(message.offset);
        } else {
            commits.hold(message.offset);
            tokio::spawn(await_purges(purges, message.offset, partition, settled_tx.clone()));
        }
        commit(bus.as_ref(), &group, partition, commits.watermark()).await;
    }

    // In-flight purges belong to messages already taken off the stream.
    while commits.waiting() > 0 {
        let Some((offset, finished)) = settled_rx.recv().await else {
            break;
        };
        commits.resolve(offset, finished);
    }
    commit(bus.as_ref(), &group, partition, commits.watermark()).await;

    if commits.held() > 0 {
        event!(
            Level::WARN,
            partition,
            held = commits.held(),
            "stopping with failed field purges, their events will be redelivered"
        );
    }
    debug!(partition, "partition worker stopped");
}

/// Committable position of one partition. An offset whose purge has not
/// finished holds back every offset after it.
#[derive(Debug, Default)]
struct CommitTracker {
    last_processed: Option<u64>,
    held: BTreeSet<u64>,
    waiting: usize,
}

impl CommitTracker {
    fn processed(&mut self, offset: u64) {
        self.last_processed = Some(self.last_processed.map_or(offset, |last| last.max(offset)));
    }

    fn hold(&mut self, offset: u64) {
        self.held.insert(offset);
        self.waiting += 1;
        self.processed(offset);
    }

    /// A failed purge keeps its offset held until the next start.
    fn resolve(&mut self, offset: u64, finished: bool) {
        self.waiting = self.waiting.saturating_sub(1);
        if finished {
            self.held.remove(&offset);
        }
    }

    fn held(&self) -> usize {
        self.held.len()
    }

    fn waiting(&self) -> usize {
        self.waiting
    }

    /// Highest offset that can be committed, if any.
    fn watermark(&self) -> Option<u64> {
        match self.held.first() {
            Some(&first) => first.checked_sub(1),
            None => self.last_processed,
        }
    }
}

async fn await_purges(
    purges: Vec<PurgeTicket>,
    offset: u64,
    partition: usize,
    settled: mpsc::UnboundedSender<(u64, bool)>,
) {
    let mut finished = true;
    for ticket in purges {
        if let Err(err) = ticket.wait().await {
            event!(
                Level::WARN,
                partition,
                offset,
                error = %err,
                "field purge did not finish, offset stays uncommitted"
            );
            finished = false;
        }
    }
    let _ = settled.send((offset, finished));
}

async fn commit(bus: &dyn EventBus, group: &str, partition: usize, offset: Option<u64>) {
    let Some(offset) = offset else {
        return;
    };
    if let Err(err) = bus.commit(group, partition, offset).await {
        event!(
            Level::WARN,
            partition,
            offset,
            error = %err,
            "offset commit failed, message may be redelivered"
        );
    }
}
