//! Background sweeps that unset a deleted field on every document.
//!
//! A sweep walks the collection in id order, one bounded batch at a time, and
//! never holds a registry lock. Re-running a sweep is harmless: documents that
//! no longer carry the key are simply counted as scanned.

use crate::config::{PurgePolicy, RetryPolicy};
use crate::core::{Result, SyncError};
use crate::storage::DocumentStore;
use crate::sync::retry::with_retry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Notify, Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Level, debug, event};

/// Totals for one finished sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub entity: String,
    pub collection: String,
    pub path: String,
    pub batches: usize,
    pub scanned: usize,
    pub modified: usize,
}

struct PurgeJob {
    entity: String,
    collection: String,
    path: String,
    reply: oneshot::Sender<Result<PurgeReport>>,
}

/// Completion handle for a submitted sweep.
#[derive(Debug)]
pub struct PurgeTicket {
    receiver: oneshot::Receiver<Result<PurgeReport>>,
}

impl PurgeTicket {
    pub async fn wait(self) -> Result<PurgeReport> {
        self.receiver
            .await
            .map_err(|_| SyncError::Shutdown("purge worker dropped the job".to_string()))?
    }
}

struct PurgeShared {
    sender: StdMutex<Option<mpsc::UnboundedSender<PurgeJob>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    pending: AtomicUsize,
    /// Unfinished jobs per (collection, path).
    active: StdMutex<HashMap<(String, String), usize>>,
    idle: Notify,
}

impl PurgeShared {
    fn track(&self, collection: &str, path: &str) {
        if let Ok(mut active) = self.active.lock() {
            *active.entry((collection.to_string(), path.to_string())).or_insert(0) += 1;
        }
    }

    fn release(&self, collection: &str, path: &str) {
        if let Ok(mut active) = self.active.lock() {
            let key = (collection.to_string(), path.to_string());
            if let Some(count) = active.get_mut(&key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    active.remove(&key);
                }
            }
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

/// Queue + runner for field purges.
#[derive(Clone)]
pub struct PurgeWorker {
    shared: Arc<PurgeShared>,
}

impl PurgeWorker {
    /// Start the runner on the current tokio runtime.
    pub fn spawn(store: Arc<dyn DocumentStore>, policy: PurgePolicy, retry: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(PurgeShared {
            sender: StdMutex::new(Some(sender)),
            task: Mutex::new(None),
            pending: AtomicUsize::new(0),
            active: StdMutex::new(HashMap::new()),
            idle: Notify::new(),
        });

        let task = tokio::spawn(run(store, policy, retry, receiver, Arc::clone(&shared)));
        if let Ok(mut slot) = shared.task.try_lock() {
            *slot = Some(task);
        }

        Self { shared }
    }

    pub fn submit(&self, entity: &str, collection: &str, path: &str) -> Result<PurgeTicket> {
        let (reply, receiver) = oneshot::channel();
        let job = PurgeJob {
            entity: entity.to_string(),
            collection: collection.to_string(),
            path: path.to_string(),
            reply,
        };

        let guard = self.shared.sender.lock()?;
        let sender = guard
            .as_ref()
            .ok_or_else(|| SyncError::Shutdown("purge worker is stopped".to_string()))?;

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.track(collection, path);
        if sender.send(job).is_err() {
            self.shared.release(collection, path);
            return Err(SyncError::Shutdown("purge worker is stopped".to_string()));
        }

        debug!(entity, collection, path, "purge job queued");
        Ok(PurgeTicket { receiver })
    }

    /// Jobs accepted but not finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Jobs for `path` in `collection` accepted but not finished.
    pub fn pending_for(&self, collection: &str, path: &str) -> usize {
        self.shared
            .active
            .lock()
            .map(|active| {
                active
                    .get(&(collection.to_string(), path.to_string()))
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Resolve once no job for `path` in `collection` is queued or running.
    pub async fn wait_for(&self, collection: &str, path: &str) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending_for(collection, path) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Resolve once every accepted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs and wait for the accepted ones to finish.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.shared.sender.lock() {
            sender.take();
        }
        let task = self.shared.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                event!(Level::ERROR, error = %err, "purge worker task failed");
            }
        }
    }
}

async fn run(
    store: Arc<dyn DocumentStore>,
    policy: PurgePolicy,
    retry: RetryPolicy,
    mut receiver: mpsc::UnboundedReceiver<PurgeJob>,
    shared: Arc<PurgeShared>,
) {
    let limiter = Arc::new(Semaphore::new(policy.max_concurrent.max(1)));
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
            shared.release(&job.collection, &job.path);
            break;
        };
        let store = Arc::clone(&store);
        let retry = retry.clone();
        let shared = Arc::clone(&shared);
        let batch_size = policy.batch_size;

        running.spawn(async move {
            let _permit = permit;
            let PurgeJob {
                entity,
                collection,
                path,
                reply,
            } = job;

            let result = sweep(store.as_ref(), &entity, &collection, &path, batch_size, &retry).await;
            match &result {
                Ok(report) => event!(
                    Level::INFO,
                    entity = %report.entity,
                    collection = %report.collection,
                    path = %report.path,
                    batches = report.batches,
                    modified = report.modified,
                    "field purge finished"
                ),
                Err(err) => event!(
                    Level::ERROR,
                    entity = %entity,
                    collection = %collection,
                    path = %path,
                    error = %err,
                    "field purge failed"
                ),
            }

            let _ = reply.send(result);
            shared.release(&collection, &path);
        });

        while let Some(joined) = running.try_join_next() {
            if let Err(err) = joined {
                event!(Level::ERROR, error = %err, "purge job panicked");
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(err) = joined {
            event!(Level::ERROR, error = %err, "purge job panicked");
        }
    }
    debug!("purge worker drained");
}

async fn sweep(
    store: &dyn DocumentStore,
    entity: &str,
    collection: &str,
    path: &str,
    batch_size: usize,
    retry: &RetryPolicy,
) -> Result<PurgeReport> {
    let mut report = PurgeReport {
        entity: entity.to_string(),
        collection: collection.to_string(),
        path: path.to_string(),
        ..Default::default()
    };
    let mut cursor: Option<String> = None;

    loop {
        let after = cursor.as_deref();
        let outcome = with_retry(retry, "purge batch", |_| {
            store.unset_field_batch(collection, path, after, batch_size)
        })
        .await;

        let batch = match outcome.result {
            Ok(batch) => batch,
            Err(SyncError::NotFound(_)) => {
                debug!(entity, collection, "collection gone, purge stops");
                break;
            }
            Err(err) => return Err(err),
        };

        report.batches += 1;
        report.scanned += batch.scanned;
        report.modified += batch.modified;

        match batch.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
        tokio::task::yield_now().await;
    }

    Ok(report)
}
