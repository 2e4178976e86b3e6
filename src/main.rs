//! Replays newline-delimited metadata events through the sync consumer and
//! prints the resulting registry.
//!
//! Each input line is `{"topic": "...", "key": "...", "payload": {...}}`.
//! Without `key`, entity lines are keyed by the payload's `name` and field
//! lines by the name of the entity their `entityId` points at.

use anyhow::{Context, Result, bail};
use clap::Parser;
use entity_sync::{
    BusDeadLetterSink, DeadLetter, EntityRegistry, EventBus, InMemoryDocumentStore,
    InMemoryEventBus, RenamePolicy, SyncConfig, SyncConsumer, SyncHandler, Topic,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "entity-sync", about = "Replay metadata events into an entity registry")]
struct Args {
    /// NDJSON file to read instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Partition count of the in-memory bus
    #[arg(long)]
    partitions: Option<usize>,

    /// Consumer group name
    #[arg(long)]
    group: Option<String>,

    /// `defer` or `reject_after_first_write`
    #[arg(long)]
    rename_policy: Option<String>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    topic: String,
    #[serde(default)]
    key: Option<String>,
    payload: JsonValue,
}

impl ReplayRecord {
    fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(JsonValue::as_str)
    }
}

/// Partition keys for input lines. Every event of one entity must share
/// the entity's name as key, so field lines without an explicit `key` are
/// keyed through their `entityId` using the entity lines seen before them.
#[derive(Debug, Default)]
struct PartitionKeys {
    names_by_id: HashMap<String, String>,
}

impl PartitionKeys {
    fn key_for(&mut self, record: &ReplayRecord) -> Result<String> {
        let topic = record.topic.parse::<Topic>().ok();

        if topic.is_some_and(|topic| !topic.is_field_event()) {
            if let (Some(id), Some(name)) = (record.payload_str("id"), record.payload_str("name")) {
                self.names_by_id.insert(id.to_string(), name.to_string());
            }
        }
        if let Some(key) = &record.key {
            return Ok(key.clone());
        }

        if topic.is_some_and(|topic| topic.is_field_event()) {
            let Some(entity_id) = record.payload_str("entityId") else {
                bail!("{} line has no entityId and no key", record.topic);
            };
            if let Some(name) = self.names_by_id.get(entity_id) {
                return Ok(name.clone());
            }
            if self.names_by_id.values().any(|name| name == entity_id) {
                return Ok(entity_id.to_string());
            }
            bail!(
                "{} line refers to entity '{}' that no earlier line created; give it an explicit key",
                record.topic,
                entity_id
            );
        }

        Ok(record.payload_str("name").unwrap_or_default().to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = SyncConfig::from_env().context("failed to load configuration")?;
    if let Some(partitions) = args.partitions {
        config.partitions = partitions;
    }
    if let Some(group) = args.group.clone() {
        config.consumer_group = group;
    }
    if let Some(policy) = args.rename_policy.as_deref() {
        config.rename_policy = policy
            .parse::<RenamePolicy>()
            .map_err(anyhow::Error::msg)
            .context("invalid --rename-policy")?;
    }

    let store = Arc::new(InMemoryDocumentStore::new());
    let bus = Arc::new(InMemoryEventBus::new(config.partitions));
    let registry = Arc::new(EntityRegistry::new(store, &config));
    let dead_letters = Arc::new(BusDeadLetterSink::new(bus.clone(), config.dead_letter_topic.clone()));
    let handler = Arc::new(SyncHandler::new(registry.clone(), dead_letters, config.retry.clone()));

    let consumer = SyncConsumer::new(bus.clone(), handler, config.consumer_group.clone())
        .start()
        .await
        .context("failed to start sync consumer")?;

    let published = publish_input(bus.as_ref(), args.input.as_ref()).await?;
    info!(published, "input published, waiting for consumer");

    tokio::select! {
        _ = wait_for_drain(&bus, &config.consumer_group) => {}
        _ = shutdown_signal() => warn!("interrupted, shutting down"),
    }

    consumer.shutdown().await.context("consumer shutdown failed")?;

    let dead_letters: Vec<DeadLetter> = bus
        .messages(&config.dead_letter_topic)
        .context("failed to read dead letters")?
        .iter()
        .filter_map(|message| serde_json::from_slice(&message.payload).ok())
        .collect();
    let report = json!({
        "entities": registry.snapshot().context("failed to snapshot registry")?,
        "deadLetters": dead_letters,
    });

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", rendered);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("entity_sync=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn publish_input(bus: &InMemoryEventBus, input: Option<&PathBuf>) -> Result<usize> {
    let mut lines = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file)) as Box<dyn tokio::io::AsyncBufRead + Unpin + Send>
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    }
    .lines();

    let mut keys = PartitionKeys::default();
    let mut published = 0;
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping malformed input line");
                continue;
            }
        };

        let key = match keys.key_for(&record) {
            Ok(key) => key,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping input line without a partition key");
                continue;
            }
        };

        let payload = serde_json::to_vec(&record.payload)?;
        bus.publish(&record.topic, &key, payload)
            .await
            .with_context(|| format!("failed to publish line {}", line_no))?;
        published += 1;
    }

    if published == 0 && line_no > 0 {
        bail!("no usable events in input");
    }
    Ok(published)
}

async fn wait_for_drain(bus: &InMemoryEventBus, group: &str) {
    loop {
        match bus.lag(group) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "cannot read consumer lag");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to install ctrl+c handler");
        std::future::pending::<()>().await;
    }
}
