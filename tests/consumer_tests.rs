use async_trait::async_trait;
use chrono::Utc;
use entity_sync::metadata::{CreateEntityDto, CreateFieldDto};
use entity_sync::storage::{DocumentQuery, FindResult, IndexSpec, UnsetBatch};
use entity_sync::sync::DeadLetter;
use entity_sync::{
    BusDeadLetterSink, Document, DocumentStore, DynamicDataService, EntityRegistry, EventBus,
    EventPublisher, FieldType, InMemoryDocumentStore, InMemoryEventBus, InMemoryMetadataStore,
    MetadataService, Result, SyncConfig, SyncConsumer, SyncError, SyncHandler, Topic,
};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const GROUP: &str = "dynamic-data-service-group";

struct Service {
    registry: Arc<EntityRegistry>,
    handler: Arc<SyncHandler>,
}

fn service(bus: &Arc<InMemoryEventBus>, config: &SyncConfig) -> Service {
    let store = Arc::new(InMemoryDocumentStore::new());
    let registry = Arc::new(EntityRegistry::new(store, config));
    let sink = Arc::new(BusDeadLetterSink::new(bus.clone(), config.dead_letter_topic.clone()));
    let handler = Arc::new(SyncHandler::new(registry.clone(), sink, config.retry.clone()));
    Service { registry, handler }
}

async fn publish(bus: &InMemoryEventBus, topic: Topic, key: &str, body: serde_json::Value) {
    bus.publish(topic.as_str(), key, serde_json::to_vec(&body).unwrap())
        .await
        .unwrap();
}

fn created(name: &str) -> serde_json::Value {
    json!({
        "id": format!("{}-id", name),
        "name": name,
        "displayName": name,
        "tableName": name,
        "isSystem": false,
        "timestamp": Utc::now(),
    })
}

async fn drain(bus: &InMemoryEventBus, group: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.lag(group).unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumer did not catch up");
}

#[tokio::test]
async fn test_consumer_applies_events_and_commits() {
    let config = SyncConfig::default();
    let bus = Arc::new(InMemoryEventBus::new(config.partitions));
    let svc = service(&bus, &config);

    let consumer = SyncConsumer::new(bus.clone(), svc.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();

    for name in ["invoice", "customer", "product"] {
        publish(&bus, Topic::EntityCreated, name, created(name)).await;
    }
    publish(
        &bus,
        Topic::FieldCreated,
        "invoice",
        json!({
            "id": "f1",
            "entityId": "invoice-id",
            "name": "amount",
            "displayName": "Amount",
            "type": "money",
            "isRequired": true,
            "isSystem": false,
            "timestamp": Utc::now(),
        }),
    )
    .await;

    drain(&bus, GROUP).await;
    assert_eq!(consumer.stats().processed(), 4);
    consumer.shutdown().await.unwrap();

    assert_eq!(svc.registry.len(), 3);
    assert!(svc.registry.resolve("invoice").unwrap().is_indexed("amount"));
}

#[tokio::test]
async fn test_poison_message_goes_to_dead_letter_topic() {
    let config = SyncConfig::default();
    let bus = Arc::new(InMemoryEventBus::new(1));
    let svc = service(&bus, &config);

    let consumer = SyncConsumer::new(bus.clone(), svc.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();

    bus.publish(Topic::EntityCreated.as_str(), "invoice", b"not json".to_vec())
        .await
        .unwrap();
    publish(&bus, Topic::EntityCreated, "invoice", created("invoice")).await;

    drain(&bus, GROUP).await;
    assert_eq!(consumer.stats().dead_lettered(), 1);
    consumer.shutdown().await.unwrap();

    // the poison message did not block the partition
    assert!(svc.registry.resolve("invoice").is_ok());

    let letters = bus.messages(&config.dead_letter_topic).unwrap();
    assert_eq!(letters.len(), 1);
    let letter: DeadLetter = serde_json::from_slice(&letters[0].payload).unwrap();
    assert_eq!(letter.topic, "entity-created");
    assert_eq!(letter.payload, "not json");
    assert_eq!(letter.offset, 0);
}

#[tokio::test]
async fn test_uncommitted_messages_are_redelivered() {
    let config = SyncConfig::default();
    let bus = Arc::new(InMemoryEventBus::new(2));

    publish(&bus, Topic::EntityCreated, "invoice", created("invoice")).await;
    publish(&bus, Topic::EntityCreated, "customer", created("customer")).await;

    // a consumer that received the messages but died before committing
    let crashed = bus.subscribe(GROUP, &["entity-created"]).await.unwrap();
    drop(crashed);

    let svc = service(&bus, &config);
    let consumer = SyncConsumer::new(bus.clone(), svc.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();
    drain(&bus, GROUP).await;
    consumer.shutdown().await.unwrap();

    assert!(svc.registry.contains("invoice"));
    assert!(svc.registry.contains("customer"));
}

#[tokio::test]
async fn test_restart_resumes_after_committed_offset() {
    let config = SyncConfig::default();
    let bus = Arc::new(InMemoryEventBus::new(1));

    let first = service(&bus, &config);
    let consumer = SyncConsumer::new(bus.clone(), first.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();
    publish(&bus, Topic::EntityCreated, "invoice", created("invoice")).await;
    drain(&bus, GROUP).await;
    consumer.shutdown().await.unwrap();

    publish(&bus, Topic::EntityCreated, "customer", created("customer")).await;

    let second = service(&bus, &config);
    let consumer = SyncConsumer::new(bus.clone(), second.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();
    drain(&bus, GROUP).await;
    assert_eq!(consumer.stats().processed(), 1);
    consumer.shutdown().await.unwrap();

    assert!(!second.registry.contains("invoice"));
    assert!(second.registry.contains("customer"));
}

#[tokio::test]
async fn test_fresh_group_rebuilds_registry_from_log() {
    let config = SyncConfig::default();
    let bus = Arc::new(InMemoryEventBus::new(4));
    for name in ["invoice", "customer"] {
        publish(&bus, Topic::EntityCreated, name, created(name)).await;
    }
    publish(
        &bus,
        Topic::EntityDeleted,
        "customer",
        json!({"id": "customer-id", "name": "customer", "timestamp": Utc::now()}),
    )
    .await;

    let svc = service(&bus, &config);
    let consumer = SyncConsumer::new(bus.clone(), svc.handler.clone(), "rebuild")
        .start()
        .await
        .unwrap();
    drain(&bus, "rebuild").await;
    consumer.shutdown().await.unwrap();

    let names: Vec<_> = svc
        .registry
        .snapshot()
        .unwrap()
        .into_iter()
        .map(|handle| handle.entity_name)
        .collect();
    assert_eq!(names, vec!["invoice"]);
}

/// Document store whose bulk unset can be switched off, standing in for a
/// process that dies halfway through a sweep.
#[derive(Default)]
struct SweepFailingStore {
    inner: InMemoryDocumentStore,
    sweeps_fail: AtomicBool,
}

#[async_trait]
impl DocumentStore for SweepFailingStore {
    async fn create_collection(&self, name: &str) -> Result<bool> {
        self.inner.create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        self.inner.drop_collection(name).await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.inner.collection_exists(name).await
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        self.inner.rename_collection(from, to).await
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        self.inner.list_indexes(collection).await
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<()> {
        self.inner.create_index(collection, spec).await
    }

    async fn drop_index(&self, collection: &str, index_name: &str) -> Result<()> {
        self.inner.drop_index(collection, index_name).await
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<Document> {
        self.inner.insert(collection, document).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn update_data(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, JsonValue>,
        updated_by: Option<String>,
    ) -> Result<Option<Document>> {
        self.inner.update_data(collection, id, data, updated_by).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.delete(collection, id).await
    }

    async fn find(&self, collection: &str, query: &DocumentQuery) -> Result<FindResult> {
        self.inner.find(collection, query).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }

    async fn unset_field_batch(
        &self,
        collection: &str,
        path: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<UnsetBatch> {
        if self.sweeps_fail.load(Ordering::SeqCst) {
            return Err(SyncError::TransientStore("sweep interrupted".to_string()));
        }
        self.inner.unset_field_batch(collection, path, after, limit).await
    }
}

fn service_on(bus: &Arc<InMemoryEventBus>, config: &SyncConfig, store: Arc<SweepFailingStore>) -> Service {
    let registry = Arc::new(EntityRegistry::new(store, config));
    let sink = Arc::new(BusDeadLetterSink::new(bus.clone(), config.dead_letter_topic.clone()));
    let handler = Arc::new(SyncHandler::new(registry.clone(), sink, config.retry.clone()));
    Service { registry, handler }
}

#[tokio::test]
async fn test_unfinished_purge_is_redelivered_after_restart() {
    let config = SyncConfig::default();
    let bus = Arc::new(InMemoryEventBus::new(1));
    let metadata = MetadataService::new(
        Arc::new(InMemoryMetadataStore::new()),
        EventPublisher::new(bus.clone()),
    );
    let store = Arc::new(SweepFailingStore::default());
    store.sweeps_fail.store(true, Ordering::SeqCst);

    let first = service_on(&bus, &config, store.clone());
    let consumer = SyncConsumer::new(bus.clone(), first.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();

    metadata
        .create_entity(CreateEntityDto {
            name: "invoice".to_string(),
            display_name: "Invoice".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let entity_id = metadata.list_entities().await.unwrap()[0].id.clone();
    let amount = metadata
        .create_field(CreateFieldDto {
            entity_id,
            name: "amount".to_string(),
            display_name: "Amount".to_string(),
            field_type: FieldType::Money,
            is_required: false,
            is_system: false,
            order: None,
        })
        .await
        .unwrap();
    drain(&bus, GROUP).await;

    let record = DynamicDataService::new(first.registry.clone(), store.clone())
        .create_record("invoice", json!({"amount": 5}), None)
        .await
        .unwrap();

    metadata.delete_field(&amount.id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while consumer.stats().processed() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("field-deleted was not processed");
    first.registry.wait_for_purges().await;
    consumer.shutdown().await.unwrap();

    // the delete stays uncommitted while its sweep has not finished
    assert_eq!(bus.lag(GROUP).unwrap(), 1);
    let kept = store.get("invoice", &record.id).await.unwrap().unwrap();
    assert_eq!(kept.lookup("data.amount"), Some(json!(5)));

    store.sweeps_fail.store(false, Ordering::SeqCst);
    let second = service_on(&bus, &config, store.clone());
    second.registry.hydrate(metadata.store().as_ref()).await.unwrap();
    let consumer = SyncConsumer::new(bus.clone(), second.handler.clone(), GROUP)
        .start()
        .await
        .unwrap();
    drain(&bus, GROUP).await;
    assert_eq!(consumer.stats().processed(), 1);
    consumer.shutdown().await.unwrap();

    let purged = store.get("invoice", &record.id).await.unwrap().unwrap();
    assert_eq!(purged.lookup("data.amount"), None);
    assert!(!second.registry.resolve("invoice").unwrap().is_indexed("amount"));
}
