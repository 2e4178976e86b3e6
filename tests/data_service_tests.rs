use chrono::Utc;
use entity_sync::events::{EntityEventPayload, EntityMigratedPayload};
use entity_sync::{
    DocumentStore, DynamicDataService, EntityRegistry, InMemoryDocumentStore, QueryParams,
    SyncConfig, SyncError,
};
use serde_json::json;
use std::sync::Arc;

async fn setup() -> (Arc<InMemoryDocumentStore>, Arc<EntityRegistry>, DynamicDataService) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let registry = Arc::new(EntityRegistry::new(store.clone(), &SyncConfig::default()));
    registry
        .apply_created(&EntityEventPayload {
            id: "e1".to_string(),
            name: "invoice".to_string(),
            display_name: "Invoice".to_string(),
            table_name: "invoice".to_string(),
            is_system: false,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    let data = DynamicDataService::new(registry.clone(), store.clone());
    (store, registry, data)
}

#[tokio::test]
async fn test_unknown_entity_is_not_found() {
    let (_store, _registry, data) = setup().await;
    let result = data.create_record("customer", json!({"name": "x"}), None).await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn test_record_crud() {
    let (_store, _registry, data) = setup().await;

    let created = data
        .create_record("invoice", json!({"amount": 10, "status": "draft"}), Some("u1"))
        .await
        .unwrap();
    assert_eq!(created.entity_id, "e1");
    assert_eq!(created.created_by.as_deref(), Some("u1"));

    let updated = data
        .update_record("invoice", &created.id, json!({"amount": 12, "status": "paid"}), Some("u2"))
        .await
        .unwrap();
    assert_eq!(updated.data["amount"], json!(12));
    assert_eq!(updated.updated_by.as_deref(), Some("u2"));
    assert_eq!(updated.created_by.as_deref(), Some("u1"));

    let fetched = data.get_record("invoice", &created.id).await.unwrap();
    assert_eq!(fetched.data["status"], json!("paid"));

    data.delete_record("invoice", &created.id).await.unwrap();
    assert!(matches!(
        data.get_record("invoice", &created.id).await,
        Err(SyncError::NotFound(_))
    ));
    assert!(matches!(
        data.delete_record("invoice", &created.id).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_non_object_data_is_rejected() {
    let (_store, _registry, data) = setup().await;
    let result = data.create_record("invoice", json!([1, 2, 3]), None).await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
}

#[tokio::test]
async fn test_list_paginates_filters_and_projects() {
    let (_store, _registry, data) = setup().await;
    for i in 0..25 {
        let status = if i % 5 == 0 { "paid" } else { "draft" };
        data.create_record("invoice", json!({"amount": i, "status": status, "note": "n"}), None)
            .await
            .unwrap();
    }

    let page = data
        .list_records(
            "invoice",
            &QueryParams {
                page: Some(2),
                limit: Some(10),
                sort: Some("amount".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.pages, 3);
    assert_eq!(page.data.len(), 10);
    assert_eq!(page.data[0].data["amount"], json!(10));

    let paid = data
        .list_records(
            "invoice",
            &QueryParams {
                filter: Some(r#"{"status":"paid"}"#.to_string()),
                sort: Some("-amount".to_string()),
                fields: Some("amount".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(paid.total, 5);
    assert_eq!(paid.data[0].data["amount"], json!(20));
    assert!(paid.data.iter().all(|doc| doc.data.len() == 1));

    let bad = data
        .list_records(
            "invoice",
            &QueryParams {
                filter: Some("{status".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(bad, Err(SyncError::Validation(_))));
}

#[tokio::test]
async fn test_records_survive_deferred_rename_and_migration() {
    let (store, registry, data) = setup().await;
    let record = data.create_record("invoice", json!({"amount": 1}), None).await.unwrap();

    registry
        .apply_updated(&EntityEventPayload {
            id: "e1".to_string(),
            name: "invoice".to_string(),
            display_name: "Invoice".to_string(),
            table_name: "invoices".to_string(),
            is_system: false,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    // still served from the creation-time collection
    assert_eq!(data.get_record("invoice", &record.id).await.unwrap().id, record.id);
    assert_eq!(store.count("invoice").await.unwrap(), 1);

    registry
        .apply_migrated(&EntityMigratedPayload {
            id: "e1".to_string(),
            name: "invoice".to_string(),
            table_name: "invoices".to_string(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(registry.resolve("invoice").unwrap().collection, "invoices");
    assert_eq!(data.get_record("invoice", &record.id).await.unwrap().id, record.id);
    assert_eq!(store.count("invoices").await.unwrap(), 1);
}
