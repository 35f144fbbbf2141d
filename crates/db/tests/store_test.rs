use harbor_db::entity::{
    config, detail_files, offer_configurations, protocols, providers, resources,
};
use harbor_db::{DeploymentStatus, DetailFile, NewResource, ResourceUpdate, Store};
use sea_orm::{ConnectionTrait, Database, DbBackend, Schema};
use serde_json::json;

async fn test_store() -> Store {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(DbBackend::Sqlite);
    let backend = db.get_database_backend();
    db.execute(backend.build(&schema.create_table_from_entity(protocols::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(providers::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(resources::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(detail_files::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(config::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(
        offer_configurations::Entity,
    )))
    .await
    .unwrap();
    Store::from_connection(db)
}

const PROTOCOL: &str = "0x00000000000000000000000000000000000000aa";

fn sample_resource(id: i64) -> NewResource {
    NewResource {
        id,
        protocol_address: PROTOCOL.to_string(),
        name: format!("res-{id}"),
        owner_address: "0xAbCd000000000000000000000000000000000001".to_string(),
        details: json!({"Endpoint": "http://example", "_secret": "s"}),
        deployment_status: DeploymentStatus::Running,
        offer_id: 3,
        provider_id: 9,
    }
}

#[tokio::test]
async fn sync_detail_files_makes_table_match_disk_set() {
    let store = test_store().await;
    store.insert_detail_file("0xstale", "old content").await.unwrap();

    let files = vec![
        DetailFile {
            cid: "0xaaa".to_string(),
            content: "a".to_string(),
        },
        DetailFile {
            cid: "0xbbb".to_string(),
            content: "b".to_string(),
        },
    ];
    store.sync_detail_files(&files).await.unwrap();

    let mut cids = store.all_detail_cids().await.unwrap();
    cids.sort();
    assert_eq!(cids, vec!["0xaaa", "0xbbb"]);

    // A second sync with the same set is a no-op.
    store.sync_detail_files(&files).await.unwrap();
    assert_eq!(store.all_detail_cids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn sync_with_empty_set_clears_table() {
    let store = test_store().await;
    store.insert_detail_file("0xaaa", "a").await.unwrap();
    store.sync_detail_files(&[]).await.unwrap();
    assert!(store.all_detail_cids().await.unwrap().is_empty());
}

#[tokio::test]
async fn resource_lookup_is_address_case_insensitive() {
    let store = test_store().await;
    store.create_resource(sample_resource(7)).await.unwrap();

    // Query with a differently-cased owner and protocol address.
    let found = store
        .get_resource(
            7,
            "0x00000000000000000000000000000000000000AA",
            Some("0xABCD000000000000000000000000000000000001"),
        )
        .await
        .unwrap();
    assert!(found.is_some());

    // Wrong owner is filtered out at the query layer.
    let other = store
        .get_resource(
            7,
            PROTOCOL,
            Some("0x0000000000000000000000000000000000000099"),
        )
        .await
        .unwrap();
    assert!(other.is_none());
}

#[tokio::test]
async fn update_against_unknown_protocol_is_dropped() {
    let store = test_store().await;
    store.create_resource(sample_resource(1)).await.unwrap();

    store
        .update_resource(
            1,
            "0x00000000000000000000000000000000000000ff",
            ResourceUpdate {
                deployment_status: Some(DeploymentStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let row = store.get_resource(1, PROTOCOL, None).await.unwrap().unwrap();
    assert_eq!(row.deployment_status, DeploymentStatus::Running);
}

#[tokio::test]
async fn delete_resource_closes_and_wipes_details() {
    let store = test_store().await;
    store.create_resource(sample_resource(2)).await.unwrap();

    store.delete_resource(2, PROTOCOL).await.unwrap();

    let row = store.get_resource(2, PROTOCOL, None).await.unwrap().unwrap();
    assert!(!row.is_active);
    assert_eq!(row.deployment_status, DeploymentStatus::Closed);
    assert_eq!(row.details, json!({}));

    // Deleting again is harmless.
    store.delete_resource(2, PROTOCOL).await.unwrap();
}

#[tokio::test]
async fn update_resource_applies_partial_fields() {
    let store = test_store().await;
    store.create_resource(sample_resource(3)).await.unwrap();

    store
        .update_resource(
            3,
            PROTOCOL,
            ResourceUpdate {
                deployment_status: Some(DeploymentStatus::Deploying),
                details: Some(json!({"Phase": 2})),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let row = store.get_resource(3, PROTOCOL, None).await.unwrap().unwrap();
    assert_eq!(row.deployment_status, DeploymentStatus::Deploying);
    assert_eq!(row.details, json!({"Phase": 2}));
    assert_eq!(row.name, "res-3");
}

#[tokio::test]
async fn config_cursor_roundtrip() {
    let store = test_store().await;
    assert!(store.get_config("LAST_PROCESSED_BLOCK").await.unwrap().is_none());

    store.set_config("LAST_PROCESSED_BLOCK", "100").await.unwrap();
    store.set_config("LAST_PROCESSED_BLOCK", "200").await.unwrap();

    assert_eq!(
        store.get_config("LAST_PROCESSED_BLOCK").await.unwrap().as_deref(),
        Some("200")
    );
}

#[tokio::test]
async fn provider_roster_with_virtual_children() {
    let store = test_store().await;
    store
        .save_provider(1, "0x0000000000000000000000000000000000000001", false, None)
        .await
        .unwrap();
    store
        .save_provider(2, "0x0000000000000000000000000000000000000002", true, Some(1))
        .await
        .unwrap();
    store
        .save_provider(3, "0x0000000000000000000000000000000000000003", true, Some(1))
        .await
        .unwrap();

    let children = store.virtual_children(1).await.unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.is_virtual));

    // Saving an existing id updates in place.
    store
        .save_provider(2, "0x0000000000000000000000000000000000000002", true, Some(1))
        .await
        .unwrap();
    assert_eq!(store.virtual_children(1).await.unwrap().len(), 2);

    let by_owner = store
        .get_provider_by_owner("0x0000000000000000000000000000000000000002")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_owner.id, 2);
    assert_eq!(by_owner.gateway_provider_id, Some(1));
}

#[tokio::test]
async fn offer_configuration_upsert_and_fetch() {
    let store = test_store().await;
    assert!(store
        .get_offer_configuration(5, PROTOCOL)
        .await
        .unwrap()
        .is_none());

    store
        .upsert_offer_configuration(5, PROTOCOL, json!({"model": "small"}))
        .await
        .unwrap();
    store
        .upsert_offer_configuration(5, PROTOCOL, json!({"model": "large"}))
        .await
        .unwrap();

    let cfg = store
        .get_offer_configuration(5, PROTOCOL)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cfg, json!({"model": "large"}));
}
