//! End-to-end tests for the metamodel build pipeline.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use metagraph::dispatch::{RELATIONSHIP_HINT, TARGET_ID_PROPERTY, USER_ENTITY};
use metagraph::prelude::*;

#[tokio::test]
async fn test_build_catalogue() {
    init_test_logging();
    let source = Arc::new(FakeSource::new(catalogue()));
    let (service, _cache) = service_for(source.clone());

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    assert_eq!(metamodel.identifier(), "acme");
    let asset = metamodel.get_entity("Asset").unwrap();
    assert_eq!(asset.kind, EntityKind::TopLevelObject);
    assert_eq!(asset.property_keys(), vec!["Title_en", "Tags", "Product", "Owner"]);

    let title = asset.property("Title_en").unwrap();
    assert_eq!(title.data_type, DataType::LocalizedString);
    assert_eq!(title.label("de"), Some("Title (de)"));
    assert!(title
        .linked_translation_properties
        .as_ref()
        .unwrap()
        .contains("Title_de"));

    let tags = asset.property("Tags").unwrap();
    assert_eq!(tags.data_type, DataType::EnumArray);
    assert_eq!(tags.target_entity_key.as_deref(), Some("Tags"));
    let tag_entity = metamodel.get_entity("Tags").unwrap();
    assert_eq!(tag_entity.kind, EntityKind::Enum);
    assert_eq!(tag_entity.enum_values.as_ref().unwrap().len(), 2);

    let owner = asset.property("Owner").unwrap();
    assert_eq!(owner.target_entity_key.as_deref(), Some(USER_ENTITY));
    assert!(metamodel.get_entity(USER_ENTITY).unwrap().is_framework);

    let product = metamodel.get_entity("Product").unwrap();
    let target_id = product.property(TARGET_ID_PROPERTY).unwrap();
    assert_eq!(target_id.semantic_hint.as_deref(), Some(RELATIONSHIP_HINT));
    assert!(product.property("Name").unwrap().is_searchable);

    // Lists came with their values, so no extra calls were made.
    assert_eq!(source.enum_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dangling_relation_is_skipped() {
    init_test_logging();
    let schemas = vec![content_schema("Asset", "Asset")
        .with_field(field("Title", FieldKind::String, "Title"))
        .with_field(field("Product", FieldKind::SingleRelationRef, "Product").with_target("Missing"))];

    let (model, report) = EntityGraphBuilder::new(Arc::new(HandlerTable::standard())).build(
        &schemas,
        "acme",
        Capabilities::default(),
    );
    assert_eq!(report.count(SkipReason::UnresolvedTarget), 1);
    assert!(!model.contains_entity("Missing"));

    let (service, _cache) = service_for(Arc::new(FakeSource::new(schemas)));
    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    let asset = metamodel.get_entity("Asset").unwrap();
    assert_eq!(asset.property_keys(), vec!["Title"]);
}

#[tokio::test]
async fn test_relation_back_reference_added_once() {
    let schemas = vec![
        content_schema("Product", "Product"),
        content_schema("Asset", "Asset")
            .with_field(field("Product", FieldKind::SingleRelationRef, "Product").with_target("Product"))
            .with_field(
                field("Related", FieldKind::MultiRelationRef, "Related products").with_target("Product"),
            ),
        content_schema("Order", "Order")
            .with_field(field("Items", FieldKind::MultiRelationRef, "Items").with_target("Product")),
    ];
    let (service, _cache) = service_for(Arc::new(FakeSource::new(schemas)));

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    let product = metamodel.get_entity("Product").unwrap();
    let back_references = product
        .properties
        .iter()
        .filter(|p| p.key == TARGET_ID_PROPERTY)
        .count();
    assert_eq!(back_references, 1);
    assert_eq!(
        metamodel
            .get_entity("Order")
            .unwrap()
            .property("Items")
            .unwrap()
            .data_type,
        DataType::ObjectArray
    );
}

#[tokio::test]
async fn test_unsupported_kind_does_not_fail_build() {
    let schemas = vec![content_schema("Asset", "Asset")
        .with_field(field("Hologram", FieldKind::parse_str("hologram"), "Hologram"))
        .with_field(field("Refresh", FieldKind::Trigger, "Refresh"))
        .with_field(field("Title", FieldKind::String, "Title"))];
    let (service, _cache) = service_for(Arc::new(FakeSource::new(schemas)));

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    assert_eq!(
        metamodel.get_entity("Asset").unwrap().property_keys(),
        vec!["Title"]
    );
}

#[tokio::test]
async fn test_parent_cycle_builds_acyclic_graph() {
    let schemas = vec![
        content_schema("A", "A").with_parent("B"),
        content_schema("B", "B").with_parent("A"),
        content_schema("C", "C").with_parent("C"),
    ];
    let (service, _cache) = service_for(Arc::new(FakeSource::new(schemas)));

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    assert_eq!(metamodel.entity_count(), 3);
    assert!(metamodel.get_entity("C").unwrap().parent_key.is_none());
    for entity in metamodel.entities() {
        let mut current = entity.parent_key.clone();
        let mut steps = 0;
        while let Some(key) = current {
            steps += 1;
            assert!(steps <= metamodel.entity_count(), "parent chain of {} loops", entity.key);
            current = metamodel.get_entity(&key).and_then(|e| e.parent_key.clone());
        }
    }
}

#[tokio::test]
async fn test_unauthorized_refreshes_once_then_succeeds() {
    init_test_logging();
    let source = Arc::new(FakeSource::new(catalogue()).requiring_token("fresh"));
    let refresher = Arc::new(CountingRefresher::new("fresh"));
    let (service, _cache) = service_for(source.clone());
    let service = service.with_refresher(refresher.clone());

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    assert!(metamodel.get_entity("Asset").is_some());
    assert_eq!(refresher.calls(), 1);
    assert_eq!(source.list_calls(), 2);
}

#[tokio::test]
async fn test_unauthorized_without_refresher_expires() {
    let source = Arc::new(FakeSource::new(catalogue()).requiring_token("fresh"));
    let (service, cache) = service_for(source.clone());

    let err = service.build_metamodel(&test_config()).await.unwrap_err();

    assert_eq!(err.error_code(), "AUTHORIZATION_EXPIRED");
    assert_eq!(source.list_calls(), 1);
    assert_eq!(cache.stats().await.total_count, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let source = Arc::new(FakeSource::new(catalogue()).with_list_failures(vec![
        Box::new(|| RemoteError::RateLimited {
            retry_after: Some(Duration::ZERO),
        }),
        Box::new(|| RemoteError::Status {
            status: 503,
            message: "maintenance".to_string(),
        }),
    ]));
    let (service, _cache) = service_for(source.clone());

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    assert!(metamodel.get_entity("Asset").is_some());
    assert_eq!(source.list_calls(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let failures: Vec<Failure> = (0..5)
        .map(|_| -> Failure {
            Box::new(|| RemoteError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            })
        })
        .collect();
    let source = Arc::new(FakeSource::new(catalogue()).with_list_failures(failures));
    let (service, _cache) = service_for(source.clone());

    let err = service.build_metamodel(&test_config()).await.unwrap_err();

    assert_eq!(err.error_code(), "EXTERNAL_DEPENDENCY");
    assert!(err.is_remote());
    assert_eq!(source.list_calls(), 3);
}

#[tokio::test]
async fn test_failed_build_is_not_cached() {
    let source = Arc::new(FakeSource::new(catalogue()).with_details_failure(Box::new(|| {
        RemoteError::Forbidden {
            message: "schema access denied".to_string(),
        }
    })));
    let (service, cache) = service_for(source.clone());

    let err = service.build_metamodel(&test_config()).await.unwrap_err();

    assert_eq!(err.error_code(), "FORBIDDEN");
    assert_eq!(source.details_calls(), 1);
    assert_eq!(cache.stats().await.total_count, 0);
}

#[tokio::test]
async fn test_failed_build_keeps_previous_entry() {
    let cache = Arc::new(InMemoryMetamodelCache::new());
    let config = test_config();
    let healthy = MetamodelService::new(
        Arc::new(FakeSource::new(catalogue())),
        cache.clone(),
        Arc::new(HandlerTable::standard()),
        Arc::new(SuffixLocaleParser::new()),
    );
    let first = healthy.build_metamodel(&config).await.unwrap();

    let broken = MetamodelService::new(
        Arc::new(FakeSource::new(catalogue()).with_details_failure(Box::new(|| {
            RemoteError::NotFound {
                resource: "schemas".to_string(),
            }
        }))),
        cache.clone(),
        Arc::new(HandlerTable::standard()),
        Arc::new(SuffixLocaleParser::new()),
    );
    let err = broken.build_uncached(&config).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let cached = cache.get(&config.cache_key()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
}

#[tokio::test]
async fn test_missing_default_label_fails_build() {
    let schemas = vec![SchemaDefinition::new("Asset", SchemaClassification::Content)
        .with_label("de", "Anlage")];
    let (service, cache) = service_for(Arc::new(FakeSource::new(schemas)));

    let err = service.build_metamodel(&test_config()).await.unwrap_err();

    assert_eq!(err.error_code(), "MISSING_DEFAULT_LABEL");
    assert!(err.is_local_inconsistency());
    assert_eq!(cache.stats().await.total_count, 0);
}

#[tokio::test]
async fn test_concurrent_builds_share_one_fetch() {
    let source = Arc::new(FakeSource::new(catalogue()).with_details_delay(Duration::from_millis(5)));
    let (service, _cache) = service_for(source.clone());
    let service = Arc::new(service);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..6 {
        let service = service.clone();
        tasks.spawn(async move { service.build_metamodel(&test_config()).await });
    }

    let mut built = Vec::new();
    while let Some(result) = tasks.join_next().await {
        built.push(result.unwrap().unwrap());
    }

    assert_eq!(source.list_calls(), 1);
    assert!(built.iter().all(|m| Arc::ptr_eq(m, &built[0])));
}

#[tokio::test]
async fn test_cache_hit_and_invalidate() {
    let source = Arc::new(FakeSource::new(catalogue()));
    let (service, _cache) = service_for(source.clone());
    let config = test_config();

    let first = service.build_metamodel(&config).await.unwrap();
    let second = service.build_metamodel(&config).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.list_calls(), 1);

    service.invalidate(&config).await;
    let third = service.build_metamodel(&config).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(source.list_calls(), 2);
}

#[tokio::test]
async fn test_details_batches_are_bounded() {
    let schemas: Vec<SchemaDefinition> = (0..10)
        .map(|i| content_schema(&format!("Schema{i}"), &format!("Schema {i}")))
        .collect();
    let source = Arc::new(FakeSource::new(schemas).with_details_delay(Duration::from_millis(2)));
    let (service, _cache) = service_for(source.clone());
    let config = test_config()
        .with_batch_size(2)
        .with_max_concurrent_batches(2);

    let metamodel = service.build_metamodel(&config).await.unwrap();

    assert_eq!(metamodel.entity_count(), 10);
    assert_eq!(source.details_calls(), 5);
    assert!(source.max_details_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_enum_values_fetched_for_bare_lists() {
    let schemas = vec![
        SchemaDefinition::new("Colors", SchemaClassification::List).with_label("en", "Colors"),
        content_schema("Asset", "Asset")
            .with_field(field("Color", FieldKind::SingleSelect, "Color").with_target("Colors")),
    ];
    let source = Arc::new(FakeSource::new(schemas).with_enum_values(
        "Colors",
        vec![
            EnumValueDefinition::new("red").with_label("en", "Red"),
            EnumValueDefinition::new("blue").with_label("en", "Blue"),
        ],
    ));
    let (service, _cache) = service_for(source.clone());

    let metamodel = service.build_metamodel(&test_config()).await.unwrap();

    let colors = metamodel.get_entity("Colors").unwrap();
    let ids: Vec<&str> = colors
        .enum_values
        .as_ref()
        .unwrap()
        .iter()
        .map(|v| v.id.as_str())
        .collect();
    assert_eq!(ids, vec!["red", "blue"]);
    assert_eq!(source.enum_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_fetching() {
    let source = Arc::new(FakeSource::new(catalogue()));
    let (service, _cache) = service_for(source.clone());

    let err = service
        .build_metamodel(&test_config().with_batch_size(0))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "INVALID_CONFIG");
    assert_eq!(source.list_calls(), 0);
}
