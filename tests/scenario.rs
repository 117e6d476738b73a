//! End-to-end: schema document -> mapping -> migrations -> entities and queries on a MemoryStore.

use chrono::{TimeZone, Utc};
use relmap_sdk::{
    apply_migrations, build_schema, plan, resolve, AppError, ConstraintError, FieldValue, Mapping, MappingOptions,
    MemoryStore, Schema, Store,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn schema() -> Schema {
    let doc = json!({ "models": [
        { "name": "shop.user", "fields": [
            { "name": "name", "id": 1, "type": "string", "multiplicity": "required" },
            { "name": "nickname", "id": 2, "type": "string", "version": 2 }
        ] },
        { "name": "shop.post", "fields": [
            { "name": "author", "id": 1, "type": { "ref": "shop.user" }, "multiplicity": "required" },
            { "name": "title", "id": 2, "type": "string" },
            { "name": "tags", "id": 0, "type": { "ref": "shop.tag" }, "multiplicity": "repeated",
              "through": "shop.post_tag", "related_name": "posts", "version": 2 },
            { "name": "publishedAt", "id": 3, "type": "timestamp", "version": 3 }
        ] },
        { "name": "shop.tag", "version": 2, "fields": [
            { "name": "label", "id": 1, "type": "string", "multiplicity": "required", "unique": true }
        ] },
        { "name": "shop.post_tag", "kind": "join", "version": 2,
          "source_field": "post", "dest_field": "tag", "fields": [
            { "name": "post", "id": 1, "type": "shop.post", "multiplicity": "required" },
            { "name": "tag", "id": 2, "type": "shop.tag", "multiplicity": "required" }
        ] }
    ] });
    build_schema(&serde_json::from_value(doc).unwrap()).unwrap()
}

async fn migrated() -> (Schema, Arc<Mapping>, MemoryStore) {
    let schema = schema();
    let mapping = resolve(&schema, &MappingOptions::default()).unwrap();
    let store = MemoryStore::new();
    let plan = plan(&schema, &mapping).unwrap();
    assert_eq!(apply_migrations(&store, &plan).await.unwrap(), 3);
    (schema, Arc::new(mapping), store)
}

#[tokio::test]
async fn post_without_author_fails_before_any_write() {
    let (_, mapping, store) = migrated().await;
    let mut post = mapping.entity("shop.post").unwrap();
    post.set("title", "hello").unwrap();
    let err = post.save(&store).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Constraint(ConstraintError::Required { ref model, ref field }) if model == "shop.post" && field == "author"
    ));
    assert_eq!(store.row_count("shop_post").await.unwrap(), 0);
}

#[tokio::test]
async fn tagging_twice_leaves_one_join_row() {
    let (_, mapping, store) = migrated().await;
    let mut ada = mapping.entity("shop.user").unwrap();
    ada.set("name", "ada").unwrap();
    ada.save(&store).await.unwrap();

    let mut post = mapping.entity("shop.post").unwrap();
    post.set_reference("author", &ada).unwrap().set("title", "hello").unwrap();
    post.save(&store).await.unwrap();

    let mut rust = mapping.entity("shop.tag").unwrap();
    rust.set("label", "rust").unwrap();
    rust.save(&store).await.unwrap();

    let tags = post.relation("tags").unwrap();
    assert!(tags.add(&store, &rust).await.unwrap());
    assert!(!tags.add(&store, &rust).await.unwrap());
    assert_eq!(store.row_count("shop_post_tag").await.unwrap(), 1);

    let found = mapping
        .query("shop.post")
        .unwrap()
        .relationship_filter("tags", "label", "rust")
        .all(&store)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("title"), Some(&FieldValue::Text("hello".into())));

    let none = mapping
        .query("shop.post")
        .unwrap()
        .relationship_filter("tags", "label", "go")
        .all(&store)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn repeated_relationship_filter_joins_once() {
    let (_, mapping, _) = migrated().await;
    let q = mapping
        .query("shop.post")
        .unwrap()
        .relationship_filter("tags", "label", "a")
        .or()
        .relationship_filter("tags", "label", "b")
        .build()
        .unwrap();
    assert_eq!(q.join_count("tags"), 1);
    assert_eq!(q.groups.len(), 2);
}

#[tokio::test]
async fn timestamps_round_trip_in_whole_milliseconds() {
    let (_, mapping, store) = migrated().await;
    let mut ada = mapping.entity("shop.user").unwrap();
    ada.set("name", "ada").unwrap();
    ada.save(&store).await.unwrap();

    let at = Utc.with_ymd_and_hms(2023, 11, 5, 8, 15, 0).unwrap() + chrono::Duration::milliseconds(123);
    let mut post = mapping.entity("shop.post").unwrap();
    post.set_reference("author", &ada).unwrap().set("publishedAt", at).unwrap();
    post.save(&store).await.unwrap();

    let loaded = mapping
        .query("shop.post")
        .unwrap()
        .filter("publishedAt", at)
        .first(&store)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.get("publishedAt"), Some(&FieldValue::Instant(at)));
}

#[tokio::test]
async fn callbacks_fire_exactly_once() {
    let (_, mapping, store) = migrated().await;
    let store: Arc<dyn Store> = Arc::new(store);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut ada = mapping.entity("shop.user").unwrap();
    ada.set("name", "ada").unwrap();
    let counter = Arc::clone(&calls);
    ada.save_with(Arc::clone(&store), move |result| {
        assert!(result.unwrap().is_persisted());
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap()
    .await
    .unwrap();

    let counter = Arc::clone(&calls);
    mapping
        .query("shop.user")
        .unwrap()
        .filter("name", "ada")
        .all_with(Arc::clone(&store), move |result| {
            assert_eq!(result.unwrap().len(), 1);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let counter = Arc::clone(&calls);
    let invalid = mapping
        .query("shop.user")
        .unwrap()
        .filter("missing", 1)
        .first_with(Arc::clone(&store), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    assert!(matches!(invalid, Err(AppError::UnknownColumn { .. })));

    let unsaved = mapping.entity("shop.user").unwrap();
    let counter = Arc::clone(&calls);
    let invalid = unsaved.save_with(store, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(matches!(invalid, Err(AppError::Constraint(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn incremental_migration_matches_truncated_schema() {
    let schema = schema();
    let mapping = resolve(&schema, &MappingOptions::default()).unwrap();
    let plan = plan(&schema, &mapping).unwrap();

    for from in 1..=3u32 {
        for to in from..=3u32 {
            let store = MemoryStore::new();
            for step in plan.steps_between(0, from).chain(plan.steps_between(from, to)) {
                store.apply(&step.step).await.unwrap();
            }

            let expected = resolve(&schema.truncated(to), &MappingOptions::default()).unwrap();
            let mut tables: Vec<String> = expected.tables().iter().map(|t| t.table_name.clone()).collect();
            tables.sort();
            assert_eq!(store.table_names().await, tables, "tables at {} -> {}", from, to);

            for table in expected.tables() {
                let mut want: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
                let mut have = store.column_names(&table.table_name).await.unwrap();
                want.sort();
                have.sort();
                assert_eq!(have, want, "{} at {} -> {}", table.table_name, from, to);
            }
        }
    }
}

#[tokio::test]
async fn reapplying_migrations_is_a_no_op() {
    let (schema, mapping, store) = migrated().await;
    let plan = plan(&schema, &mapping).unwrap();
    assert_eq!(apply_migrations(&store, &plan).await.unwrap(), 3);
    assert_eq!(store.schema_version().await.unwrap(), 3);
}
