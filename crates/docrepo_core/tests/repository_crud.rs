mod common;

use common::{factory, order, Order};
use docrepo_core::{CancellationToken, MemoryStore, RepoError, Repository};
use std::sync::Arc;

#[tokio::test]
async fn order_lifecycle_scenario() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    let created = orders.create(order("o1", "c1", 42.0), &cancel).await.unwrap();
    assert!(created.timestamps.created_time_utc.is_some());
    let first_etag = created.header.etag.clone().unwrap();

    let loaded = orders.get("o1", Some("c1"), &cancel).await.unwrap();
    assert_eq!(loaded, created);

    let mut current = loaded.clone();
    current.status = "paid".to_string();
    let updated = orders.update(current, false, &cancel).await.unwrap();
    assert_ne!(updated.header.etag.as_deref(), Some(first_etag.as_str()));
    assert_eq!(
        updated.timestamps.created_time_utc,
        created.timestamps.created_time_utc
    );

    let mut stale = loaded;
    stale.status = "cancelled".to_string();
    let err = orders.update(stale, false, &cancel).await.unwrap_err();
    assert!(matches!(err, RepoError::ConcurrencyConflict { ref id, .. } if id == "o1"));

    orders.delete("o1", Some("c1"), &cancel).await.unwrap();
    let err = orders.get("o1", Some("c1"), &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound { ref id, ref partition_key, .. } if id == "o1" && partition_key == "c1"
    ));
}

#[tokio::test]
async fn created_time_is_set_once_across_updates() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    let mut current = orders.create(order("o2", "c1", 5.0), &cancel).await.unwrap();
    let created_at = current.timestamps.created_time_utc;
    for total in [6.0, 7.0, 8.0] {
        current.total = total;
        current = orders.update(current, false, &cancel).await.unwrap();
        assert_eq!(current.timestamps.created_time_utc, created_at);
        assert!(current.timestamps.updated_time_utc >= created_at);
    }
    assert_eq!(orders.get("o2", Some("c1"), &cancel).await.unwrap().total, 8.0);
}

#[tokio::test]
async fn duplicate_create_conflicts_within_partition_only() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    orders.create(order("o1", "c1", 1.0), &cancel).await.unwrap();
    let err = orders
        .create(order("o1", "c1", 2.0), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict { .. }));

    orders.create(order("o1", "c2", 3.0), &cancel).await.unwrap();
}

#[tokio::test]
async fn update_of_missing_item_is_not_found() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let err = orders
        .update(order("ghost", "c1", 1.0), true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn try_variants_recover_only_not_found() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    assert!(orders.try_get("o9", Some("c1"), &cancel).await.unwrap().is_none());
    assert!(!orders.try_delete("o9", Some("c1"), &cancel).await.unwrap());
    assert!(!orders.exists("o9", Some("c1"), &cancel).await.unwrap());

    orders.create(order("o9", "c1", 1.0), &cancel).await.unwrap();
    assert!(orders.exists("o9", Some("c1"), &cancel).await.unwrap());
    assert!(orders.try_get("o9", Some("c1"), &cancel).await.unwrap().is_some());
    assert!(orders.try_delete("o9", Some("c1"), &cancel).await.unwrap());
    assert!(!orders.try_delete("o9", Some("c1"), &cancel).await.unwrap());

    let err = orders.delete("o9", Some("c1"), &cancel).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn partition_key_defaults_to_id() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    orders.create(order("solo", "solo", 1.0), &cancel).await.unwrap();
    assert_eq!(orders.get("solo", None, &cancel).await.unwrap().customer_id, "solo");
}

#[tokio::test]
async fn upsert_creates_then_replaces_under_etag() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    let created = orders
        .upsert(order("o3", "c1", 10.0), false, &cancel)
        .await
        .unwrap();
    assert!(created.timestamps.created_time_utc.is_some());

    let mut next = created.clone();
    next.total = 11.0;
    let replaced = orders.upsert(next, false, &cancel).await.unwrap();
    assert_eq!(replaced.total, 11.0);

    let mut stale = created;
    stale.total = 12.0;
    let err = orders.upsert(stale.clone(), false, &cancel).await.unwrap_err();
    assert!(matches!(err, RepoError::ConcurrencyConflict { .. }));

    let forced = orders.upsert(stale, true, &cancel).await.unwrap();
    assert_eq!(forced.total, 12.0);
}

#[tokio::test]
async fn create_many_reports_every_failure_without_rollback() {
    let orders = factory(Arc::new(MemoryStore::new()))
        .repository::<Order>()
        .unwrap();
    let cancel = CancellationToken::new();

    orders.create(order("dup", "c1", 1.0), &cancel).await.unwrap();
    let batch = vec![
        order("a", "c1", 1.0),
        order("dup", "c1", 2.0),
        order("b", "c1", 3.0),
        order("bad", " ", 4.0),
    ];
    let err = orders.create_many(batch, &cancel).await.unwrap_err();
    match err {
        RepoError::Aggregate(aggregate) => {
            assert_eq!(aggregate.attempted, 4);
            let failed = aggregate
                .failures
                .iter()
                .map(|failure| (failure.index, failure.id.as_str()))
                .collect::<Vec<_>>();
            assert_eq!(failed, vec![(1, "dup"), (3, "bad")]);
            assert!(matches!(aggregate.failures[0].error, RepoError::Conflict { .. }));
            assert!(matches!(aggregate.failures[1].error, RepoError::InvalidItem { .. }));
        }
        other => panic!("expected aggregate error, got {other:?}"),
    }

    assert!(orders.exists("a", Some("c1"), &cancel).await.unwrap());
    assert!(orders.exists("b", Some("c1"), &cancel).await.unwrap());

    let created = orders
        .create_many(vec![order("x", "c2", 1.0), order("y", "c2", 2.0)], &cancel)
        .await
        .unwrap();
    let ids = created.iter().map(|order| order.header.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["x", "y"]);
}
