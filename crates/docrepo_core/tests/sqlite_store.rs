mod common;

use common::{factory, invoice, order, Invoice, Order};
use docrepo_core::db::migrations::latest_version;
use docrepo_core::db::{open_db, DbError};
use docrepo_core::{field, CancellationToken, RepoError, Repository, SqliteStore};
use rusqlite::Connection;
use std::sync::Arc;

#[tokio::test]
async fn items_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.db");
    let cancel = CancellationToken::new();

    let created = {
        let orders = factory(Arc::new(SqliteStore::open(&path).unwrap()))
            .repository::<Order>()
            .unwrap();
        orders.create(order("o1", "c1", 42.0), &cancel).await.unwrap()
    };

    let orders = factory(Arc::new(SqliteStore::open(&path).unwrap()))
        .repository::<Order>()
        .unwrap();
    let loaded = orders.get("o1", Some("c1"), &cancel).await.unwrap();
    assert_eq!(loaded, created);

    let mut stale = loaded.clone();
    let mut current = loaded;
    current.status = "paid".to_string();
    orders.update(current, false, &cancel).await.unwrap();

    stale.status = "void".to_string();
    let err = orders.update(stale, false, &cancel).await.unwrap_err();
    assert!(matches!(err, RepoError::ConcurrencyConflict { .. }));
}

#[tokio::test]
async fn shared_container_queries_stay_scoped() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let factory = factory(store);
    let orders = factory.repository::<Order>().unwrap();
    let invoices = factory.repository::<Invoice>().unwrap();
    let cancel = CancellationToken::new();

    orders.create(order("o1", "c1", 10.0), &cancel).await.unwrap();
    orders.create(order("o2", "c2", 30.0), &cancel).await.unwrap();
    invoices
        .create(invoice("i1", "c1", 10.0), &cancel)
        .await
        .unwrap();

    let cheap = orders
        .get_where(field("total").lt(20.0), &cancel)
        .await
        .unwrap();
    assert_eq!(cheap.len(), 1);
    assert_eq!(cheap[0].header.id, "o1");
    assert_eq!(invoices.count_where(docrepo_core::Filter::All, &cancel).await.unwrap(), 1);

    assert!(orders.try_delete("o1", Some("c1"), &cancel).await.unwrap());
    assert!(orders.try_get("o1", Some("c1"), &cancel).await.unwrap().is_none());
    assert!(invoices.exists("i1", Some("c1"), &cancel).await.unwrap());
}

#[test]
fn open_db_applies_all_migrations_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docrepo.db");

    let first = open_db(&path).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    for table in ["containers", "documents"] {
        let exists: i64 = second
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1, "missing table {table}");
    }
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(SqliteStore::open(&path).is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap()
}
