//! SQLite-backed `DocumentStore`.
//!
//! # Responsibility
//! - Persist containers and documents in one local database file.
//! - Run every SQLite call on the blocking pool so async callers never
//!   stall the runtime.
//!
//! # Invariants
//! - Each write runs in its own transaction; batches share one.
//! - Query order is row insertion order (`rowid`); replaces keep the row.
//! - Container properties are stored as JSON and loaded back verbatim.

use super::document::{
    check_if_match, check_partition_key, check_unique_keys, document_id, is_expired,
    now_epoch_seconds, stamp,
};
use super::{
    query_charge, BatchOperation, BatchOperationResult, BatchResponse, Container,
    ContainerProperties, DocumentStore, ItemResponse, QueryOptions, QueryPage, StoreError,
    StoreResult, READ_CHARGE, WRITE_CHARGE,
};
use crate::db::{open_db, open_db_in_memory};
use crate::query::engine::{page_rows, run};
use crate::query::QueryDefinition;
use async_trait::async_trait;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type SharedConnection = Arc<Mutex<Connection>>;
type SharedProperties = Arc<RwLock<ContainerProperties>>;

/// Durable document store over a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: SharedConnection,
    handles: Arc<Mutex<HashMap<String, Arc<SqliteContainer>>>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn handle(&self, properties: ContainerProperties) -> Arc<SqliteContainer> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = handles
            .entry(properties.name.clone())
            .or_insert_with(|| {
                Arc::new(SqliteContainer {
                    name: properties.name.clone(),
                    properties: Arc::new(RwLock::new(properties.clone())),
                    conn: Arc::clone(&self.conn),
                })
            });
        Arc::clone(handle)
    }
}

/// Runs `work` against the shared connection on the blocking pool.
async fn with_conn<R, F>(conn: &SharedConnection, work: F) -> StoreResult<R>
where
    R: Send + 'static,
    F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        work(&mut guard)
    })
    .await?
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_container_if_not_exists(
        &self,
        properties: ContainerProperties,
    ) -> StoreResult<Arc<dyn Container>> {
        let name = properties.name.clone();
        let stored = with_conn(&self.conn, move |conn| {
            let existing = conn
                .query_row(
                    "SELECT properties FROM containers WHERE name = ?1",
                    params![properties.name],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            if let Some(json) = existing {
                return Ok((serde_json::from_str::<ContainerProperties>(&json)?, false));
            }
            conn.execute(
                "INSERT INTO containers (name, properties, created_at) VALUES (?1, ?2, ?3)",
                params![
                    properties.name,
                    serde_json::to_string(&properties)?,
                    now_epoch_seconds()
                ],
            )?;
            Ok((properties, true))
        })
        .await;

        let (properties, created) = stored?;
        if created {
            info!(
                "event=container_create module=store status=ok store=sqlite container={}",
                name
            );
        }
        let container: Arc<dyn Container> = self.handle(properties);
        Ok(container)
    }

    async fn replace_container_properties(
        &self,
        properties: ContainerProperties,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(&properties)?;
        let name = properties.name.clone();
        let current = with_conn(&self.conn, move |conn| {
            let existing = conn
                .query_row(
                    "SELECT properties FROM containers WHERE name = ?1",
                    params![name],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::not_found(format!("container `{name}` does not exist")))?;
            let existing: ContainerProperties = serde_json::from_str(&existing)?;
            Ok(existing)
        })
        .await?;

        if current.partition_key_path != properties.partition_key_path {
            return Err(StoreError::bad_request(format!(
                "partition key path of container `{}` cannot change",
                properties.name
            )));
        }

        let name = properties.name.clone();
        with_conn(&self.conn, move |conn| {
            conn.execute(
                "UPDATE containers SET properties = ?2 WHERE name = ?1",
                params![name, json],
            )?;
            Ok(())
        })
        .await?;

        let handle = self.handle(properties.clone());
        *handle
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner) = properties;
        Ok(())
    }
}

#[derive(Debug)]
struct SqliteContainer {
    name: String,
    properties: SharedProperties,
    conn: SharedConnection,
}

struct StoredRow {
    etag: String,
    document: Value,
}

fn missing(id: &str, partition_key: &str) -> StoreError {
    StoreError::not_found(format!(
        "document `{id}` does not exist in partition `{partition_key}`"
    ))
}

fn load_live(
    conn: &Connection,
    properties: &ContainerProperties,
    partition_key: &str,
    id: &str,
    now: i64,
) -> StoreResult<Option<StoredRow>> {
    let row = conn
        .query_row(
            "SELECT etag, ts, body FROM documents
             WHERE container = ?1 AND partition_key = ?2 AND id = ?3",
            params![properties.name, partition_key, id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((etag, timestamp, body)) = row else {
        return Ok(None);
    };
    let document: Value = serde_json::from_str(&body)?;
    if is_expired(&document, timestamp, properties.default_time_to_live, now) {
        return Ok(None);
    }
    Ok(Some(StoredRow { etag, document }))
}

fn check_unique_in_partition(
    conn: &Connection,
    properties: &ContainerProperties,
    partition_key: &str,
    id: &str,
    document: &Value,
    now: i64,
) -> StoreResult<()> {
    if properties.unique_key_policy.is_empty() {
        return Ok(());
    }
    let mut statement = conn.prepare(
        "SELECT id, ts, body FROM documents WHERE container = ?1 AND partition_key = ?2",
    )?;
    let rows = statement.query_map(params![properties.name, partition_key], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut peers = Vec::new();
    for row in rows {
        let (peer_id, timestamp, body) = row?;
        let peer: Value = serde_json::from_str(&body)?;
        if !is_expired(&peer, timestamp, properties.default_time_to_live, now) {
            peers.push((peer_id, peer));
        }
    }
    check_unique_keys(
        &properties.unique_key_policy,
        id,
        document,
        peers.iter().map(|(peer_id, peer)| (peer_id.as_str(), peer)),
    )
}

fn create_in(
    conn: &Connection,
    properties: &ContainerProperties,
    partition_key: &str,
    mut document: Value,
    now: i64,
) -> StoreResult<(Value, String)> {
    let id = document_id(&document)?;
    check_partition_key(&document, &properties.partition_key_path, partition_key)?;
    if load_live(conn, properties, partition_key, &id, now)?.is_some() {
        return Err(StoreError::conflict(format!(
            "document `{id}` already exists in partition `{partition_key}`"
        )));
    }
    // An expired row still occupies the key.
    conn.execute(
        "DELETE FROM documents WHERE container = ?1 AND partition_key = ?2 AND id = ?3",
        params![properties.name, partition_key, id],
    )?;
    check_unique_in_partition(conn, properties, partition_key, &id, &document, now)?;

    let etag = stamp(&mut document, now)?;
    conn.execute(
        "INSERT INTO documents (container, partition_key, id, etag, ts, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            properties.name,
            partition_key,
            id,
            etag,
            now,
            serde_json::to_string(&document)?
        ],
    )?;
    Ok((document, etag))
}

fn replace_in(
    conn: &Connection,
    properties: &ContainerProperties,
    id: &str,
    partition_key: &str,
    mut document: Value,
    if_match: Option<&str>,
    now: i64,
) -> StoreResult<(Value, String)> {
    if document_id(&document)? != id {
        return Err(StoreError::bad_request(format!(
            "replacement body id does not match `{id}`"
        )));
    }
    check_partition_key(&document, &properties.partition_key_path, partition_key)?;
    let current =
        load_live(conn, properties, partition_key, id, now)?.ok_or_else(|| missing(id, partition_key))?;
    check_if_match(id, &current.etag, if_match)?;
    check_unique_in_partition(conn, properties, partition_key, id, &document, now)?;

    let etag = stamp(&mut document, now)?;
    conn.execute(
        "UPDATE documents SET etag = ?4, ts = ?5, body = ?6
         WHERE container = ?1 AND partition_key = ?2 AND id = ?3",
        params![
            properties.name,
            partition_key,
            id,
            etag,
            now,
            serde_json::to_string(&document)?
        ],
    )?;
    Ok((document, etag))
}

fn upsert_in(
    conn: &Connection,
    properties: &ContainerProperties,
    partition_key: &str,
    document: Value,
    if_match: Option<&str>,
    now: i64,
) -> StoreResult<(Value, String)> {
    let id = document_id(&document)?;
    if load_live(conn, properties, partition_key, &id, now)?.is_some() {
        return replace_in(conn, properties, &id, partition_key, document, if_match, now);
    }
    if if_match.is_some() {
        return Err(StoreError::precondition_failed(format!(
            "etag supplied for missing document `{id}`"
        )));
    }
    create_in(conn, properties, partition_key, document, now)
}

fn delete_in(
    conn: &Connection,
    properties: &ContainerProperties,
    id: &str,
    partition_key: &str,
    now: i64,
) -> StoreResult<()> {
    if load_live(conn, properties, partition_key, id, now)?.is_none() {
        return Err(missing(id, partition_key));
    }
    conn.execute(
        "DELETE FROM documents WHERE container = ?1 AND partition_key = ?2 AND id = ?3",
        params![properties.name, partition_key, id],
    )?;
    Ok(())
}

fn apply_in(
    conn: &Connection,
    properties: &ContainerProperties,
    partition_key: &str,
    operation: BatchOperation,
    now: i64,
) -> StoreResult<BatchOperationResult> {
    let (id, stored) = match operation {
        BatchOperation::Create { document } => {
            let id = document_id(&document)?;
            (id, Some(create_in(conn, properties, partition_key, document, now)?))
        }
        BatchOperation::Replace {
            id,
            document,
            if_match,
        } => {
            let stored = replace_in(
                conn,
                properties,
                &id,
                partition_key,
                document,
                if_match.as_deref(),
                now,
            )?;
            (id, Some(stored))
        }
        BatchOperation::Upsert { document } => {
            let id = document_id(&document)?;
            (id, Some(upsert_in(conn, properties, partition_key, document, None, now)?))
        }
        BatchOperation::Delete { id } => {
            delete_in(conn, properties, &id, partition_key, now)?;
            (id, None)
        }
    };
    let (document, etag) = match stored {
        Some((document, etag)) => (Some(document), Some(etag)),
        None => (None, None),
    };
    Ok(BatchOperationResult { id, document, etag })
}

impl SqliteContainer {
    fn snapshot(&self) -> ContainerProperties {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs one write in its own transaction.
    async fn write<F>(&self, op: &'static str, work: F) -> StoreResult<ItemResponse>
    where
        F: FnOnce(&Connection, &ContainerProperties, i64) -> StoreResult<(Value, String)>
            + Send
            + 'static,
    {
        let properties = self.snapshot();
        let (document, etag) = with_conn(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let stored = work(&*tx, &properties, now_epoch_seconds())?;
            tx.commit()?;
            Ok(stored)
        })
        .await?;
        debug!(
            "event=store_write module=store status=ok store=sqlite container={} op={} charge={}",
            self.name, op, WRITE_CHARGE
        );
        Ok(ItemResponse {
            document,
            etag,
            request_charge: WRITE_CHARGE,
        })
    }
}

#[async_trait]
impl Container for SqliteContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> ContainerProperties {
        self.snapshot()
    }

    async fn create_item(
        &self,
        partition_key: &str,
        document: Value,
    ) -> StoreResult<ItemResponse> {
        let partition_key = partition_key.to_string();
        self.write("create", move |conn, properties, now| {
            create_in(conn, properties, &partition_key, document, now)
        })
        .await
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> StoreResult<ItemResponse> {
        let properties = self.snapshot();
        let (id, partition_key) = (id.to_string(), partition_key.to_string());
        with_conn(&self.conn, move |conn| {
            let row = load_live(conn, &properties, &partition_key, &id, now_epoch_seconds())?
                .ok_or_else(|| missing(&id, &partition_key))?;
            Ok(ItemResponse {
                document: row.document,
                etag: row.etag,
                request_charge: READ_CHARGE,
            })
        })
        .await
    }

    async fn replace_item(
        &self,
        id: &str,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> StoreResult<ItemResponse> {
        let (id, partition_key) = (id.to_string(), partition_key.to_string());
        let if_match = if_match.map(str::to_string);
        self.write("replace", move |conn, properties, now| {
            replace_in(
                conn,
                properties,
                &id,
                &partition_key,
                document,
                if_match.as_deref(),
                now,
            )
        })
        .await
    }

    async fn upsert_item(
        &self,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> StoreResult<ItemResponse> {
        let partition_key = partition_key.to_string();
        let if_match = if_match.map(str::to_string);
        self.write("upsert", move |conn, properties, now| {
            upsert_in(
                conn,
                properties,
                &partition_key,
                document,
                if_match.as_deref(),
                now,
            )
        })
        .await
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> StoreResult<f64> {
        let properties = self.snapshot();
        let (id, partition_key) = (id.to_string(), partition_key.to_string());
        with_conn(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            delete_in(&tx, &properties, &id, &partition_key, now_epoch_seconds())?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(WRITE_CHARGE)
    }

    async fn query_page(
        &self,
        query: &QueryDefinition,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> StoreResult<QueryPage> {
        let properties = self.snapshot();
        let query = query.clone();
        let options = options.clone();
        let continuation = continuation.map(str::to_string);
        let name = self.name.clone();

        let page = with_conn(&self.conn, move |conn| {
            let now = now_epoch_seconds();
            let mut statement = conn.prepare(
                "SELECT ts, body FROM documents
                 WHERE container = ?1 AND (?2 IS NULL OR partition_key = ?2)
                 ORDER BY rowid",
            )?;
            let rows = statement.query_map(params![properties.name, options.partition_key], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut documents = Vec::new();
            for row in rows {
                let (timestamp, body) = row?;
                let document: Value = serde_json::from_str(&body)?;
                if !is_expired(&document, timestamp, properties.default_time_to_live, now) {
                    documents.push(document);
                }
            }

            let rows = run(&query, &documents, properties.vector_embedding_policy.as_ref())?;
            let (documents, continuation) =
                page_rows(rows, continuation.as_deref(), options.max_item_count)?;
            let request_charge = query_charge(documents.len());
            Ok(QueryPage {
                documents,
                continuation,
                request_charge,
            })
        })
        .await?;

        debug!(
            "event=store_query module=store status=ok store=sqlite container={} rows={} charge={}",
            name,
            page.documents.len(),
            page.request_charge
        );
        Ok(page)
    }

    async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<BatchResponse> {
        let properties = self.snapshot();
        let partition_key = partition_key.to_string();
        let response = with_conn(&self.conn, move |conn| {
            let now = now_epoch_seconds();
            let tx = conn.transaction()?;
            let mut results = Vec::with_capacity(operations.len());
            for (index, operation) in operations.into_iter().enumerate() {
                let name = operation.name();
                let result = apply_in(&tx, &properties, &partition_key, operation, now).map_err(
                    |err| {
                        StoreError::new(
                            err.kind,
                            format!("batch operation {index} ({name}) failed: {}", err.message),
                        )
                    },
                )?;
                results.push(result);
            }
            tx.commit()?;
            let request_charge = WRITE_CHARGE * results.len() as f64;
            Ok(BatchResponse {
                results,
                request_charge,
            })
        })
        .await?;

        debug!(
            "event=store_batch module=store status=ok store=sqlite container={} operations={} charge={}",
            self.name,
            response.results.len(),
            response.request_charge
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::query::QueryDefinition;
    use crate::store::{ContainerProperties, DocumentStore, QueryOptions, StoreErrorKind};
    use serde_json::json;

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("docs.sqlite3");

        {
            let store = SqliteStore::open(&path).expect("open store");
            let container = store
                .create_container_if_not_exists(ContainerProperties::new("orders", "/customerId"))
                .await
                .expect("create container");
            container
                .create_item("c1", json!({"id": "o1", "customerId": "c1", "total": 3}))
                .await
                .expect("create item");
        }

        let store = SqliteStore::open(&path).expect("reopen store");
        let container = store
            .create_container_if_not_exists(ContainerProperties::new("orders", "/ignored"))
            .await
            .expect("existing container");
        assert_eq!(container.properties().partition_key_path, "/customerId");

        let read = container.read_item("o1", "c1").await.expect("read item");
        assert_eq!(read.document["total"], json!(3));
        assert_eq!(read.document["_etag"], json!(read.etag));
    }

    #[tokio::test]
    async fn replace_keeps_query_order_and_checks_etag() {
        let store = SqliteStore::open_in_memory().expect("open store");
        let container = store
            .create_container_if_not_exists(ContainerProperties::new("orders", "/customerId"))
            .await
            .expect("create container");
        let first = container
            .create_item("c1", json!({"id": "a", "customerId": "c1"}))
            .await
            .expect("create a");
        container
            .create_item("c1", json!({"id": "b", "customerId": "c1"}))
            .await
            .expect("create b");

        let err = container
            .replace_item("a", "c1", json!({"id": "a", "customerId": "c1"}), Some("\"old\""))
            .await
            .expect_err("stale etag");
        assert_eq!(err.kind, StoreErrorKind::PreconditionFailed);

        container
            .replace_item(
                "a",
                "c1",
                json!({"id": "a", "customerId": "c1", "touched": true}),
                Some(&first.etag),
            )
            .await
            .expect("replace a");

        let page = container
            .query_page(
                &QueryDefinition::new("SELECT VALUE c.id FROM c"),
                &QueryOptions::default(),
                None,
            )
            .await
            .expect("query");
        assert_eq!(page.documents, vec![json!("a"), json!("b")]);
    }
}
