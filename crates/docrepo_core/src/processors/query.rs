//! Drains paged store queries into typed results.
//!
//! # Invariants
//! - Pages are consumed in store order until the continuation runs out.
//! - The reported request charge is the sum over every page fetched.

use crate::error::RepoResult;
use crate::query::QueryDefinition;
use crate::store::{Container, QueryOptions};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One page of typed results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back to fetch the next page; `None` once drained.
    pub continuation: Option<String>,
    pub request_charge: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryIterationProcessor;

impl QueryIterationProcessor {
    /// Runs `query` to completion and deserializes every row as `T`.
    pub async fn iterate<T: DeserializeOwned>(
        &self,
        container: &dyn Container,
        query: &QueryDefinition,
        options: &QueryOptions,
    ) -> RepoResult<(Vec<T>, f64)> {
        let (values, charge) = self.iterate_values(container, query, options).await?;
        let items = values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        Ok((items, charge))
    }

    /// Runs `query` to completion and returns raw rows.
    pub async fn iterate_values(
        &self,
        container: &dyn Container,
        query: &QueryDefinition,
        options: &QueryOptions,
    ) -> RepoResult<(Vec<Value>, f64)> {
        let mut rows = Vec::new();
        let mut total_charge = 0.0;
        let mut continuation: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = container
                .query_page(query, options, continuation.as_deref())
                .await?;
            pages += 1;
            total_charge += page.request_charge;
            rows.extend(page.documents);
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }

        debug!(
            "event=query_iterate module=query_processor status=ok container={} pages={} rows={} charge={}",
            container.name(),
            pages,
            rows.len(),
            total_charge
        );
        Ok((rows, total_charge))
    }

    /// Fetches a single page starting at `continuation`.
    pub async fn page<T: DeserializeOwned>(
        &self,
        container: &dyn Container,
        query: &QueryDefinition,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> RepoResult<Page<T>> {
        let page = container.query_page(query, options, continuation).await?;
        let items = page
            .documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        debug!(
            "event=query_page module=query_processor status=ok container={} rows={} has_more={} charge={}",
            container.name(),
            items.len(),
            page.continuation.is_some(),
            page.request_charge
        );
        Ok(Page {
            items,
            continuation: page.continuation,
            request_charge: page.request_charge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::QueryIterationProcessor;
    use crate::query::QueryDefinition;
    use crate::store::{ContainerProperties, DocumentStore, MemoryStore, QueryOptions};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn drains_every_page_and_sums_charge() {
        let store = MemoryStore::new();
        let container = store
            .create_container_if_not_exists(ContainerProperties::new("numbers", "/id"))
            .await
            .expect("create container");
        for n in 0..7 {
            container
                .create_item(&format!("n{n}"), json!({"id": format!("n{n}"), "n": n}))
                .await
                .expect("seed");
        }

        let options = QueryOptions::default().with_max_item_count(3);
        let (rows, charge): (Vec<Value>, f64) = QueryIterationProcessor
            .iterate(
                container.as_ref(),
                &QueryDefinition::new("SELECT VALUE c.n FROM c"),
                &options,
            )
            .await
            .expect("iterate");

        assert_eq!(rows, (0..7).map(Value::from).collect::<Vec<_>>());
        // three pages: 2.5 base each plus 0.1 per row
        assert!((charge - (3.0 * 2.5 + 0.7)).abs() < 1e-9);
    }
}
