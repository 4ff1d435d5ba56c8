//! Document bookkeeping shared by the bundled store adapters.
//!
//! # Invariants
//! - Every stored document carries `_etag` (quoted UUID) and `_ts` (epoch
//!   seconds), rewritten on each successful write.
//! - A document's own partition key value, when present, must equal the
//!   partition key the caller routed it with.

use super::{StoreError, StoreResult};
use crate::options::UniqueKeyPolicy;
use serde_json::Value;
use uuid::Uuid;

pub(crate) const ETAG_FIELD: &str = "_etag";
pub(crate) const TIMESTAMP_FIELD: &str = "_ts";

pub(crate) fn new_etag() -> String {
    format!("\"{}\"", Uuid::new_v4())
}

pub(crate) fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Reads the non-empty string `id` of `document`.
pub(crate) fn document_id(document: &Value) -> StoreResult<String> {
    match document.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(_) => Err(StoreError::bad_request("document `id` must be a non-empty string")),
        None => Err(StoreError::bad_request("document is missing `id`")),
    }
}

/// Resolves a `/a/b` path inside `document`.
pub(crate) fn value_at_path<'v>(document: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

fn partition_key_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Rejects documents whose own partition key disagrees with `partition_key`.
pub(crate) fn check_partition_key(
    document: &Value,
    partition_key_path: &str,
    partition_key: &str,
) -> StoreResult<()> {
    match value_at_path(document, partition_key_path) {
        Some(value) if partition_key_text(value) != partition_key => {
            Err(StoreError::bad_request(format!(
                "partition key `{partition_key}` does not match document value at `{partition_key_path}`"
            )))
        }
        _ => Ok(()),
    }
}

/// Writes fresh system properties into `document` and returns the new etag.
pub(crate) fn stamp(document: &mut Value, timestamp: i64) -> StoreResult<String> {
    let etag = new_etag();
    let object = document
        .as_object_mut()
        .ok_or_else(|| StoreError::bad_request("document must be a JSON object"))?;
    object.insert(ETAG_FIELD.to_string(), Value::String(etag.clone()));
    object.insert(TIMESTAMP_FIELD.to_string(), Value::from(timestamp));
    Ok(etag)
}

pub(crate) fn check_if_match(id: &str, current_etag: &str, if_match: Option<&str>) -> StoreResult<()> {
    match if_match {
        Some(expected) if expected != current_etag => Err(StoreError::precondition_failed(format!(
            "etag mismatch for document `{id}`"
        ))),
        _ => Ok(()),
    }
}

/// Finds a unique-key collision between `candidate` and other documents of
/// the same logical partition. Missing paths compare as `null`.
pub(crate) fn check_unique_keys<'d>(
    policy: &UniqueKeyPolicy,
    candidate_id: &str,
    candidate: &Value,
    partition_peers: impl Iterator<Item = (&'d str, &'d Value)> + Clone,
) -> StoreResult<()> {
    for key in &policy.unique_keys {
        let tuple = |document: &Value| {
            key.paths
                .iter()
                .map(|path| value_at_path(document, path).cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>()
        };
        let expected = tuple(candidate);
        let collision = partition_peers
            .clone()
            .filter(|(id, _)| *id != candidate_id)
            .any(|(_, peer)| tuple(peer) == expected);
        if collision {
            return Err(StoreError::conflict(format!(
                "unique key ({}) already used in partition",
                key.paths.join(", ")
            )));
        }
    }
    Ok(())
}

/// Whether `document` written at `timestamp` has outlived its time-to-live.
pub(crate) fn is_expired(
    document: &Value,
    timestamp: i64,
    default_time_to_live: Option<i32>,
    now: i64,
) -> bool {
    let Some(container_ttl) = default_time_to_live else {
        return false;
    };
    let ttl = document
        .get("ttl")
        .and_then(Value::as_i64)
        .unwrap_or(i64::from(container_ttl));
    ttl > 0 && timestamp.saturating_add(ttl) <= now
}

#[cfg(test)]
mod tests {
    use super::{
        check_if_match, check_partition_key, check_unique_keys, document_id, is_expired, stamp,
        value_at_path, ETAG_FIELD,
    };
    use crate::options::{UniqueKey, UniqueKeyPolicy};
    use crate::store::StoreErrorKind;
    use serde_json::json;

    #[test]
    fn reads_ids_and_nested_paths() {
        let document = json!({"id": "a", "customer": {"id": "c1"}});
        assert_eq!(document_id(&document).expect("id present"), "a");
        assert_eq!(value_at_path(&document, "/customer/id"), Some(&json!("c1")));
        assert!(document_id(&json!({"id": ""})).is_err());
    }

    #[test]
    fn partition_key_must_match_document_value() {
        let document = json!({"id": "a", "customerId": "c1"});
        assert!(check_partition_key(&document, "/customerId", "c1").is_ok());
        let err = check_partition_key(&document, "/customerId", "c2").expect_err("mismatch");
        assert_eq!(err.kind, StoreErrorKind::BadRequest);
        assert!(check_partition_key(&document, "/missing", "anything").is_ok());
    }

    #[test]
    fn stamp_rewrites_etag() {
        let mut document = json!({"id": "a"});
        let first = stamp(&mut document, 10).expect("stamp");
        let second = stamp(&mut document, 11).expect("stamp");
        assert_ne!(first, second);
        assert_eq!(document[ETAG_FIELD], json!(second));
        assert_eq!(document["_ts"], json!(11));
        assert!(check_if_match("a", &second, Some(&first)).is_err());
        assert!(check_if_match("a", &second, None).is_ok());
    }

    #[test]
    fn unique_keys_conflict_within_partition() {
        let policy = UniqueKeyPolicy {
            unique_keys: vec![UniqueKey {
                paths: vec!["/email".to_string()],
            }],
        };
        let existing = json!({"id": "u1", "email": "a@example.com"});
        let peers = vec![("u1", &existing)];

        let duplicate = json!({"id": "u2", "email": "a@example.com"});
        let err = check_unique_keys(&policy, "u2", &duplicate, peers.iter().copied())
            .expect_err("duplicate email");
        assert_eq!(err.kind, StoreErrorKind::Conflict);

        let same_document = json!({"id": "u1", "email": "a@example.com"});
        assert!(check_unique_keys(&policy, "u1", &same_document, peers.iter().copied()).is_ok());
    }

    #[test]
    fn expiry_honours_item_and_container_ttl() {
        let plain = json!({"id": "a"});
        let short = json!({"id": "b", "ttl": 5});
        assert!(!is_expired(&plain, 0, None, 1_000));
        assert!(!is_expired(&plain, 0, Some(-1), 1_000));
        assert!(is_expired(&short, 0, Some(-1), 5));
        assert!(!is_expired(&short, 0, Some(-1), 4));
        assert!(is_expired(&plain, 0, Some(60), 61));
    }
}
