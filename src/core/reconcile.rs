//! Source reconciliation: merging archive-origin and API-origin copies of
//! the same logical entity.
//!
//! Merging is a pure function with three precedence rules:
//! - a non-null field from the API copy wins over the archive copy
//! - a field present only in the archive copy is retained
//! - numeric engagement counters take the maximum of the two values, so a
//!   stale re-import can never regress a count
//!
//! Two different non-null values for an immutable identity field cannot be
//! resolved and surface as [`RookeryError::ReconciliationConflict`]; the
//! caller keeps the pre-existing record unchanged.

use serde_json::{Map, Value};

use crate::core::models::{CachedRecord, RecordSource};
use crate::error::{Result, RookeryError};

/// Merge an incoming record into an existing cached copy of the same entity.
///
/// Pure: no hidden state, and `merge(merge(a, b), b) == merge(a, b)`.
///
/// # Errors
///
/// Returns [`RookeryError::Validation`] if the two records have different
/// natural keys, and [`RookeryError::ReconciliationConflict`] if an immutable
/// field holds two different non-null values.
pub fn merge(existing: &CachedRecord, incoming: &CachedRecord) -> Result<CachedRecord> {
    if existing.key() != incoming.key() {
        return Err(RookeryError::Validation(format!(
            "cannot merge records with different keys: {}/{} vs {}/{}",
            existing.entity_type, existing.entity_id, incoming.entity_type, incoming.entity_id,
        )));
    }

    // API-sourced fields take precedence. With matching sources the incoming
    // copy is treated as fresher.
    let (preferred, secondary) = match (existing.source, incoming.source) {
        (RecordSource::Api, RecordSource::Archive) => (existing, incoming),
        _ => (incoming, existing),
    };

    for field in existing.entity_type.immutable_fields() {
        let a = existing.payload.get(*field);
        let b = incoming.payload.get(*field);
        if let (Some(a), Some(b)) = (a, b) {
            if !a.is_null() && !b.is_null() && a != b {
                return Err(RookeryError::ReconciliationConflict {
                    entity_type: existing.entity_type.as_str().to_string(),
                    entity_id: existing.entity_id.clone(),
                    field: (*field).to_string(),
                });
            }
        }
    }

    let payload = merge_values(&preferred.payload, &secondary.payload);
    let source = if existing.source == RecordSource::Api || incoming.source == RecordSource::Api {
        RecordSource::Api
    } else {
        RecordSource::Archive
    };

    Ok(CachedRecord {
        entity_type: existing.entity_type,
        entity_id: existing.entity_id.clone(),
        owner: preferred.owner.clone(),
        payload,
        source,
        fetched_at: existing.fetched_at.max(incoming.fetched_at),
        expires_at: existing.expires_at.max(incoming.expires_at),
    })
}

/// Duplicate detection by natural key. The provider's identifier is
/// authoritative; no fuzzy matching.
#[must_use]
pub fn is_duplicate(candidate: &CachedRecord, existing: &CachedRecord) -> bool {
    candidate.key() == existing.key()
}

/// Field-level union of two JSON values, preferred copy first.
fn merge_values(preferred: &Value, secondary: &Value) -> Value {
    match (preferred, secondary) {
        (Value::Object(p), Value::Object(s)) => Value::Object(merge_objects(p, s)),
        (Value::Null, other) => other.clone(),
        (kept, _) => kept.clone(),
    }
}

fn merge_objects(preferred: &Map<String, Value>, secondary: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = Map::new();
    for (key, p_val) in preferred {
        match secondary.get(key) {
            Some(s_val) => merged.insert(key.clone(), merge_field(key, p_val, s_val)),
            None => merged.insert(key.clone(), p_val.clone()),
        };
    }
    // Fields present only in the secondary copy are retained.
    for (key, s_val) in secondary {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), s_val.clone());
        }
    }
    merged
}

fn merge_field(key: &str, preferred: &Value, secondary: &Value) -> Value {
    if is_counter_field(key) && preferred.is_number() && secondary.is_number() {
        return max_number(preferred, secondary);
    }
    match (preferred, secondary) {
        (Value::Object(p), Value::Object(s)) => Value::Object(merge_objects(p, s)),
        (Value::Null, other) => other.clone(),
        (kept, _) => kept.clone(),
    }
}

/// Counters are monotonic from the provider's perspective; they are merged
/// with `max`, never overwritten.
fn is_counter_field(key: &str) -> bool {
    key.ends_with("_count") || key == "tweet_volume"
}

fn max_number(a: &Value, b: &Value) -> Value {
    let a_num = a.as_f64().unwrap_or(f64::MIN);
    let b_num = b.as_f64().unwrap_or(f64::MIN);
    if a_num >= b_num { a.clone() } else { b.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::EntityType;
    use chrono::{TimeDelta, Utc};
    use serde_json::json;

    fn record(source: RecordSource, payload: Value) -> CachedRecord {
        CachedRecord {
            entity_type: EntityType::Post,
            entity_id: "100".to_string(),
            owner: "acct".to_string(),
            payload,
            source,
            fetched_at: Utc::now(),
            expires_at: Utc::now() + TimeDelta::hours(24),
        }
    }

    #[test]
    fn test_api_non_null_wins_over_archive() {
        let archive = record(
            RecordSource::Archive,
            json!({"id": "100", "text": "old text", "lang": "en"}),
        );
        let api = record(RecordSource::Api, json!({"id": "100", "text": "new text"}));

        let merged = merge(&archive, &api).unwrap();
        assert_eq!(merged.payload["text"], "new text");
        // Archive-only field retained.
        assert_eq!(merged.payload["lang"], "en");
        assert_eq!(merged.source, RecordSource::Api);
    }

    #[test]
    fn test_archive_field_survives_sparser_api_payload() {
        // Incoming archive must not regress an existing API record either.
        let api = record(RecordSource::Api, json!({"id": "100", "text": "fresh"}));
        let archive = record(
            RecordSource::Archive,
            json!({"id": "100", "text": "from export", "archived_note": "kept"}),
        );

        let merged = merge(&api, &archive).unwrap();
        assert_eq!(merged.payload["text"], "fresh");
        assert_eq!(merged.payload["archived_note"], "kept");
    }

    #[test]
    fn test_counters_take_maximum() {
        // Archive import saw like_count=3; a later, anomalous API response
        // reports 1. The merged record keeps 3.
        let archive = record(
            RecordSource::Archive,
            json!({"id": "100", "public_metrics": {"like_count": 3, "reply_count": 0}}),
        );
        let api = record(
            RecordSource::Api,
            json!({"id": "100", "public_metrics": {"like_count": 1, "reply_count": 2}}),
        );

        let merged = merge(&archive, &api).unwrap();
        assert_eq!(merged.payload["public_metrics"]["like_count"], 3);
        assert_eq!(merged.payload["public_metrics"]["reply_count"], 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = record(
            RecordSource::Archive,
            json!({"id": "100", "text": "a", "public_metrics": {"like_count": 7}}),
        );
        let b = record(
            RecordSource::Api,
            json!({"id": "100", "text": "b", "public_metrics": {"like_count": 4}, "lang": "en"}),
        );

        let once = merge(&a, &b).unwrap();
        let twice = merge(&once, &b).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_null_api_field_falls_back_to_archive() {
        let archive = record(RecordSource::Archive, json!({"id": "100", "geo": {"place": "x"}}));
        let api = record(RecordSource::Api, json!({"id": "100", "geo": null}));

        let merged = merge(&archive, &api).unwrap();
        assert_eq!(merged.payload["geo"]["place"], "x");
    }

    #[test]
    fn test_immutable_field_conflict_surfaces() {
        let a = record(
            RecordSource::Archive,
            json!({"id": "100", "author_id": "u1", "text": "t"}),
        );
        let b = record(
            RecordSource::Api,
            json!({"id": "100", "author_id": "u2", "text": "t"}),
        );

        let err = merge(&a, &b).unwrap_err();
        match err {
            RookeryError::ReconciliationConflict { field, .. } => assert_eq!(field, "author_id"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_keys_rejected() {
        let a = record(RecordSource::Api, json!({"id": "100"}));
        let mut b = record(RecordSource::Api, json!({"id": "200"}));
        b.entity_id = "200".to_string();

        assert!(matches!(
            merge(&a, &b).unwrap_err(),
            RookeryError::Validation(_)
        ));
    }

    #[test]
    fn test_duplicate_detection_by_natural_key() {
        let a = record(RecordSource::Api, json!({"id": "100"}));
        let b = record(RecordSource::Archive, json!({"id": "100", "extra": 1}));
        assert!(is_duplicate(&a, &b));

        let mut c = b.clone();
        c.entity_id = "101".to_string();
        assert!(!is_duplicate(&a, &c));
    }

    #[test]
    fn test_timestamps_never_regress() {
        let older = Utc::now() - TimeDelta::hours(2);
        let newer = Utc::now();
        let mut a = record(RecordSource::Archive, json!({"id": "100"}));
        a.fetched_at = newer;
        a.expires_at = newer + TimeDelta::hours(24);
        let mut b = record(RecordSource::Api, json!({"id": "100"}));
        b.fetched_at = older;
        b.expires_at = older + TimeDelta::hours(1);

        let merged = merge(&a, &b).unwrap();
        assert_eq!(merged.fetched_at, newer);
        assert_eq!(merged.expires_at, newer + TimeDelta::hours(24));
    }
}
