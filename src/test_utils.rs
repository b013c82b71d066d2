//! Test utilities for rookery.
//!
//! Shared factories for cached records, provider pages, and credentials,
//! used across unit and integration tests.
//!
//! ```rust,ignore
//! use rookery::test_utils::*;
//!
//! let record = make_test_record(EntityType::Post, "1", RecordSource::Api);
//! let page = make_test_page(&["1", "2"]);
//! ```

use chrono::{TimeDelta, Utc};
use serde_json::json;

use crate::core::credential::Credentials;
use crate::core::entity::EntityType;
use crate::core::models::{CachedRecord, ProviderPage, ProviderRecord, RecordSource};

/// Create a cached record with a realistic payload, owned by `"test-owner"`,
/// fetched now and expiring in 24 hours.
#[must_use]
pub fn make_test_record(entity_type: EntityType, entity_id: &str, source: RecordSource) -> CachedRecord {
    let now = Utc::now();
    CachedRecord {
        entity_type,
        entity_id: entity_id.to_string(),
        owner: "test-owner".to_string(),
        payload: json!({
            "id": entity_id,
            "text": format!("payload for {entity_id}"),
            "like_count": 3,
        }),
        source,
        fetched_at: now,
        expires_at: now + TimeDelta::hours(24),
    }
}

/// Create a cached record that expired `hours_ago` hours in the past.
#[must_use]
pub fn make_expired_record(entity_type: EntityType, entity_id: &str, hours_ago: i64) -> CachedRecord {
    let now = Utc::now();
    CachedRecord {
        expires_at: now - TimeDelta::hours(hours_ago),
        fetched_at: now - TimeDelta::hours(hours_ago + 1),
        ..make_test_record(entity_type, entity_id, RecordSource::Api)
    }
}

/// Create a provider record with a minimal payload.
#[must_use]
pub fn make_provider_record(entity_id: &str) -> ProviderRecord {
    ProviderRecord {
        entity_id: entity_id.to_string(),
        payload: json!({"id": entity_id, "text": format!("payload for {entity_id}")}),
    }
}

/// Create a single provider page holding the given record ids, with no
/// pagination token or quota headers.
#[must_use]
pub fn make_test_page(entity_ids: &[&str]) -> ProviderPage {
    ProviderPage {
        records: entity_ids.iter().map(|id| make_provider_record(id)).collect(),
        next_token: None,
        quota: None,
    }
}

/// App-auth credentials safe to embed in tests.
#[must_use]
pub fn make_test_credentials() -> Credentials {
    Credentials::App {
        bearer_token: "test-bearer-token".to_string(),
    }
}

/// User-auth credentials with a distinguishing access token.
#[must_use]
pub fn make_test_user_credentials(access_token: &str) -> Credentials {
    Credentials::User {
        api_key: "test-key".to_string(),
        api_secret: "test-key-secret".to_string(),
        access_token: access_token.to_string(),
        access_token_secret: "test-token-secret".to_string(),
    }
}
