//! Core data models for cached records, sync cursors, and fetch results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::EntityType;

// =============================================================================
// Record provenance
// =============================================================================

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// One-time bulk archive import.
    Archive,
    /// Live provider API fetch.
    Api,
}

impl RecordSource {
    /// Stable tag stored in the cache table's `source` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Api => "api",
        }
    }

    /// Parse from the stored column value.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "archive" => Some(Self::Archive),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cached record
// =============================================================================

/// One cached entity snapshot.
///
/// Exactly one live record exists per (`entity_type`, `entity_id`). The
/// payload is the provider's native document plus any derived fields; it is
/// stored verbatim so field-level reconciliation can see everything both
/// sources produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Account or parent object the record was fetched for.
    pub owner: String,
    pub payload: serde_json::Value,
    pub source: RecordSource,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedRecord {
    /// Natural key for duplicate detection.
    #[must_use]
    pub fn key(&self) -> (EntityType, &str) {
        (self.entity_type, self.entity_id.as_str())
    }

    /// Whether the record is fresh at `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// =============================================================================
// Sync cursor
// =============================================================================

/// Incremental sync position for one (entity type, owner) pair.
///
/// Created on first sync, advanced monotonically on each successful
/// incremental fetch, rewound only by explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub entity_type: EntityType,
    pub owner: String,
    /// Opaque pagination token from the provider's `meta.next_token`.
    pub last_position: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

// =============================================================================
// Provider wire types
// =============================================================================

/// Quota counters reported by the provider on some responses.
///
/// Parsed from `x-rate-limit-remaining` / `x-rate-limit-reset` headers.
/// Provider-reported state always overrides the local estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaHeaders {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// One raw record as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub entity_id: String,
    pub payload: serde_json::Value,
}

/// A page of provider records plus response metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPage {
    pub records: Vec<ProviderRecord>,
    /// Opaque token for the next page, if any.
    pub next_token: Option<String>,
    /// Authoritative quota counters, when the provider sent them.
    pub quota: Option<QuotaHeaders>,
}

// =============================================================================
// Fetch results
// =============================================================================

/// Per-source record counts in a fetch result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub archive: usize,
    pub api: usize,
}

impl SourceBreakdown {
    /// Tally the sources of a record slice.
    #[must_use]
    pub fn of(records: &[CachedRecord]) -> Self {
        let mut breakdown = Self::default();
        for record in records {
            match record.source {
                RecordSource::Archive => breakdown.archive += 1,
                RecordSource::Api => breakdown.api += 1,
            }
        }
        breakdown
    }

    /// Total record count.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.archive + self.api
    }
}

/// Result of a fetch request: records plus freshness and provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub records: Vec<CachedRecord>,
    /// True when quota exhaustion forced serving an expired cached copy.
    pub stale: bool,
    pub source_breakdown: SourceBreakdown,
}

impl FetchOutcome {
    /// Build an outcome from records, computing the breakdown.
    #[must_use]
    pub fn new(records: Vec<CachedRecord>, stale: bool) -> Self {
        let source_breakdown = SourceBreakdown::of(&records);
        Self {
            records,
            stale,
            source_breakdown,
        }
    }
}

/// Summary of a bulk archive import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Records inserted fresh.
    pub inserted: usize,
    /// Records merged into an existing cached copy.
    pub merged: usize,
    /// Records skipped because reconciliation hit a hard conflict.
    pub conflicts: usize,
}

// =============================================================================
// Engine stats
// =============================================================================

/// Quota state for one endpoint, as reported by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointQuota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Snapshot of engine state for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Live cached record counts keyed by entity type name.
    pub cache_counts_by_type: HashMap<String, u64>,
    /// Quota state keyed by endpoint id.
    pub quota_state_by_endpoint: HashMap<String, EndpointQuota>,
    /// Last successful sync time keyed by "entity_type:owner".
    pub last_sync_times: HashMap<String, DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn record(source: RecordSource) -> CachedRecord {
        CachedRecord {
            entity_type: EntityType::Post,
            entity_id: "1".to_string(),
            owner: "acct".to_string(),
            payload: json!({"id": "1"}),
            source,
            fetched_at: Utc::now(),
            expires_at: Utc::now() + TimeDelta::hours(24),
        }
    }

    #[test]
    fn test_record_source_round_trip() {
        assert_eq!(
            RecordSource::from_str_opt(RecordSource::Archive.as_str()),
            Some(RecordSource::Archive)
        );
        assert_eq!(
            RecordSource::from_str_opt(RecordSource::Api.as_str()),
            Some(RecordSource::Api)
        );
        assert_eq!(RecordSource::from_str_opt("scraped"), None);
    }

    #[test]
    fn test_freshness_boundary() {
        let rec = record(RecordSource::Api);
        assert!(rec.is_fresh_at(Utc::now()));
        assert!(!rec.is_fresh_at(rec.expires_at));
        assert!(!rec.is_fresh_at(rec.expires_at + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_source_breakdown_tally() {
        let records = vec![
            record(RecordSource::Api),
            record(RecordSource::Archive),
            record(RecordSource::Api),
        ];
        let breakdown = SourceBreakdown::of(&records);
        assert_eq!(breakdown.api, 2);
        assert_eq!(breakdown.archive, 1);
        assert_eq!(breakdown.total(), 3);
    }

    #[test]
    fn test_fetch_outcome_computes_breakdown() {
        let outcome = FetchOutcome::new(vec![record(RecordSource::Archive)], true);
        assert!(outcome.stale);
        assert_eq!(outcome.source_breakdown.archive, 1);
        assert_eq!(outcome.source_breakdown.api, 0);
    }
}
