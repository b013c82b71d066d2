//! Durable cache of entity snapshots plus sync cursors.
//!
//! Backed by SQLite. One live row per (`entity_type`, `entity_id`); each row
//! carries provenance (`source`) and expiry (`expires_at`) columns for
//! auditability. Sync cursors track incremental fetch position per
//! (entity type, owner) pair, mirroring the provider's pagination tokens.
//!
//! Writes for a given key are serialized through the connection lock, so a
//! field-level merge is never applied on top of a concurrently-changed base.
//! Reads return the last committed snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, Row, params};

use crate::core::entity::EntityType;
use crate::core::models::{CachedRecord, RecordSource, SyncCursor};
use crate::core::reconcile;
use crate::error::{Result, RookeryError};

/// Default grace period past `expires_at` before sweep reclaims a row.
pub const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How a [`CacheStore::put`] landed: fresh insert, or field-level merge
/// with a pre-existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    Inserted(CachedRecord),
    Merged(CachedRecord),
}

impl PutOutcome {
    /// The record as stored.
    #[must_use]
    pub const fn record(&self) -> &CachedRecord {
        match self {
            Self::Inserted(r) | Self::Merged(r) => r,
        }
    }

    /// Consume the outcome and take the stored record.
    #[must_use]
    pub fn into_record(self) -> CachedRecord {
        match self {
            Self::Inserted(r) | Self::Merged(r) => r,
        }
    }
}

/// Durable key/value table of cached entity snapshots.
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open (or create) a cache database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("open cache db: {e}")))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("open in-memory cache db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                entity_type TEXT NOT NULL,
                entity_id   TEXT NOT NULL,
                owner       TEXT NOT NULL,
                payload     TEXT NOT NULL,
                source      TEXT NOT NULL,
                fetched_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_expires ON records(expires_at);
            CREATE INDEX IF NOT EXISTS idx_records_owner ON records(entity_type, owner);
            CREATE TABLE IF NOT EXISTS sync_cursors (
                entity_type    TEXT NOT NULL,
                owner          TEXT NOT NULL,
                last_position  TEXT,
                last_synced_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, owner)
            );",
        )
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("init cache schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Fetch the live record for a key, if any.
    pub fn get(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<CachedRecord>> {
        let conn = self.conn();
        get_locked(&conn, entity_type, entity_id)
    }

    /// Upsert a record, merging field-by-field against the stored copy.
    ///
    /// The merge always runs against the row as it is at write time, under
    /// the single connection lock; callers never read-then-write across
    /// lock scopes, so two concurrent writers for the same key cannot
    /// regress each other's fields or counters. Returns whether the record
    /// was inserted fresh or merged, along with the stored copy.
    ///
    /// # Errors
    ///
    /// Propagates [`RookeryError::ReconciliationConflict`] from the merge;
    /// in that case the stored record is left unchanged.
    pub fn put(&self, record: &CachedRecord) -> Result<PutOutcome> {
        if record.expires_at <= record.fetched_at {
            return Err(RookeryError::Validation(format!(
                "record {}/{} has expires_at <= fetched_at",
                record.entity_type, record.entity_id
            )));
        }

        let conn = self.conn();
        let existing = get_locked(&conn, record.entity_type, &record.entity_id)?;
        let (to_store, merged) = match existing {
            Some(ref current) => (reconcile::merge(current, record)?, true),
            None => (record.clone(), false),
        };

        conn.execute(
            "INSERT OR REPLACE INTO records
                (entity_type, entity_id, owner, payload, source, fetched_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_store.entity_type.as_str(),
                to_store.entity_id,
                to_store.owner,
                serde_json::to_string(&to_store.payload)?,
                to_store.source.as_str(),
                to_store.fetched_at.to_rfc3339(),
                to_store.expires_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("insert record: {e}")))?;
        Ok(if merged {
            PutOutcome::Merged(to_store)
        } else {
            PutOutcome::Inserted(to_store)
        })
    }

    /// List cached records for an owner, newest first.
    pub fn list(
        &self,
        entity_type: EntityType,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<CachedRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT entity_type, entity_id, owner, payload, source, fetched_at, expires_at
                 FROM records WHERE entity_type = ?1 AND owner = ?2
                 ORDER BY fetched_at DESC, entity_id DESC LIMIT ?3",
            )
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("prepare list: {e}")))?;

        let rows = stmt
            .query_map(
                params![entity_type.as_str(), owner, limit as i64],
                map_record_row,
            )
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("query records: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("map record rows: {e}")))
    }

    /// Whether a record is fresh at `now` (strictly before `expires_at`).
    #[must_use]
    pub fn is_fresh(record: &CachedRecord, now: DateTime<Utc>) -> bool {
        record.is_fresh_at(now)
    }

    /// Delete records past the grace period beyond `expires_at`.
    ///
    /// Readers that already fetched a record complete normally; sweep only
    /// touches rows, not in-flight copies. Returns the number of rows
    /// reclaimed.
    pub fn sweep(&self, grace: Duration) -> Result<usize> {
        self.sweep_at(grace, Utc::now())
    }

    /// Clock-explicit variant of [`sweep`](Self::sweep).
    pub fn sweep_at(&self, grace: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - TimeDelta::seconds(grace.as_secs() as i64);
        let conn = self.conn();
        let deleted = conn
            .execute(
                "DELETE FROM records WHERE expires_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("sweep records: {e}")))?;
        if deleted > 0 {
            tracing::debug!(deleted, "swept expired cache records");
        }
        Ok(deleted)
    }

    /// Live record counts keyed by entity type name.
    pub fn counts_by_type(&self) -> Result<HashMap<String, u64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached("SELECT entity_type, COUNT(*) FROM records GROUP BY entity_type")
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("prepare counts: {e}")))?;

        // SQLite integers are i64; COUNT(*) is never negative.
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("query counts: {e}")))?;

        rows.collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("map count rows: {e}")))
    }

    // =========================================================================
    // Sync cursors
    // =========================================================================

    /// Current cursor for an (entity type, owner) pair.
    pub fn cursor(&self, entity_type: EntityType, owner: &str) -> Result<Option<SyncCursor>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT last_position, last_synced_at FROM sync_cursors
                 WHERE entity_type = ?1 AND owner = ?2",
            )
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("prepare cursor select: {e}")))?;

        let mut rows = stmt
            .query_map(params![entity_type.as_str(), owner], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("query cursor: {e}")))?;

        match rows.next() {
            Some(row) => {
                let (last_position, synced_raw) =
                    row.map_err(|e| RookeryError::Other(anyhow::anyhow!("map cursor: {e}")))?;
                let last_synced_at = parse_timestamp(&synced_raw)?;
                Ok(Some(SyncCursor {
                    entity_type,
                    owner: owner.to_string(),
                    last_position,
                    last_synced_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Advance a cursor after a successful incremental fetch.
    ///
    /// `last_synced_at` is monotonic: an advance carrying an older timestamp
    /// than the stored one keeps the stored value.
    pub fn advance_cursor(
        &self,
        entity_type: EntityType,
        owner: &str,
        position: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let effective = match self.cursor(entity_type, owner)? {
            Some(current) => current.last_synced_at.max(synced_at),
            None => synced_at,
        };
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO sync_cursors
                (entity_type, owner, last_position, last_synced_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entity_type.as_str(),
                owner,
                position,
                effective.to_rfc3339(),
            ],
        )
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("advance cursor: {e}")))?;
        Ok(())
    }

    /// Explicit cursor reset: the next fetch for this pair starts over.
    pub fn reset_cursor(&self, entity_type: EntityType, owner: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM sync_cursors WHERE entity_type = ?1 AND owner = ?2",
            params![entity_type.as_str(), owner],
        )
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("reset cursor: {e}")))?;
        Ok(())
    }

    /// Last successful sync times keyed by "entity_type:owner".
    pub fn last_sync_times(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached("SELECT entity_type, owner, last_synced_at FROM sync_cursors")
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("prepare sync times: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| RookeryError::Other(anyhow::anyhow!("query sync times: {e}")))?;

        let mut times = HashMap::new();
        for row in rows {
            let (entity_type, owner, synced_raw) =
                row.map_err(|e| RookeryError::Other(anyhow::anyhow!("map sync time: {e}")))?;
            times.insert(format!("{entity_type}:{owner}"), parse_timestamp(&synced_raw)?);
        }
        Ok(times)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn get_locked(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Option<CachedRecord>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT entity_type, entity_id, owner, payload, source, fetched_at, expires_at
             FROM records WHERE entity_type = ?1 AND entity_id = ?2",
        )
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("prepare select: {e}")))?;

    let mut rows = stmt
        .query_map(params![entity_type.as_str(), entity_id], map_record_row)
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("query record: {e}")))?;

    match rows.next() {
        Some(row) => Ok(Some(row.map_err(|e| {
            RookeryError::Other(anyhow::anyhow!("map record row: {e}"))
        })?)),
        None => Ok(None),
    }
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<CachedRecord> {
    let type_raw: String = row.get(0)?;
    let entity_type = EntityType::from_name(&type_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let source_raw: String = row.get(4)?;
    let source = RecordSource::from_str_opt(&source_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown source tag: {source_raw}").into(),
        )
    })?;
    let payload_raw: String = row.get(3)?;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(CachedRecord {
        entity_type,
        entity_id: row.get(1)?,
        owner: row.get(2)?,
        payload,
        source,
        fetched_at: parse_timestamp_sql(row, 5)?,
        expires_at: parse_timestamp_sql(row, 6)?,
    })
}

fn parse_timestamp_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RookeryError::Other(anyhow::anyhow!("parse stored timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(
        entity_type: EntityType,
        id: &str,
        source: RecordSource,
        payload: serde_json::Value,
    ) -> CachedRecord {
        let now = Utc::now();
        CachedRecord {
            entity_type,
            entity_id: id.to_string(),
            owner: "acct".to_string(),
            payload,
            source,
            fetched_at: now,
            expires_at: now + TimeDelta::hours(24),
        }
    }

    #[test]
    fn test_put_and_get_round_trip() {
        let store = CacheStore::open_in_memory().unwrap();
        let rec = record(EntityType::Post, "1", RecordSource::Api, json!({"id": "1"}));
        store.put(&rec).unwrap();

        let loaded = store.get(EntityType::Post, "1").unwrap().unwrap();
        assert_eq!(loaded.entity_id, "1");
        assert_eq!(loaded.source, RecordSource::Api);
        assert_eq!(loaded.payload, json!({"id": "1"}));
    }

    #[test]
    fn test_one_live_record_per_key() {
        let store = CacheStore::open_in_memory().unwrap();
        let first = record(EntityType::Post, "1", RecordSource::Api, json!({"id": "1", "v": 1}));
        let second = record(EntityType::Post, "1", RecordSource::Api, json!({"id": "1", "v": 2}));
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        assert_eq!(store.counts_by_type().unwrap()["post"], 1);
        let loaded = store.get(EntityType::Post, "1").unwrap().unwrap();
        assert_eq!(loaded.payload["v"], 2);
    }

    #[test]
    fn test_put_rejects_inverted_expiry() {
        let store = CacheStore::open_in_memory().unwrap();
        let mut rec = record(EntityType::Post, "1", RecordSource::Api, json!({"id": "1"}));
        rec.expires_at = rec.fetched_at - TimeDelta::seconds(1);
        assert!(matches!(
            store.put(&rec).unwrap_err(),
            RookeryError::Validation(_)
        ));
    }

    #[test]
    fn test_archive_put_over_api_record_merges() {
        let store = CacheStore::open_in_memory().unwrap();
        let api = record(
            EntityType::Post,
            "1",
            RecordSource::Api,
            json!({"id": "1", "text": "fresh", "public_metrics": {"like_count": 5}}),
        );
        store.put(&api).unwrap();

        let archive = record(
            EntityType::Post,
            "1",
            RecordSource::Archive,
            json!({"id": "1", "text": "stale export", "archived_note": "kept", "public_metrics": {"like_count": 2}}),
        );
        let stored = store.put(&archive).unwrap().into_record();

        // API text preserved, archive-only field added, counter kept at max.
        assert_eq!(stored.payload["text"], "fresh");
        assert_eq!(stored.payload["archived_note"], "kept");
        assert_eq!(stored.payload["public_metrics"]["like_count"], 5);
        assert_eq!(stored.source, RecordSource::Api);
    }

    #[test]
    fn test_put_merges_against_row_at_write_time() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .put(&record(
                EntityType::Post,
                "1",
                RecordSource::Api,
                json!({"id": "1", "like_count": 10}),
            ))
            .unwrap();

        // A writer that read the row before another writer bumped the
        // counter still merges against the bumped value, never on top of
        // its own stale read.
        let outcome = store
            .put(&record(
                EntityType::Post,
                "1",
                RecordSource::Api,
                json!({"id": "1", "like_count": 3}),
            ))
            .unwrap();
        assert!(matches!(outcome, PutOutcome::Merged(_)));
        assert_eq!(outcome.record().payload["like_count"], 10);

        let loaded = store.get(EntityType::Post, "1").unwrap().unwrap();
        assert_eq!(loaded.payload["like_count"], 10);
    }

    #[test]
    fn test_put_reports_insert_vs_merge() {
        let store = CacheStore::open_in_memory().unwrap();
        let rec = record(EntityType::Post, "1", RecordSource::Archive, json!({"id": "1"}));
        assert!(matches!(
            store.put(&rec).unwrap(),
            PutOutcome::Inserted(_)
        ));
        assert!(matches!(store.put(&rec).unwrap(), PutOutcome::Merged(_)));
    }

    #[test]
    fn test_conflicting_archive_put_keeps_existing() {
        let store = CacheStore::open_in_memory().unwrap();
        let api = record(
            EntityType::Post,
            "1",
            RecordSource::Api,
            json!({"id": "1", "author_id": "u1"}),
        );
        store.put(&api).unwrap();

        let archive = record(
            EntityType::Post,
            "1",
            RecordSource::Archive,
            json!({"id": "1", "author_id": "u2"}),
        );
        assert!(matches!(
            store.put(&archive).unwrap_err(),
            RookeryError::ReconciliationConflict { .. }
        ));

        let kept = store.get(EntityType::Post, "1").unwrap().unwrap();
        assert_eq!(kept.payload["author_id"], "u1");
    }

    #[test]
    fn test_list_is_scoped_and_bounded() {
        let store = CacheStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .put(&record(
                    EntityType::Like,
                    &format!("l{i}"),
                    RecordSource::Api,
                    json!({"id": format!("l{i}")}),
                ))
                .unwrap();
        }
        let mut other = record(EntityType::Like, "x", RecordSource::Api, json!({"id": "x"}));
        other.owner = "someone_else".to_string();
        store.put(&other).unwrap();

        let listed = store.list(EntityType::Like, "acct", 3).unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|r| r.owner == "acct"));
    }

    #[test]
    fn test_sweep_respects_grace_period() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut expired_long_ago = record(EntityType::Trend, "t1", RecordSource::Api, json!({"id": "t1"}));
        expired_long_ago.fetched_at = now - TimeDelta::days(10);
        expired_long_ago.expires_at = now - TimeDelta::days(9);
        store.put(&expired_long_ago).unwrap();

        let mut recently_expired = record(EntityType::Trend, "t2", RecordSource::Api, json!({"id": "t2"}));
        recently_expired.fetched_at = now - TimeDelta::hours(2);
        recently_expired.expires_at = now - TimeDelta::hours(1);
        store.put(&recently_expired).unwrap();

        let grace = Duration::from_secs(24 * 60 * 60);
        let deleted = store.sweep_at(grace, now).unwrap();
        assert_eq!(deleted, 1);

        // The recently expired row survives the grace period and can still be
        // served as a stale copy.
        assert!(store.get(EntityType::Trend, "t2").unwrap().is_some());
        assert!(store.get(EntityType::Trend, "t1").unwrap().is_none());
    }

    #[test]
    fn test_cursor_lifecycle() {
        let store = CacheStore::open_in_memory().unwrap();
        assert!(store.cursor(EntityType::Post, "acct").unwrap().is_none());

        let t1 = Utc::now();
        store
            .advance_cursor(EntityType::Post, "acct", Some("tok1"), t1)
            .unwrap();
        let cursor = store.cursor(EntityType::Post, "acct").unwrap().unwrap();
        assert_eq!(cursor.last_position.as_deref(), Some("tok1"));

        // Monotonic: an older timestamp does not rewind last_synced_at.
        store
            .advance_cursor(EntityType::Post, "acct", Some("tok2"), t1 - TimeDelta::hours(1))
            .unwrap();
        let cursor = store.cursor(EntityType::Post, "acct").unwrap().unwrap();
        assert_eq!(cursor.last_position.as_deref(), Some("tok2"));
        assert_eq!(
            cursor.last_synced_at.timestamp(),
            t1.timestamp()
        );

        store.reset_cursor(EntityType::Post, "acct").unwrap();
        assert!(store.cursor(EntityType::Post, "acct").unwrap().is_none());
    }

    #[test]
    fn test_last_sync_times_keying() {
        let store = CacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .advance_cursor(EntityType::Post, "acct", None, now)
            .unwrap();
        store
            .advance_cursor(EntityType::Like, "acct", None, now)
            .unwrap();

        let times = store.last_sync_times().unwrap();
        assert_eq!(times.len(), 2);
        assert!(times.contains_key("post:acct"));
        assert!(times.contains_key("like:acct"));
    }

    #[test]
    fn test_counts_by_type() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .put(&record(EntityType::Post, "1", RecordSource::Api, json!({"id": "1"})))
            .unwrap();
        store
            .put(&record(EntityType::Post, "2", RecordSource::Archive, json!({"id": "2"})))
            .unwrap();
        store
            .put(&record(EntityType::Like, "3", RecordSource::Api, json!({"id": "3"})))
            .unwrap();

        let counts = store.counts_by_type().unwrap();
        assert_eq!(counts["post"], 2);
        assert_eq!(counts["like"], 1);
    }
}
