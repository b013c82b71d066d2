//! Sync orchestration: the facade over cache, quota, reconciliation, and
//! transport.
//!
//! Each request walks one state machine:
//!
//! ```text
//! CHECK_CACHE -(fresh)-> RETURN_CACHED
//! CHECK_CACHE -(stale/absent)-> CHECK_QUOTA -(exceeded)-> RETURN_CACHED_OR_WAIT
//! CHECK_QUOTA -(available)-> FETCH -> SUCCESS -> RECONCILE -> RETURN
//!                                  -> TRANSIENT_FAILURE -> RETRY(backoff)
//!                                  -> PERMANENT_FAILURE -> RETURN_ERROR
//! ```
//!
//! Availability beats strict freshness on read paths: when quota is
//! exhausted the last cached copy is served annotated `stale = true` rather
//! than failing the caller.
//!
//! The orchestrator exclusively owns the cache store, the rate-limit
//! tracker, and the credential-validity cache; nothing else mutates them.

use chrono::{TimeDelta, Utc};

use crate::core::credential::{Credentials, CredentialValidityCache, CredentialVerifier};
use crate::core::entity::{Endpoint, EntityType};
use crate::core::models::{
    CachedRecord, EngineStats, FetchOutcome, ImportSummary, ProviderPage, ProviderRecord,
    QuotaHeaders, RecordSource,
};
use crate::core::quota::{Acquire, RateLimitTracker};
use crate::core::transport::{FetchRequest, Transport};
use crate::error::{Result, RookeryError};
use crate::storage::cache_store::{CacheStore, PutOutcome};
use crate::storage::config::EngineConfig;

/// The synchronization facade.
pub struct SyncOrchestrator<T: Transport + CredentialVerifier> {
    store: CacheStore,
    quota: RateLimitTracker,
    credential_cache: CredentialValidityCache,
    transport: T,
    credentials: Credentials,
    config: EngineConfig,
}

impl<T: Transport + CredentialVerifier> SyncOrchestrator<T> {
    /// Build an orchestrator with an in-memory credential cache.
    #[must_use]
    pub fn new(store: CacheStore, transport: T, credentials: Credentials, config: EngineConfig) -> Self {
        Self::with_credential_cache(
            store,
            transport,
            credentials,
            config,
            CredentialValidityCache::in_memory(),
        )
    }

    /// Build an orchestrator with an injected credential cache backing.
    #[must_use]
    pub fn with_credential_cache(
        store: CacheStore,
        transport: T,
        credentials: Credentials,
        config: EngineConfig,
        credential_cache: CredentialValidityCache,
    ) -> Self {
        Self {
            store,
            quota: RateLimitTracker::new(),
            credential_cache,
            transport,
            credentials,
            config,
        }
    }

    // =========================================================================
    // Primary contract
    // =========================================================================

    /// Fetch records for an entity type scoped to a selector.
    ///
    /// Serves the cached copy when the sync cursor is still within TTL,
    /// otherwise performs a quota-checked remote fetch, reconciles the
    /// results into the cache, and returns the merged view. When quota is
    /// exhausted and a cached copy exists, that copy is returned with
    /// `stale = true`.
    pub async fn fetch(
        &self,
        entity_type: EntityType,
        selector: &str,
        max_results: usize,
    ) -> Result<FetchOutcome> {
        if selector.trim().is_empty() {
            return Err(RookeryError::Validation("selector must not be empty".to_string()));
        }
        if max_results == 0 {
            return Err(RookeryError::Validation(
                "max_results must be greater than 0".to_string(),
            ));
        }

        // CHECK_CACHE: freshness is judged by the sync cursor for this
        // (entity type, selector) pair, mirroring per-record TTL. A fresh
        // hit answers without touching the network at all, credential
        // verification included.
        let now = Utc::now();
        let ttl = ttl_delta(&self.config, entity_type);
        let cursor = self.store.cursor(entity_type, selector)?;
        if let Some(cursor) = &cursor {
            if now < cursor.last_synced_at + ttl {
                let records = self.store.list(entity_type, selector, max_results)?;
                tracing::debug!(
                    entity_type = entity_type.as_str(),
                    selector,
                    count = records.len(),
                    "serving fresh cache"
                );
                return Ok(FetchOutcome::new(records, false));
            }
        }

        self.ensure_authenticated().await?;

        let pagination_token = cursor.and_then(|c| c.last_position);
        self.fetch_remote(entity_type, selector, max_results, pagination_token)
            .await
    }

    /// Engine state snapshot for the presentation layer.
    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            cache_counts_by_type: self.store.counts_by_type()?,
            quota_state_by_endpoint: self.quota.snapshot(),
            last_sync_times: self.store.last_sync_times()?,
        })
    }

    /// Feed a stream of bulk-archive records through reconciliation.
    ///
    /// Records are tagged `source = archive` and merged exactly like
    /// API-origin records; an archive copy never regresses fresher API data.
    /// Hard reconciliation conflicts keep the existing record and are
    /// counted, not surfaced.
    pub fn import_archive<I>(
        &self,
        entity_type: EntityType,
        owner: &str,
        records: I,
    ) -> Result<ImportSummary>
    where
        I: IntoIterator<Item = ProviderRecord>,
    {
        let now = Utc::now();
        let ttl = ttl_delta(&self.config, entity_type);
        let mut summary = ImportSummary::default();

        for raw in records {
            let incoming = CachedRecord {
                entity_type,
                entity_id: raw.entity_id,
                owner: owner.to_string(),
                payload: raw.payload,
                source: RecordSource::Archive,
                fetched_at: now,
                expires_at: now + ttl,
            };
            match self.store.put(&incoming) {
                Ok(PutOutcome::Inserted(_)) => summary.inserted += 1,
                Ok(PutOutcome::Merged(_)) => summary.merged += 1,
                Err(RookeryError::ReconciliationConflict {
                    entity_type,
                    entity_id,
                    field,
                }) => {
                    tracing::warn!(
                        entity_type,
                        entity_id,
                        field,
                        "archive record conflicts with cached copy; keeping existing"
                    );
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            entity_type = entity_type.as_str(),
            owner,
            inserted = summary.inserted,
            merged = summary.merged,
            conflicts = summary.conflicts,
            "archive import complete"
        );
        Ok(summary)
    }

    /// Reclaim records past the grace period beyond expiry.
    pub fn sweep(&self) -> Result<usize> {
        self.store.sweep(self.config.sweep_grace())
    }

    /// Explicitly rewind the sync cursor for an (entity type, owner) pair.
    pub fn reset_cursor(&self, entity_type: EntityType, owner: &str) -> Result<()> {
        self.store.reset_cursor(entity_type, owner)
    }

    /// Drop the cached validity verdict for the configured credentials
    /// (call after rotating them).
    pub fn invalidate_credentials(&self) -> Result<()> {
        self.credential_cache.invalidate(&self.credentials)
    }

    /// Direct handle to the rate-limit tracker, for test harnesses.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn quota_tracker(&self) -> &RateLimitTracker {
        &self.quota
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Consult the credential-validity cache, verifying remotely only for an
    /// unseen credential hash.
    async fn ensure_authenticated(&self) -> Result<()> {
        let outcome = self
            .credential_cache
            .check(&self.credentials, &self.transport)
            .await?;
        if outcome.valid {
            Ok(())
        } else {
            Err(RookeryError::AuthenticationRejected {
                reason: "cached verdict: credentials invalid".to_string(),
            })
        }
    }

    async fn fetch_remote(
        &self,
        entity_type: EntityType,
        selector: &str,
        max_results: usize,
        pagination_token: Option<String>,
    ) -> Result<FetchOutcome> {
        let endpoint = entity_type.endpoint();
        let page_size = u32::try_from(max_results).unwrap_or(u32::MAX);
        let request = FetchRequest::new(endpoint, selector, page_size).with_token(pagination_token);
        let mut attempts = 0u32;

        loop {
            // CHECK_QUOTA
            match self.quota.acquire(endpoint) {
                Acquire::Permit => {}
                Acquire::WouldExceed { wait_until } => {
                    return self.degrade(entity_type, selector, max_results, wait_until);
                }
            }
            attempts += 1;

            let mut permit = PermitGuard::new(&self.quota, endpoint);
            let result = self.timed_fetch(&request).await;

            match result {
                Ok(page) => {
                    permit.commit();
                    if let Some(headers) = page.quota {
                        self.quota.observe(endpoint, headers);
                    }
                    return self.reconcile_page(entity_type, selector, max_results, page);
                }
                Err(err) => {
                    match &err {
                        // The provider never received these attempts; refund
                        // the permit (guard drop) and classify as transient.
                        RookeryError::Timeout { .. } | RookeryError::ConnectionFailed { .. } => {}
                        // An explicit rate-limit response is authoritative:
                        // mark the endpoint exhausted until the reported
                        // reset rather than backing off blindly.
                        RookeryError::RateLimited { wait_until, .. } => {
                            permit.commit();
                            if let Some(reset_at) = wait_until {
                                self.quota.observe(
                                    endpoint,
                                    QuotaHeaders {
                                        remaining: 0,
                                        reset_at: *reset_at,
                                    },
                                );
                                return self.degrade(
                                    entity_type,
                                    selector,
                                    max_results,
                                    *reset_at,
                                );
                            }
                        }
                        RookeryError::AuthenticationRejected { .. } => {
                            permit.commit();
                            self.credential_cache.invalidate(&self.credentials)?;
                            return Err(err);
                        }
                        // Any other HTTP-level outcome consumed real quota.
                        _ => permit.commit(),
                    }

                    if !self.config.retry.should_retry(&err, attempts) {
                        tracing::warn!(
                            endpoint = endpoint.id(),
                            attempts,
                            error = %err,
                            "fetch failed permanently"
                        );
                        return Err(err);
                    }

                    let delay = self.config.retry.delay_for(attempts - 1);
                    tracing::debug!(
                        endpoint = endpoint.id(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    drop(permit);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Run the transport call under the configured deadline; an elapsed
    /// deadline is a transient timeout.
    async fn timed_fetch(&self, request: &FetchRequest) -> Result<ProviderPage> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.transport.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(RookeryError::Timeout {
                endpoint: request.endpoint.id().to_string(),
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// RECONCILE: merge a fetched page into the cache and return the merged
    /// view. A conflicting record keeps its pre-existing cached copy.
    fn reconcile_page(
        &self,
        entity_type: EntityType,
        selector: &str,
        max_results: usize,
        page: ProviderPage,
    ) -> Result<FetchOutcome> {
        let now = Utc::now();
        let ttl = ttl_delta(&self.config, entity_type);

        for raw in page.records {
            let incoming = CachedRecord {
                entity_type,
                entity_id: raw.entity_id,
                owner: selector.to_string(),
                payload: raw.payload,
                source: RecordSource::Api,
                fetched_at: now,
                expires_at: now + ttl,
            };

            // The store merges against the row as it is at write time, so a
            // concurrent archive import cannot be clobbered here.
            match self.store.put(&incoming) {
                Ok(_) => {}
                Err(RookeryError::ReconciliationConflict {
                    entity_type,
                    entity_id,
                    field,
                }) => {
                    tracing::warn!(
                        entity_type,
                        entity_id,
                        field,
                        "fetched record conflicts with cached copy; keeping existing"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.store
            .advance_cursor(entity_type, selector, page.next_token.as_deref(), now)?;

        let records = self.store.list(entity_type, selector, max_results)?;
        tracing::info!(
            entity_type = entity_type.as_str(),
            selector,
            count = records.len(),
            "sync complete"
        );
        Ok(FetchOutcome::new(records, false))
    }

    /// RETURN_CACHED_OR_WAIT: serve the last cached copy flagged stale, or
    /// surface the wait time when there is nothing to serve.
    fn degrade(
        &self,
        entity_type: EntityType,
        selector: &str,
        max_results: usize,
        wait_until: chrono::DateTime<Utc>,
    ) -> Result<FetchOutcome> {
        let records = self.store.list(entity_type, selector, max_results)?;
        if records.is_empty() {
            Err(RookeryError::QuotaExceeded {
                endpoint: entity_type.endpoint().id().to_string(),
                wait_until,
            })
        } else {
            tracing::info!(
                entity_type = entity_type.as_str(),
                selector,
                count = records.len(),
                "quota exhausted, serving stale cache"
            );
            Ok(FetchOutcome::new(records, true))
        }
    }
}

/// Refunds a quota permit unless the attempt provably reached the provider.
///
/// Dropping the guard without a commit (timeout, connection failure, or
/// caller cancellation of the in-flight future) releases the unit back to
/// the tracker, so abandoned attempts record no quota consumption.
struct PermitGuard<'a> {
    quota: &'a RateLimitTracker,
    endpoint: Endpoint,
    consumed: bool,
}

impl<'a> PermitGuard<'a> {
    fn new(quota: &'a RateLimitTracker, endpoint: Endpoint) -> Self {
        Self {
            quota,
            endpoint,
            consumed: false,
        }
    }

    fn commit(&mut self) {
        self.consumed = true;
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if !self.consumed {
            self.quota.release(self.endpoint);
        }
    }
}

fn ttl_delta(config: &EngineConfig, entity_type: EntityType) -> TimeDelta {
    TimeDelta::seconds(config.ttl_for(entity_type).as_secs() as i64)
}
