//! Credential-validity caching.
//!
//! Stores only a one-way SHA-256 hash of the credential tuple plus a
//! pass/fail verdict. The raw secret is never persisted, logged, or printed.
//! Entries have no TTL: a verdict is reused indefinitely until a different
//! hash is presented, at which point a fresh verification call is made.
//!
//! The backing is injectable: purely in-memory for tests, or a JSON file
//! written atomically (temp file + rename) for durability across runs.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, RookeryError};

// =============================================================================
// Credentials
// =============================================================================

/// Provider credentials. Either a full user-auth tuple or an app bearer token.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// OAuth 1.0a user context.
    User {
        api_key: String,
        api_secret: String,
        access_token: String,
        access_token_secret: String,
    },
    /// OAuth 2.0 app-only bearer token.
    App { bearer_token: String },
}

impl Credentials {
    /// SHA-256 of the canonical credential tuple, hex-encoded.
    ///
    /// User tuples are joined with `:` before hashing, so any change to any
    /// component produces a different hash.
    #[must_use]
    pub fn hash(&self) -> String {
        let canonical = match self {
            Self::User {
                api_key,
                api_secret,
                access_token,
                access_token_secret,
            } => format!("{api_key}:{api_secret}:{access_token}:{access_token_secret}"),
            Self::App { bearer_token } => bearer_token.clone(),
        };
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }

    /// Auth context label, used in logs in place of any secret material.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user_auth",
            Self::App { .. } => "app_auth",
        }
    }
}

// Secrets must not leak through debug output.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("kind", &self.kind())
            .field("hash", &self.hash())
            .finish()
    }
}

// =============================================================================
// Verification seam
// =============================================================================

/// Performs the actual remote verification call.
///
/// Returns `Ok(true)` for valid credentials, `Ok(false)` for a definitive
/// authentication rejection, and `Err` for transient failures. Only the
/// definitive outcomes are cached.
pub trait CredentialVerifier: Send + Sync {
    fn verify(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}

// =============================================================================
// Cached verdict
// =============================================================================

/// A cached pass/fail verdict for one credential hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub is_valid: bool,
    pub checked_at: DateTime<Utc>,
}

/// Result of a [`CredentialValidityCache::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub valid: bool,
    /// True when the verdict came from the cache (zero network calls made).
    pub cached: bool,
}

// =============================================================================
// Cache
// =============================================================================

/// Caches credential validity by hash, never storing the secret itself.
pub struct CredentialValidityCache {
    records: Mutex<HashMap<String, CredentialRecord>>,
    /// Durable backing file; `None` keeps the cache purely in memory.
    path: Option<PathBuf>,
}

impl CredentialValidityCache {
    /// Purely in-memory cache (isolated instances for tests).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// File-backed cache; loads any existing records from `path`.
    ///
    /// A missing or corrupt file starts the cache empty rather than failing:
    /// the worst case is one extra verification call.
    #[must_use]
    pub fn with_file(path: PathBuf) -> Self {
        let records = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            records: Mutex::new(records),
            path: Some(path),
        }
    }

    /// Check credential validity, using the cached verdict when present.
    ///
    /// Performs exactly one remote verification call for an unseen hash and
    /// zero calls for a cached one. Transient verification failures are
    /// surfaced as errors and never cached as invalid.
    pub async fn check<V: CredentialVerifier>(
        &self,
        credentials: &Credentials,
        verifier: &V,
    ) -> Result<CheckOutcome> {
        let hash = credentials.hash();
        if let Some(record) = self.get(&hash) {
            tracing::debug!(kind = credentials.kind(), cached = true, "credential check");
            return Ok(CheckOutcome {
                valid: record.is_valid,
                cached: true,
            });
        }

        let valid = verifier.verify(credentials).await?;
        tracing::info!(
            kind = credentials.kind(),
            valid,
            "credential verified remotely"
        );
        self.insert(
            hash,
            CredentialRecord {
                is_valid: valid,
                checked_at: Utc::now(),
            },
        )?;
        Ok(CheckOutcome {
            valid,
            cached: false,
        })
    }

    /// Drop the verdict for a credential tuple (used on explicit rotation or
    /// after an authentication rejection mid-session).
    pub fn invalidate(&self, credentials: &Credentials) -> Result<()> {
        let hash = credentials.hash();
        {
            let mut records = self.lock();
            records.remove(&hash);
        }
        self.persist()
    }

    /// Cached verdict for a hash, if any.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<CredentialRecord> {
        self.lock().get(hash).cloned()
    }

    /// Number of cached verdicts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no verdicts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, hash: String, record: CredentialRecord) -> Result<()> {
        {
            let mut records = self.lock();
            records.insert(hash, record);
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let records = self.lock();
            serde_json::to_string_pretty(&*records)?
        };
        write_atomic(path, content.as_bytes()).map_err(RookeryError::Io)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CredentialRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write bytes atomically using temp file + rename, so an interrupted write
/// never leaves a corrupt cache file.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("cache"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Verifier that counts calls and returns a scripted outcome.
    struct ScriptedVerifier {
        calls: AtomicUsize,
        outcome: Result<bool>,
    }

    impl ScriptedVerifier {
        fn valid() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: Ok(true),
            }
        }

        fn rejected() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: Ok(false),
            }
        }

        fn transient_failure() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: Err(RookeryError::ConnectionFailed {
                    endpoint: "verify".to_string(),
                    message: "connection reset".to_string(),
                }),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CredentialVerifier for ScriptedVerifier {
        async fn verify(&self, _credentials: &Credentials) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(v) => Ok(*v),
                Err(_) => Err(RookeryError::ConnectionFailed {
                    endpoint: "verify".to_string(),
                    message: "connection reset".to_string(),
                }),
            }
        }
    }

    fn user_creds(token: &str) -> Credentials {
        Credentials::User {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            access_token: token.to_string(),
            access_token_secret: "token-secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_check_makes_no_network_call() {
        let cache = CredentialValidityCache::in_memory();
        let verifier = ScriptedVerifier::valid();
        let creds = user_creds("t1");

        let first = cache.check(&creds, &verifier).await.unwrap();
        assert!(first.valid);
        assert!(!first.cached);
        assert_eq!(verifier.call_count(), 1);

        let second = cache.check(&creds, &verifier).await.unwrap();
        assert!(second.valid);
        assert!(second.cached);
        assert_eq!(verifier.call_count(), 1);
    }

    #[tokio::test]
    async fn test_differing_tuples_hash_independently() {
        let cache = CredentialValidityCache::in_memory();
        let verifier = ScriptedVerifier::valid();

        // Two tuples differing only in one token.
        let a = user_creds("token-a");
        let b = user_creds("token-b");
        assert_ne!(a.hash(), b.hash());

        cache.check(&a, &verifier).await.unwrap();
        cache.check(&b, &verifier).await.unwrap();

        assert_eq!(verifier.call_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_definitive_rejection_is_cached() {
        let cache = CredentialValidityCache::in_memory();
        let verifier = ScriptedVerifier::rejected();
        let creds = Credentials::App {
            bearer_token: "bad-bearer".to_string(),
        };

        let first = cache.check(&creds, &verifier).await.unwrap();
        assert!(!first.valid);

        let second = cache.check(&creds, &verifier).await.unwrap();
        assert!(!second.valid);
        assert!(second.cached);
        assert_eq!(verifier.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_not_cached() {
        let cache = CredentialValidityCache::in_memory();
        let verifier = ScriptedVerifier::transient_failure();
        let creds = user_creds("t1");

        assert!(cache.check(&creds, &verifier).await.is_err());
        assert!(cache.is_empty());

        // A later attempt goes to the network again.
        assert!(cache.check(&creds, &verifier).await.is_err());
        assert_eq!(verifier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_check() {
        let cache = CredentialValidityCache::in_memory();
        let verifier = ScriptedVerifier::valid();
        let creds = user_creds("t1");

        cache.check(&creds, &verifier).await.unwrap();
        cache.invalidate(&creds).unwrap();
        let outcome = cache.check(&creds, &verifier).await.unwrap();

        assert!(!outcome.cached);
        assert_eq!(verifier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_file_backing_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("auth_cache.json");

        let verifier = ScriptedVerifier::valid();
        let creds = user_creds("t1");
        {
            let cache = CredentialValidityCache::with_file(path.clone());
            cache.check(&creds, &verifier).await.unwrap();
        }

        let reloaded = CredentialValidityCache::with_file(path);
        let outcome = reloaded.check(&creds, &verifier).await.unwrap();
        assert!(outcome.cached);
        assert_eq!(verifier.call_count(), 1);
    }

    #[test]
    fn test_file_never_contains_secret_material() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("auth_cache.json");
        let cache = CredentialValidityCache::with_file(path.clone());
        let creds = user_creds("super-secret-token");

        cache
            .insert(
                creds.hash(),
                CredentialRecord {
                    is_valid: true,
                    checked_at: Utc::now(),
                },
            )
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("super-secret-token"));
        assert!(!content.contains("secret"));
        assert!(content.contains(&creds.hash()));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let creds = user_creds("super-secret-token");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("user_auth"));
    }

    #[test]
    fn test_corrupt_backing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("auth_cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = CredentialValidityCache::with_file(path);
        assert!(cache.is_empty());
    }
}
