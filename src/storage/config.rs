//! Engine configuration.
//!
//! TTLs, timeouts, sweep grace, and retry behavior are configuration, not
//! code: loaded from a TOML file with full defaults, so an empty (or absent)
//! file yields a working engine.
//!
//! ```toml
//! request_timeout_seconds = 30
//! sweep_grace_seconds = 604800
//!
//! [ttl_seconds]
//! trend = 600
//! like = 7200
//!
//! [retry]
//! max_attempts = 5
//! initial_delay_ms = 250
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::entity::EntityType;
use crate::core::retry::RetryPolicy;
use crate::error::{Result, RookeryError};

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default sweep grace period (7 days past expiry).
pub const DEFAULT_SWEEP_GRACE_SECS: u64 = 7 * 24 * 60 * 60;

/// Engine configuration with per-entity-type TTL overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Timeout applied to each outbound provider request.
    pub request_timeout_seconds: u64,
    /// Grace period past `expires_at` before sweep reclaims a record.
    pub sweep_grace_seconds: u64,
    /// TTL overrides keyed by entity type name; unlisted types use their
    /// built-in default.
    pub ttl_seconds: HashMap<String, u64>,
    /// Retry behavior for transient fetch failures.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            sweep_grace_seconds: DEFAULT_SWEEP_GRACE_SECS,
            ttl_seconds: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RookeryError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error for a zero timeout, an unknown entity type name in
    /// the TTL table, a zero TTL, or an invalid retry policy.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(RookeryError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        for (name, ttl) in &self.ttl_seconds {
            EntityType::from_name(name)
                .map_err(|_| RookeryError::Config(format!("unknown entity type in ttl_seconds: {name}")))?;
            if *ttl == 0 {
                return Err(RookeryError::Config(format!(
                    "ttl_seconds for {name} must be greater than 0"
                )));
            }
        }
        self.retry.validate()?;
        Ok(())
    }

    /// Effective TTL for an entity type (override or built-in default).
    #[must_use]
    pub fn ttl_for(&self, entity_type: EntityType) -> Duration {
        self.ttl_seconds
            .get(entity_type.as_str())
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| entity_type.default_ttl())
    }

    /// Override the TTL for one entity type.
    #[must_use]
    pub fn with_ttl(mut self, entity_type: EntityType, ttl: Duration) -> Self {
        self.ttl_seconds
            .insert(entity_type.as_str().to_string(), ttl.as_secs().max(1));
        self
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Sweep grace period as a `Duration`.
    #[must_use]
    pub const fn sweep_grace(&self) -> Duration {
        Duration::from_secs(self.sweep_grace_seconds)
    }
}
