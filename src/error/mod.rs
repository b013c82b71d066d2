//! Error types for rookery.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into five main categories:
//! - **Authentication**: Provider rejected the presented credentials
//! - **Network**: Timeout, DNS, SSL, or connection issues (transient)
//! - **Quota**: A local or provider-side rate-limit budget was exhausted
//! - **Validation**: Malformed caller input, never retried
//! - **Reconciliation**: A merge hit a hard contradiction between sources
//!
//! Each error has a stable error code (e.g., `ROOK-N001`) for programmatic
//! handling, and [`RookeryError::is_retryable`] drives the retry loop in the
//! sync orchestrator.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Authentication issues (rejected or missing credentials).
    Authentication,
    /// Network issues (timeout, DNS, SSL, connection refused, 5xx).
    Network,
    /// Quota issues (local budget exhausted or provider 429).
    Quota,
    /// Validation issues (malformed caller input, unknown entity type).
    Validation,
    /// Reconciliation issues (two sources disagree on an immutable field).
    Reconciliation,
    /// Configuration issues (parse errors, invalid values).
    Configuration,
    /// Internal errors (bugs, storage failures, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Network => "Network error",
            Self::Quota => "Quota error",
            Self::Validation => "Validation error",
            Self::Reconciliation => "Reconciliation error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Main error type for rookery operations.
///
/// Each variant has:
/// - A stable error code (e.g., `ROOK-N001`)
/// - A category for classification
/// - A retryable flag consumed by the retry loop
#[derive(Error, Debug)]
pub enum RookeryError {
    // ==========================================================================
    // Network errors (transient)
    // ==========================================================================
    /// Request timed out after specified duration.
    #[error("request timeout after {seconds}s for {endpoint}")]
    Timeout { endpoint: String, seconds: u64 },

    /// Connection could not be established (DNS, refused, reset).
    #[error("connection failed for {endpoint}: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    /// Provider returned a 5xx or otherwise transient failure.
    #[error("transient provider failure on {endpoint}: {message}")]
    TransientNetwork {
        endpoint: String,
        status_code: Option<u16>,
        message: String,
    },

    // ==========================================================================
    // Quota errors
    // ==========================================================================
    /// Local budget for the endpoint is exhausted.
    #[error("quota exhausted for {endpoint}, resets at {wait_until}")]
    QuotaExceeded {
        endpoint: String,
        wait_until: DateTime<Utc>,
    },

    /// Provider returned an explicit rate-limit response (429).
    #[error("rate limited by provider on {endpoint}")]
    RateLimited {
        endpoint: String,
        wait_until: Option<DateTime<Utc>>,
    },

    // ==========================================================================
    // Authentication errors (never retried)
    // ==========================================================================
    /// Provider definitively rejected the credentials.
    #[error("authentication rejected: {reason}")]
    AuthenticationRejected { reason: String },

    /// No credentials were configured for the requested operation.
    #[error("credentials not configured")]
    CredentialsNotConfigured,

    // ==========================================================================
    // Validation errors (never retried)
    // ==========================================================================
    /// Malformed caller input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Requested resource does not exist at the provider.
    #[error("resource not found: {endpoint}/{selector}")]
    NotFound { endpoint: String, selector: String },

    /// Unknown entity type name.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    // ==========================================================================
    // Reconciliation errors
    // ==========================================================================
    /// Two sources hold different non-null values for an immutable field.
    #[error("reconciliation conflict on {entity_type}/{entity_id}: field '{field}'")]
    ReconciliationConflict {
        entity_type: String,
        entity_id: String,
        field: String,
    },

    // ==========================================================================
    // Configuration errors
    // ==========================================================================
    /// Configuration parse or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Internal errors
    // ==========================================================================
    /// Failed to parse a provider response body.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RookeryError {
    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. }
            | Self::ConnectionFailed { .. }
            | Self::TransientNetwork { .. } => ErrorCategory::Network,

            Self::QuotaExceeded { .. } | Self::RateLimited { .. } => ErrorCategory::Quota,

            Self::AuthenticationRejected { .. } | Self::CredentialsNotConfigured => {
                ErrorCategory::Authentication
            }

            Self::Validation(_) | Self::NotFound { .. } | Self::UnknownEntityType(_) => {
                ErrorCategory::Validation
            }

            Self::ReconciliationConflict { .. } => ErrorCategory::Reconciliation,

            Self::Config(_) => ErrorCategory::Configuration,

            Self::ParseResponse(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `ROOK-{category}{number}` where category is:
    /// - N: Network
    /// - Q: Quota
    /// - A: Authentication
    /// - V: Validation
    /// - R: Reconciliation
    /// - C: Configuration
    /// - X: Internal
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "ROOK-N001",
            Self::ConnectionFailed { .. } => "ROOK-N002",
            Self::TransientNetwork { .. } => "ROOK-N003",

            Self::QuotaExceeded { .. } => "ROOK-Q001",
            Self::RateLimited { .. } => "ROOK-Q002",

            Self::AuthenticationRejected { .. } => "ROOK-A001",
            Self::CredentialsNotConfigured => "ROOK-A002",

            Self::Validation(_) => "ROOK-V001",
            Self::NotFound { .. } => "ROOK-V002",
            Self::UnknownEntityType(_) => "ROOK-V003",

            Self::ReconciliationConflict { .. } => "ROOK-R001",

            Self::Config(_) => "ROOK-C001",

            Self::ParseResponse(_) => "ROOK-X001",
            Self::Io(_) => "ROOK-X002",
            Self::Json(_) => "ROOK-X003",
            Self::Other(_) => "ROOK-X099",
        }
    }

    /// Returns whether the error is potentially recoverable by retrying.
    ///
    /// Retryable errors include timeouts, connection failures, transient
    /// provider failures (5xx), and explicit provider rate-limit responses.
    /// Authentication, validation, and reconciliation errors are final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::TransientNetwork { .. }
                | Self::RateLimited { .. }
        )
    }

    /// For quota-shaped errors, the time the caller should wait until.
    #[must_use]
    pub const fn retry_after(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::QuotaExceeded { wait_until, .. } => Some(*wait_until),
            Self::RateLimited { wait_until, .. } => *wait_until,
            _ => None,
        }
    }
}

/// Convenience result type for rookery operations.
pub type Result<T> = std::result::Result<T, RookeryError>;
