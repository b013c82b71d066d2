//! Core domain types and the sync engine.

pub mod credential;
pub mod entity;
pub mod logging;
pub mod models;
pub mod quota;
pub mod reconcile;
pub mod retry;
pub mod sync;
pub mod transport;

pub use credential::{
    CheckOutcome, CredentialRecord, CredentialValidityCache, CredentialVerifier, Credentials,
};
pub use entity::{Endpoint, EntityType};
pub use logging::{LogFormat, LogLevel};
pub use models::{
    CachedRecord, EndpointQuota, EngineStats, FetchOutcome, ImportSummary, ProviderPage,
    ProviderRecord, QuotaHeaders, RecordSource, SourceBreakdown, SyncCursor,
};
pub use quota::{Acquire, RateLimitState, RateLimitTracker};
pub use retry::RetryPolicy;
pub use sync::SyncOrchestrator;
pub use transport::{FetchRequest, HttpTransport, Transport, DEFAULT_TIMEOUT};
