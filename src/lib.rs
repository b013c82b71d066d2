//! rookery - a sync and cache engine for social activity data.
//!
//! Aggregates a user's activity (posts, likes, bookmarks, follows, lists,
//! messages, trends, profiles) from two sources: a one-time bulk archive
//! import and an aggressively rate-limited provider API. The engine owns a
//! local SQLite cache of reconciled records, per-endpoint quota tracking,
//! credential-validity caching, and the sync orchestration that ties them
//! together. Presentation is left to the caller.

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod core;
pub mod error;
pub mod storage;

/// Test utilities - included in test builds or with the test-utils feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::core::{
    CachedRecord, Credentials, EngineStats, EntityType, FetchOutcome, HttpTransport,
    ImportSummary, SyncOrchestrator,
};
pub use crate::error::{Result, RookeryError};
pub use crate::storage::{CacheStore, EngineConfig};
