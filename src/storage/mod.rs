//! Persistence: the SQLite record cache, engine configuration, and
//! platform paths.

pub mod cache_store;
pub mod config;
pub mod paths;

pub use cache_store::{CacheStore, PutOutcome, DEFAULT_SWEEP_GRACE};
pub use config::EngineConfig;
pub use paths::AppPaths;
