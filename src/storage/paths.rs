//! Application paths for config, cache, and data.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application paths.
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
    /// Data directory.
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the rookery engine.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "rookery", "rookery") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = directories::BaseDirs::new()
                .map(|d| d.home_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            Self {
                config: home.join(".config/rookery"),
                cache: home.join(".cache/rookery"),
                data: home.join(".local/share/rookery"),
            }
        }
    }

    /// Path to the engine configuration file.
    #[must_use]
    pub fn engine_config_file(&self) -> PathBuf {
        self.config.join("engine.toml")
    }

    /// Path to the cache database file.
    #[must_use]
    pub fn cache_db_file(&self) -> PathBuf {
        self.data.join("activity-cache.sqlite")
    }

    /// Path to the credential-validity cache file (hashes only, no secrets).
    #[must_use]
    pub fn auth_cache_file(&self) -> PathBuf {
        self.cache.join("auth-cache.json")
    }

    /// Ensure all directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.cache)?;
        std::fs::create_dir_all(&self.data)?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
