use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub log_level: String,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the index database and all file sources.
    pub data_dir: String,
    /// Index database path. Empty means `<data_dir>/index.db`.
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"` or `"remote"`.
    pub provider: String,
    /// Vector dimensions for the local provider.
    pub dimensions: usize,
    /// Model name sent to the remote endpoint.
    pub model: String,
    /// Remote endpoint base URL.
    pub endpoint: String,
    /// API key for the remote provider. Missing key falls back to local.
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub min_score: f64,
    pub max_results: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Enables filesystem watching plus the periodic session resync timer.
    pub watch: bool,
    /// Interval for the session resync timer, in seconds.
    pub session_interval_secs: u64,
    /// Derive a summary automatically when `post_session` gets none.
    pub auto_summarize: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().to_string_lossy().into_owned();
        Self {
            data_dir,
            db_path: String::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            dimensions: 256,
            model: "text-embedding-3-small".into(),
            endpoint: "https://api.openai.com/v1".into(),
            api_key: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            keyword_weight: 0.4,
            min_score: 0.2,
            max_results: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch: true,
            session_interval_secs: 60,
            auto_summarize: true,
        }
    }
}

/// Returns `~/.mnemon/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemon")
}

/// Returns the default config file path: `~/.mnemon/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl MemoryConfig {
    /// Load config from the default TOML path, then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path. Missing file means defaults; a partial file
    /// is merged over defaults via serde. Out-of-range values fall back
    /// per-field with a warning.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents).map_err(|e| crate::error::MemoryError::ConfigInvalid {
                field: "config.toml",
                reason: e.to_string(),
            })?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemoryConfig::default()
        };

        config.apply_env_overrides();
        config.sanitize();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMON_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("MNEMON_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEMON_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Ok(val) = std::env::var("MNEMON_API_KEY") {
            self.embedding.api_key = Some(val);
        }
    }

    /// Replace out-of-range values with defaults, field by field.
    fn sanitize(&mut self) {
        let defaults = SearchConfig::default();
        if !(0.0..=1.0).contains(&self.search.vector_weight) {
            warn!(
                value = self.search.vector_weight,
                "vector_weight out of [0,1], using default"
            );
            self.search.vector_weight = defaults.vector_weight;
        }
        if !(0.0..=1.0).contains(&self.search.keyword_weight) {
            warn!(
                value = self.search.keyword_weight,
                "keyword_weight out of [0,1], using default"
            );
            self.search.keyword_weight = defaults.keyword_weight;
        }
        if !(0.0..=1.0).contains(&self.search.min_score) {
            warn!(
                value = self.search.min_score,
                "min_score out of [0,1], using default"
            );
            self.search.min_score = defaults.min_score;
        }
        if self.search.max_results == 0 {
            warn!("max_results must be positive, using default");
            self.search.max_results = defaults.max_results;
        }
        if self.embedding.dimensions == 0 {
            warn!("embedding dimensions must be positive, using default");
            self.embedding.dimensions = EmbeddingConfig::default().dimensions;
        }
        if self.sync.session_interval_secs < 5 {
            warn!(
                value = self.sync.session_interval_secs,
                "session_interval_secs below 5, using default"
            );
            self.sync.session_interval_secs = SyncConfig::default().session_interval_secs;
        }
    }

    /// Resolve the index database path, expanding `~` if needed.
    pub fn db_path(&self) -> PathBuf {
        if self.storage.db_path.is_empty() {
            self.data_dir().join("index.db")
        } else {
            expand_tilde(&self.storage.db_path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.data_dir().join("notes")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.data_dir().join("skills")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir().join("sessions")
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MemoryConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.embedding.dimensions, 256);
        assert!(config.storage.data_dir.ends_with(".mnemon"));
        assert!((config.search.vector_weight + config.search.keyword_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parse_partial_toml_merges_defaults() {
        let toml_str = r#"
log_level = "debug"

[storage]
data_dir = "/tmp/mnemon-test"

[search]
max_results = 3
"#;
        let mut config: MemoryConfig = toml::from_str(toml_str).unwrap();
        config.sanitize();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.storage.data_dir, "/tmp/mnemon-test");
        assert_eq!(config.search.max_results, 3);
        // defaults still apply for unset fields
        assert_eq!(config.search.vector_weight, 0.6);
        assert_eq!(config.sync.session_interval_secs, 60);
    }

    #[test]
    fn sanitize_replaces_bad_values() {
        let toml_str = r#"
[search]
vector_weight = 3.5
max_results = 0

[sync]
session_interval_secs = 1
"#;
        let mut config: MemoryConfig = toml::from_str(toml_str).unwrap();
        config.sanitize();
        assert_eq!(config.search.vector_weight, 0.6);
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.sync.session_interval_secs, 60);
    }

    #[test]
    fn derived_paths_hang_off_data_dir() {
        let mut config = MemoryConfig::default();
        config.storage.data_dir = "/tmp/m".into();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/m/index.db"));
        assert_eq!(config.notes_dir(), PathBuf::from("/tmp/m/notes"));
        assert_eq!(config.skills_dir(), PathBuf::from("/tmp/m/skills"));
        assert_eq!(config.sessions_dir(), PathBuf::from("/tmp/m/sessions"));
    }
}
