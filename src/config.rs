use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RagConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub collections: CollectionsConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the persistent vector store.
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"` (ONNX Runtime) or `"hashing"`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

/// Default collection names for each component.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionsConfig {
    pub inputs: String,
    pub conversation: String,
    pub pipeline: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "chromadb_storage".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_ragmem_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: crate::embedding::DEFAULT_MODEL.into(),
            cache_dir,
        }
    }
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            inputs: "user_inputs".into(),
            conversation: "conversation_context".into(),
            pipeline: "rag_collection".into(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { default_k: 5 }
    }
}

/// Returns `~/.ragmem/`, or `./.ragmem` when no home directory is known.
pub fn default_ragmem_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragmem")
}

/// Returns the default config file path: `~/.ragmem/config.toml`
pub fn default_config_path() -> PathBuf {
    default_ragmem_dir().join("config.toml")
}

impl RagConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RagConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (RAGMEM_STORAGE, RAGMEM_MODEL, RAGMEM_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RAGMEM_STORAGE") {
            self.storage.path = val;
        }
        if let Ok(val) = std::env::var("RAGMEM_MODEL") {
            self.embedding.model = val;
        }
        if let Ok(val) = std::env::var("RAGMEM_LOG_LEVEL") {
            self.logging.log_level = val;
        }
    }

    /// Resolve the storage directory, expanding `~` if needed.
    pub fn resolved_storage_path(&self) -> PathBuf {
        expand_tilde(&self.storage.path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RagConfig::default();
        assert_eq!(config.logging.log_level, "info");
        assert_eq!(config.storage.path, "chromadb_storage");
        assert_eq!(config.collections.inputs, "user_inputs");
        assert_eq!(config.collections.conversation, "conversation_context");
        assert_eq!(config.collections.pipeline, "rag_collection");
        assert_eq!(config.retrieval.default_k, 5);
        assert_eq!(config.embedding.provider, "local");
        assert!(config.embedding.cache_dir.ends_with("models"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[logging]
log_level = "debug"

[storage]
path = "/tmp/rag"

[embedding]
provider = "hashing"

[collections]
inputs = "notes"
"#;
        let config: RagConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.storage.path, "/tmp/rag");
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.collections.inputs, "notes");
        // defaults still apply for unset fields
        assert_eq!(config.collections.conversation, "conversation_context");
        assert_eq!(config.embedding.model, crate::embedding::DEFAULT_MODEL);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = RagConfig::load_from(tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.retrieval.default_k, 5);
    }

    #[test]
    fn expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("data/store"), PathBuf::from("data/store"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RagConfig::default();
        std::env::set_var("RAGMEM_STORAGE", "/tmp/override");
        std::env::set_var("RAGMEM_MODEL", "other-model");
        std::env::set_var("RAGMEM_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.path, "/tmp/override");
        assert_eq!(config.embedding.model, "other-model");
        assert_eq!(config.logging.log_level, "trace");

        std::env::remove_var("RAGMEM_STORAGE");
        std::env::remove_var("RAGMEM_MODEL");
        std::env::remove_var("RAGMEM_LOG_LEVEL");
    }
}
