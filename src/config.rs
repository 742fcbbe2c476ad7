//! Configuration structures and loading logic

use crate::models::default_cache_dir;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_host: String,
    pub api_port: u16,

    /// Root of the local model cache
    pub cache_dir: PathBuf,

    /// Embedding model used when a request names none, and preloaded at startup
    pub default_embedding_model: Option<String>,

    /// Chat model used when a request names none; falls back to the first
    /// generative artifact in the cache
    pub default_chat_model: Option<String>,

    pub preload_embedding_model: bool,

    /// External converter invoked as `<command> <source_dir> <level> <output_dir>`
    pub quantize_command: Option<String>,

    pub batch: BatchConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            api_port: default_api_port(),
            cache_dir: default_cache_dir(),
            default_embedding_model: Some(default_embedding_model()),
            default_chat_model: None,
            preload_embedding_model: true,
            quantize_command: None,
            batch: BatchConfig::default(),
        }
    }
}

/// Embedding batch sizing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Accelerator bytes consumed per input character
    pub memory_per_char: f64,
    /// Share of free accelerator memory a batch may use
    pub memory_fraction: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            memory_per_char: 0.3,
            memory_fraction: 0.7,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(host) = std::env::var("MODEL_GATEWAY_HOST") {
            config.api_host = host;
        }
        if let Ok(port) = std::env::var("MODEL_GATEWAY_PORT") {
            config.api_port = port.parse().context("Invalid MODEL_GATEWAY_PORT value")?;
        }
        if let Ok(cache_dir) = std::env::var("MODEL_GATEWAY_CACHE_DIR") {
            config.cache_dir = PathBuf::from(cache_dir);
        }
        if let Ok(model) = std::env::var("MODEL_GATEWAY_EMBEDDING_MODEL") {
            config.default_embedding_model = Some(model).filter(|m| !m.is_empty());
        }
        if let Ok(model) = std::env::var("MODEL_GATEWAY_CHAT_MODEL") {
            config.default_chat_model = Some(model).filter(|m| !m.is_empty());
        }
        if let Ok(command) = std::env::var("MODEL_GATEWAY_QUANTIZE_COMMAND") {
            config.quantize_command = Some(command).filter(|c| !c.trim().is_empty());
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.cache_dir.as_os_str().is_empty() {
            anyhow::bail!("cache_dir cannot be empty");
        }

        if !(self.batch.memory_per_char > 0.0) {
            anyhow::bail!(
                "batch.memory_per_char must be positive (got {})",
                self.batch.memory_per_char
            );
        }
        if !(self.batch.memory_fraction > 0.0 && self.batch.memory_fraction <= 1.0) {
            anyhow::bail!(
                "batch.memory_fraction must be in (0, 1] (got {})",
                self.batch.memory_fraction
            );
        }

        if !self.cache_dir.exists() {
            tracing::warn!(
                cache_dir = %self.cache_dir.display(),
                "Model cache directory does not exist yet"
            );
        }

        Ok(())
    }
}

// Default functions
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8000
}
fn default_embedding_model() -> String {
    "models--intfloat--multilingual-e5-large-instruct".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.api_host, "0.0.0.0");
        assert!(config.preload_embedding_model);
        assert_eq!(config.batch, BatchConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_validation() {
        let config = GatewayConfig {
            api_port: 500, // Below 1024
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_validation() {
        let mut config = GatewayConfig::default();
        config.batch.memory_fraction = 1.5;
        assert!(config.validate().is_err());

        config.batch.memory_fraction = 0.5;
        config.batch.memory_per_char = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_cache_dir_rejected() {
        let config = GatewayConfig {
            cache_dir: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_toml_with_env_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
api_port = 9100
cache_dir = "/srv/models"
default_chat_model = "org/chat"

[batch]
memory_fraction = 0.5
"#,
        )
        .unwrap();

        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var("MODEL_GATEWAY_PORT", "9200") };
        let config = GatewayConfig::load(Some(path));
        unsafe { std::env::remove_var("MODEL_GATEWAY_PORT") };
        let config = config.unwrap();

        assert_eq!(config.api_port, 9200);
        assert_eq!(config.cache_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.default_chat_model.as_deref(), Some("org/chat"));
        assert_eq!(config.batch.memory_fraction, 0.5);
        assert_eq!(config.batch.memory_per_char, 0.3);
    }

    #[test]
    #[serial]
    fn test_invalid_env_port() {
        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var("MODEL_GATEWAY_PORT", "not-a-port") };
        let result = GatewayConfig::load(None);
        unsafe { std::env::remove_var("MODEL_GATEWAY_PORT") };
        assert!(result.is_err());
    }
}
