//! Model metadata parsing
//!
//! Parses the configuration descriptor (`config.json`) shipped with
//! hub-layout models to extract architecture, model type and dimensions.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File name of the configuration descriptor
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Model metadata extracted from config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelMetadata {
    /// First declared architecture (e.g. "BertModel", "LlamaForCausalLM")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Model type (e.g. "bert", "xlm-roberta", "qwen2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,

    /// Hidden size / embedding dimension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u32>,
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    architectures: Option<Vec<String>>,
    model_type: Option<String>,
    vocab_size: Option<u32>,
    hidden_size: Option<u32>,
    max_position_embeddings: Option<u32>,
    // Some models use different names
    d_model: Option<u32>,
    n_embd: Option<u32>,
    n_positions: Option<u32>,
}

/// Parse a configuration descriptor file
pub fn parse_config_file(config_path: &Path) -> Result<ModelMetadata, MetadataError> {
    let content = std::fs::read_to_string(config_path).map_err(|source| MetadataError::Read {
        path: config_path.display().to_string(),
        source,
    })?;
    let raw: RawConfig = serde_json::from_str(&content).map_err(|source| MetadataError::Parse {
        path: config_path.display().to_string(),
        source,
    })?;

    Ok(ModelMetadata {
        architecture: raw.architectures.and_then(|a| a.into_iter().next()),
        model_type: raw.model_type,
        vocab_size: raw.vocab_size,
        hidden_size: raw.hidden_size.or(raw.d_model).or(raw.n_embd),
        max_position_embeddings: raw.max_position_embeddings.or(raw.n_positions),
    })
}

/// Parse `config.json` from a model content directory
///
/// Returns `Ok(None)` when the directory has no descriptor.
pub fn parse_model_config(content_dir: &Path) -> Result<Option<ModelMetadata>, MetadataError> {
    let config_path = content_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    parse_config_file(&config_path).map(Some)
}
