//! Model runtime interface
//!
//! The manager never instantiates models itself. It hands a validated
//! [`LocalModelPath`] to a [`ModelRuntime`], which returns an opaque handle.
//! Because `LocalModelPath` can only come from cache resolution, no runtime
//! can be asked to load by free-form name (and therefore cannot fetch remotely).

use super::cache::{ArtifactFormat, LocalModelPath};
use super::metadata::parse_model_config;
use crate::error::GatewayError;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of a resident model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Embedding,
    Generative,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Generative => write!(f, "generative"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedding" | "embeddings" | "embed" => Ok(Self::Embedding),
            "generative" | "llm" | "chat" => Ok(Self::Generative),
            other => Err(GatewayError::UnsupportedKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Where a model is resident; serialized as "cpu" or "cuda:N"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum Device {
    Cpu,
    Accelerator(u32),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Accelerator(_))
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator(i) => write!(f, "cuda:{}", i),
        }
    }
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// "stop" or "length"
    pub finish_reason: String,
    pub completion_tokens: u32,
}

/// Loaded embedding model
pub trait EmbeddingModel: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Loaded generative model
pub trait GenerativeModel: Send + Sync {
    fn generate(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<Generation>;
}

/// Loader for model handles. Implementations wrap a concrete inference runtime.
///
/// Loading is blocking; the manager calls it from a blocking task.
pub trait ModelRuntime: Send + Sync {
    fn load_embedding(
        &self,
        path: &LocalModelPath,
        device: Device,
    ) -> Result<Arc<dyn EmbeddingModel>>;

    fn load_generative(
        &self,
        path: &LocalModelPath,
        device: Device,
    ) -> Result<Arc<dyn GenerativeModel>>;

    /// Return cached accelerator memory to the driver after an unload
    ///
    /// Only called once the unloaded model has no handles left. When a
    /// request was still running at unload time the call is skipped, and
    /// the memory is returned by the next release on that device.
    fn release_accelerator_cache(&self, _device: Device) {}
}

/// Whitespace token count used for usage accounting
pub fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

// ============================================================================
// Reference runtime
// ============================================================================

const GGUF_MAGIC: &[u8; 4] = b"GGUF";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
/// Largest `hidden_size` accepted from a model config
const MAX_EMBEDDING_DIMENSIONS: usize = 65_536;

/// Built-in runtime with no native dependencies
///
/// Embeddings are L2-normalised feature-hashing vectors sized by the model's
/// `hidden_size`; generation echoes the last user turn. Artifacts are still
/// validated on load, so a corrupt artifact fails like it would in a real
/// runtime.
#[derive(Debug, Default, Clone)]
pub struct ReferenceRuntime;

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self
    }

    fn validate(path: &LocalModelPath) -> Result<Option<usize>> {
        match path.format() {
            ArtifactFormat::SingleFile => {
                let mut magic = [0u8; 4];
                std::fs::File::open(path.as_path())
                    .and_then(|mut f| f.read_exact(&mut magic))
                    .with_context(|| format!("cannot read {}", path.as_path().display()))?;
                if &magic != GGUF_MAGIC {
                    bail!("{} is not a GGUF file", path.as_path().display());
                }
                Ok(None)
            }
            ArtifactFormat::Directory => {
                let content_dir = path.content_dir();
                let metadata = parse_model_config(&content_dir)?.with_context(|| {
                    format!("no config.json under {}", content_dir.display())
                })?;
                match metadata.hidden_size.map(|h| h as usize) {
                    Some(size) if size == 0 || size > MAX_EMBEDDING_DIMENSIONS => bail!(
                        "{}: hidden_size {} is outside 1..={}",
                        content_dir.display(),
                        size,
                        MAX_EMBEDDING_DIMENSIONS
                    ),
                    size => Ok(size),
                }
            }
        }
    }
}

impl ModelRuntime for ReferenceRuntime {
    fn load_embedding(
        &self,
        path: &LocalModelPath,
        device: Device,
    ) -> Result<Arc<dyn EmbeddingModel>> {
        let dimensions = Self::validate(path)?.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
        tracing::debug!(
            path = %path.as_path().display(),
            %device,
            dimensions,
            "Reference embedding model ready"
        );
        Ok(Arc::new(HashingEmbedder { dimensions }))
    }

    fn load_generative(
        &self,
        path: &LocalModelPath,
        device: Device,
    ) -> Result<Arc<dyn GenerativeModel>> {
        Self::validate(path)?;
        tracing::debug!(
            path = %path.as_path().display(),
            %device,
            "Reference generative model ready"
        );
        Ok(Arc::new(EchoGenerator))
    }
}

struct HashingEmbedder {
    dimensions: usize,
}

impl EmbeddingModel for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }
}

impl HashingEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let slot = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

struct EchoGenerator;

impl GenerativeModel for EchoGenerator {
    fn generate(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<Generation> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .or_else(|| messages.last())
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let words: Vec<&str> = last.split_whitespace().collect();
        let limit = params.max_tokens as usize;
        let (text, finish_reason) = if words.len() > limit {
            (words[..limit].join(" "), "length")
        } else {
            (words.join(" "), "stop")
        };

        Ok(Generation {
            completion_tokens: count_tokens(&text),
            text,
            finish_reason: finish_reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cache::resolve_path;
    use tempfile::TempDir;

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!("embedding".parse::<ModelKind>().unwrap(), ModelKind::Embedding);
        assert_eq!("LLM".parse::<ModelKind>().unwrap(), ModelKind::Generative);
        let err = "vision".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedKind { kind } if kind == "vision"));
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Accelerator(1).to_string(), "cuda:1");
        assert_eq!(serde_json::to_value(Device::Accelerator(0)).unwrap(), "cuda:0");
    }

    #[test]
    fn test_reference_embedding_dimensions_from_config() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("models--org--embed");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("config.json"), r#"{"hidden_size": 16}"#).unwrap();

        let path = resolve_path(root.path(), "org/embed").unwrap();
        let model = ReferenceRuntime::new().load_embedding(&path, Device::Cpu).unwrap();
        assert_eq!(model.dimensions(), 16);

        let vectors = model
            .embed(&["hello world".to_string(), "hello world".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vectors[1]);
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_reference_rejects_bad_packed_file() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("fake.gguf"), b"NOPE").unwrap();

        let path = resolve_path(root.path(), "fake.gguf").unwrap();
        let err = ReferenceRuntime::new()
            .load_generative(&path, Device::Cpu)
            .err()
            .unwrap();
        assert!(err.to_string().contains("not a GGUF file"));
    }

    #[test]
    fn test_reference_rejects_directory_without_config() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("models--org--empty")).unwrap();

        let path = resolve_path(root.path(), "org/empty").unwrap();
        assert!(ReferenceRuntime::new().load_embedding(&path, Device::Cpu).is_err());
    }

    #[test]
    fn test_reference_rejects_out_of_range_hidden_size() {
        let root = TempDir::new().unwrap();
        for (name, hidden_size) in [("zero", 0u64), ("huge", 4_000_000_000)] {
            let dir = root.path().join(format!("models--org--{name}"));
            std::fs::create_dir(&dir).unwrap();
            let config = format!(r#"{{"hidden_size": {hidden_size}}}"#);
            std::fs::write(dir.join("config.json"), config).unwrap();

            let path = resolve_path(root.path(), &format!("org/{name}")).unwrap();
            let err = ReferenceRuntime::new()
                .load_embedding(&path, Device::Cpu)
                .err()
                .unwrap();
            assert!(err.to_string().contains("hidden_size"), "{name}: {err:#}");
        }
    }

    #[test]
    fn test_echo_generation_truncates() {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: "be brief".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: "one two three four".to_string(),
            },
        ];
        let params = GenerationParams {
            max_tokens: 2,
            ..Default::default()
        };

        let out = EchoGenerator.generate(&messages, &params).unwrap();
        assert_eq!(out.text, "one two");
        assert_eq!(out.finish_reason, "length");
        assert_eq!(out.completion_tokens, 2);
    }
}
