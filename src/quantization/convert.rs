//! Quantization conversion hook
//!
//! The gateway does not quantize weights itself. It hands a cached source
//! artifact to an external converter and tracks the output under
//! `<cache>/quantized/<org>--<name>--<level>`.

use super::planner::{PRECISION_LEVELS, precision_level};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{CacheScanner, LocalModelPath, display_name, to_canonical_name};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Sub-directory of the cache root holding converted artifacts
pub const QUANTIZED_DIR: &str = "quantized";

/// Converts a cached artifact to a lower precision
#[async_trait]
pub trait Quantizer: Send + Sync {
    async fn quantize(&self, source: &LocalModelPath, level: &str, output: &Path) -> Result<()>;
}

/// Runs `<program> [args...] <source_dir> <level> <output_dir>`
#[derive(Debug, Clone)]
pub struct CommandQuantizer {
    program: String,
    args: Vec<String>,
}

impl CommandQuantizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line; `None` if empty
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Quantizer for CommandQuantizer {
    async fn quantize(&self, source: &LocalModelPath, level: &str, output: &Path) -> Result<()> {
        let source_dir = source.content_dir();
        tracing::info!(
            program = %self.program,
            source = %source_dir.display(),
            level = %level,
            output = %output.display(),
            "Running quantization command"
        );

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(&source_dir)
            .arg(level)
            .arg(output)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!("{} exited with {}: {}", self.program, result.status, stderr.trim());
        }
        Ok(())
    }
}

/// Root directory of converted artifacts
pub fn quantized_root(cache_root: &Path) -> PathBuf {
    cache_root.join(QUANTIZED_DIR)
}

/// Output location for a model at a level
pub fn quantized_model_path(cache_root: &Path, model_name: &str, level: &str) -> PathBuf {
    let safe_name = display_name(&to_canonical_name(model_name)).replace('/', "--");
    quantized_root(cache_root).join(format!("{}--{}", safe_name, level))
}

/// A converted artifact found on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantizedArtifact {
    pub original_name: String,
    pub quantized_name: String,
    pub quantization_level: String,
    pub path: PathBuf,
    pub size_mb: f64,
}

/// List converted artifacts, sorted by name
pub fn list_quantized(scanner: &CacheScanner) -> Vec<QuantizedArtifact> {
    let root = quantized_root(scanner.root());
    let Ok(entries) = std::fs::read_dir(&root) else {
        return Vec::new();
    };

    let mut artifacts: Vec<_> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let quantized_name = entry.file_name().to_str()?.to_string();
            let (original, level) = quantized_name.rsplit_once("--")?;
            if original.is_empty() || level.is_empty() {
                return None;
            }
            let path = entry.path();
            let size = scanner.directory_size(&path);
            Some(QuantizedArtifact {
                original_name: original.replacen("--", "/", 1),
                quantization_level: level.to_string(),
                quantized_name: quantized_name.clone(),
                size_mb: (size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                path,
            })
        })
        .collect();

    artifacts.sort_by(|a, b| a.quantized_name.cmp(&b.quantized_name));
    artifacts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuantizeOutcome {
    AlreadyExists { quantized_path: PathBuf },
    Completed { quantized_path: PathBuf },
}

/// Convert a cached model, unless the output already exists
///
/// Fails with `NotFoundInCache` when the source is not local and with
/// `QuantizerUnavailable` when no converter is configured.
pub async fn request_quantization(
    scanner: &CacheScanner,
    quantizer: Option<&dyn Quantizer>,
    model_name: &str,
    level: &str,
) -> GatewayResult<QuantizeOutcome> {
    if precision_level(level).is_none() {
        let known: Vec<_> = PRECISION_LEVELS.iter().map(|l| l.name).collect();
        return Err(GatewayError::invalid(format!(
            "unsupported quantization level '{}' (expected one of {})",
            level,
            known.join(", ")
        )));
    }

    let output = quantized_model_path(scanner.root(), model_name, level);
    if output.exists() {
        tracing::info!(model = %model_name, level = %level, "Quantized artifact already exists");
        return Ok(QuantizeOutcome::AlreadyExists {
            quantized_path: output,
        });
    }

    let Some(source) = scanner.resolve_path(model_name) else {
        tracing::warn!(
            model = %model_name,
            "Quantization source not in local cache, refusing to fetch from network"
        );
        return Err(GatewayError::NotFoundInCache {
            name: model_name.to_string(),
        });
    };

    let Some(quantizer) = quantizer else {
        return Err(GatewayError::QuantizerUnavailable);
    };

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            GatewayError::internal(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    match quantizer.quantize(&source, level, &output).await {
        Ok(()) => {
            tracing::info!(
                model = %model_name,
                level = %level,
                output = %output.display(),
                "Quantization completed"
            );
            Ok(QuantizeOutcome::Completed {
                quantized_path: output,
            })
        }
        Err(e) => {
            tracing::error!(
                model = %model_name,
                level = %level,
                error = %format!("{:#}", e),
                "Quantization failed"
            );
            Err(GatewayError::QuantizationFailed {
                name: model_name.to_string(),
                message: format!("{:#}", e),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct WritingQuantizer;

    #[async_trait]
    impl Quantizer for WritingQuantizer {
        async fn quantize(&self, _: &LocalModelPath, _: &str, output: &Path) -> Result<()> {
            std::fs::create_dir_all(output)?;
            std::fs::write(output.join("model.safetensors"), b"q")?;
            Ok(())
        }
    }

    struct FailingQuantizer;

    #[async_trait]
    impl Quantizer for FailingQuantizer {
        async fn quantize(&self, _: &LocalModelPath, _: &str, _: &Path) -> Result<()> {
            bail!("out of memory")
        }
    }

    fn cache_with_model() -> TempDir {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("models--org--model");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();
        root
    }

    #[test]
    fn test_quantized_model_path() {
        let root = Path::new("/cache");
        assert_eq!(
            quantized_model_path(root, "org/model", "8bit"),
            PathBuf::from("/cache/quantized/org--model--8bit")
        );
        assert_eq!(
            quantized_model_path(root, "models--org--model", "4bit"),
            PathBuf::from("/cache/quantized/org--model--4bit")
        );
    }

    #[test]
    fn test_command_line_parsing() {
        let q = CommandQuantizer::from_command_line("python3 convert.py --fast").unwrap();
        assert_eq!(q.program, "python3");
        assert_eq!(q.args, vec!["convert.py", "--fast"]);
        assert!(CommandQuantizer::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_request_quantization_flow() {
        let root = cache_with_model();
        let scanner = CacheScanner::new(root.path());

        let outcome = request_quantization(&scanner, Some(&WritingQuantizer), "org/model", "8bit")
            .await
            .unwrap();
        assert!(matches!(outcome, QuantizeOutcome::Completed { .. }));

        let again = request_quantization(&scanner, None, "org/model", "8bit").await.unwrap();
        assert!(matches!(again, QuantizeOutcome::AlreadyExists { .. }));

        let listed = list_quantized(&scanner);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_name, "org/model");
        assert_eq!(listed[0].quantization_level, "8bit");
    }

    #[tokio::test]
    async fn test_request_quantization_errors() {
        let root = cache_with_model();
        let scanner = CacheScanner::new(root.path());

        let err = request_quantization(&scanner, None, "org/model", "3bit").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));

        let err = request_quantization(&scanner, None, "org/missing", "8bit").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFoundInCache { .. }));

        let err = request_quantization(&scanner, None, "org/model", "8bit").await.unwrap_err();
        assert!(matches!(err, GatewayError::QuantizerUnavailable));

        let err = request_quantization(&scanner, Some(&FailingQuantizer), "org/model", "4bit")
            .await
            .unwrap_err();
        match err {
            GatewayError::QuantizationFailed { message, .. } => {
                assert!(message.contains("out of memory"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_quantizer_failure_reports_status() {
        let root = cache_with_model();
        let source = crate::models::cache::resolve_path(root.path(), "org/model").unwrap();
        let quantizer = CommandQuantizer::new("false", Vec::new());

        let err = quantizer
            .quantize(&source, "8bit", &root.path().join("out"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("false exited"));
    }

    #[test]
    fn test_list_quantized_missing_dir() {
        let root = TempDir::new().unwrap();
        assert!(list_quantized(&CacheScanner::new(root.path())).is_empty());
    }
}
