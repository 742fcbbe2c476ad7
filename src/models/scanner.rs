//! Cache scanning and artifact analysis
//!
//! Produces the current list of model artifacts under a cache root. Nothing is
//! cached between scans: every call re-reads the filesystem.

use super::cache::{self, ArtifactFormat, LocalModelPath};
use super::classify::{
    ArtifactKind, DirectoryEvidence, classify_directory_kind, classify_packed_kind,
};
use super::metadata::{CONFIG_FILE, MetadataError, ModelMetadata, parse_config_file};
use crate::error::GatewayResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Artifacts below this size are never considered usable
pub const MIN_USABLE_BYTES: u64 = 1024 * 1024;

/// Extensions of weight files inside directory artifacts
pub const WEIGHT_EXTENSIONS: &[&str] = &[
    "safetensors",
    "bin",
    "pt",
    "pth",
    "ckpt",
    "onnx",
    "h5",
    "msgpack",
    "gguf",
];

/// Error analysing a single cache entry. Never escapes `scan`.
#[derive(Debug, Error)]
pub enum ScanEntryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// One file inside an artifact
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFile {
    pub name: String,
    pub size_bytes: u64,
    pub relative_path: String,
}

/// A model discovered in the cache
#[derive(Debug, Clone, Serialize)]
pub struct ModelArtifact {
    /// Raw on-disk identifier
    pub name: String,
    pub display_name: String,
    pub path: PathBuf,
    pub format: ArtifactFormat,
    pub kind: ArtifactKind,
    /// Rule that decided `kind`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified_by: Option<&'static str>,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub files: Vec<ArtifactFile>,
    pub usable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
}

/// Result of one scan pass
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub cache_path: PathBuf,
    /// Directory entries seen in the root, models or not
    pub total_folders: usize,
    pub total_models: usize,
    pub models: Vec<ModelArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Scanner over one cache root
#[derive(Debug, Clone)]
pub struct CacheScanner {
    root: PathBuf,
}

impl CacheScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the cache root
    ///
    /// Entries that fail analysis are logged and dropped; they never abort the
    /// scan. Results are sorted embedding-first, then by name.
    pub fn scan(&self) -> ScanReport {
        tracing::info!(cache_path = %self.root.display(), "Scanning model cache");

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    cache_path = %self.root.display(),
                    error = %e,
                    "Model cache is not readable"
                );
                return ScanReport {
                    cache_path: self.root.clone(),
                    total_folders: 0,
                    total_models: 0,
                    models: Vec::new(),
                    error: Some(format!("cache directory unavailable: {}", e)),
                };
            }
        };

        let mut total_folders = 0;
        let mut models = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total_folders += 1;
            }

            match self.analyze_entry(&path) {
                Ok(Some(artifact)) => models.push(artifact),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Dropping unreadable cache entry"
                    );
                }
            }
        }

        sort_artifacts(&mut models);

        tracing::info!(
            total_folders,
            total_models = models.len(),
            "Model cache scan complete"
        );

        ScanReport {
            cache_path: self.root.clone(),
            total_folders,
            total_models: models.len(),
            models,
            error: None,
        }
    }

    /// Usable artifacts only, in scan order
    pub fn usable_models(&self) -> Vec<ModelArtifact> {
        self.scan().models.into_iter().filter(|m| m.usable).collect()
    }

    /// First usable artifact of the given kind
    pub fn first_of_kind(&self, kind: ArtifactKind) -> Option<ModelArtifact> {
        self.usable_models().into_iter().find(|m| m.kind == kind)
    }

    /// Resolve a caller-supplied name inside this cache. See [`cache::resolve_path`].
    pub fn resolve_path(&self, requested: &str) -> Option<LocalModelPath> {
        cache::resolve_path(&self.root, requested)
    }

    /// Delete an artifact. `Ok(false)` if the name does not resolve.
    pub fn delete(&self, name: &str) -> GatewayResult<bool> {
        cache::delete(&self.root, name)
    }

    pub fn directory_size(&self, dir: &Path) -> u64 {
        cache::directory_size(dir)
    }

    /// Analyse one root entry. `Ok(None)` means "not a model", silently skipped.
    fn analyze_entry(&self, path: &Path) -> Result<Option<ModelArtifact>, ScanEntryError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };

        if path.is_dir() {
            if !cache::is_canonical_dir_name(name) {
                return Ok(None);
            }
            self.analyze_directory(name, path)
        } else if path.is_file() && cache::has_packed_extension(path) {
            analyze_packed(name, path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn analyze_directory(
        &self,
        name: &str,
        dir: &Path,
    ) -> Result<Option<ModelArtifact>, ScanEntryError> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;

        let config_paths: Vec<PathBuf> = files
            .iter()
            .filter(|f| f.name == CONFIG_FILE)
            .map(|f| dir.join(&f.relative_path))
            .collect();
        if config_paths.is_empty() {
            tracing::debug!(model = %name, "Skipping directory without configuration descriptor");
            return Ok(None);
        }

        // Prefer the descriptor in the active snapshot
        let preferred = self
            .resolve_path(name)
            .map(|p| p.content_dir().join(CONFIG_FILE))
            .filter(|p| p.is_file())
            .unwrap_or_else(|| config_paths[0].clone());
        let metadata = parse_config_file(&preferred)?;

        let file_names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let (kind, classified_by) = classify_directory_kind(&DirectoryEvidence {
            dir_name: name,
            file_names: &file_names,
            metadata: Some(&metadata),
        });
        if kind == ArtifactKind::Unknown {
            tracing::warn!(model = %name, "Could not infer model kind");
        }

        files.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        let size_bytes = cache::directory_size(dir);

        let mut artifact = ModelArtifact {
            name: name.to_string(),
            display_name: cache::display_name(name),
            path: dir.to_path_buf(),
            format: ArtifactFormat::Directory,
            kind,
            classified_by,
            size_bytes,
            size_mb: bytes_to_mb(size_bytes),
            files,
            usable: false,
            metadata: Some(metadata),
        };
        artifact.usable = is_usable(&artifact);

        Ok(Some(artifact))
    }
}

fn analyze_packed(name: &str, path: &Path) -> Result<ModelArtifact, ScanEntryError> {
    let size_bytes = std::fs::metadata(path)
        .map_err(|source| ScanEntryError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    Ok(ModelArtifact {
        name: name.to_string(),
        display_name: name.to_string(),
        path: path.to_path_buf(),
        format: ArtifactFormat::SingleFile,
        kind: classify_packed_kind(name),
        classified_by: Some("packed-file-name"),
        size_bytes,
        size_mb: bytes_to_mb(size_bytes),
        files: vec![ArtifactFile {
            name: name.to_string(),
            size_bytes,
            relative_path: name.to_string(),
        }],
        usable: true,
        metadata: None,
    })
}

/// Structural completeness check
///
/// Packed files are usable whenever present. Directories need a weight file, a
/// configuration descriptor, and at least [`MIN_USABLE_BYTES`] on disk.
pub fn is_usable(artifact: &ModelArtifact) -> bool {
    match artifact.format {
        ArtifactFormat::SingleFile => true,
        ArtifactFormat::Directory => {
            if artifact.size_bytes < MIN_USABLE_BYTES {
                return false;
            }
            let has_weights = artifact.files.iter().any(|f| is_weight_file(&f.name));
            let has_config = artifact.files.iter().any(|f| f.name == CONFIG_FILE);
            has_weights && has_config
        }
    }
}

fn is_weight_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| WEIGHT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Embedding artifacts first, then lexicographic by name
pub fn sort_artifacts(models: &mut [ModelArtifact]) {
    models.sort_by(|a, b| {
        let a_rank = a.kind != ArtifactKind::Embedding;
        let b_rank = b.kind != ArtifactKind::Embedding;
        a_rank.cmp(&b_rank).then_with(|| a.name.cmp(&b.name))
    });
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Collect constituent files. Hub `blobs/` are skipped since snapshots link
/// into them; directory symlinks are not followed.
fn collect_files(
    base: &Path,
    dir: &Path,
    out: &mut Vec<ArtifactFile>,
) -> Result<(), ScanEntryError> {
    let io_err = |source| ScanEntryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_err)?;

        if file_type.is_dir() {
            if dir == base && entry.file_name() == "blobs" {
                continue;
            }
            collect_files(base, &path, out)?;
            continue;
        }

        // Follows file symlinks; dangling links are ignored
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        let relative_path = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        out.push(ArtifactFile {
            name: entry.file_name().to_string_lossy().to_string(),
            size_bytes: metadata.len(),
            relative_path,
        });
    }

    Ok(())
}
