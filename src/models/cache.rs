//! Local model cache layout and name resolution
//!
//! The cache root mirrors the HuggingFace hub layout, optionally mixed with
//! single-file packed models dropped directly into the root:
//! ```text
//! $HF_HOME/
//! ├── models--intfloat--multilingual-e5-large-instruct/
//! │   ├── snapshots/
//! │   │   └── {revision}/
//! │   │       ├── config.json
//! │   │       ├── model.safetensors
//! │   │       └── tokenizer.json
//! │   └── refs/
//! │       └── main
//! ├── qwen2.5-7b-instruct-q4_k_m.gguf
//! └── quantized/
//!     └── ...
//! ```
//!
//! Resolution never leaves the cache root. Anything that does not resolve here
//! is reported as absent; there is no remote fallback.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of the canonical directory naming convention
pub const CANONICAL_PREFIX: &str = "models--";

/// Extensions recognised as single-file packed models
pub const PACKED_EXTENSIONS: &[&str] = &["gguf", "ggml"];

/// On-disk shape of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// One packed file (e.g. GGUF)
    SingleFile,
    /// `models--org--name` directory in hub layout
    Directory,
}

/// A path that has been verified to exist inside the local cache.
///
/// Only this module can construct one, so every loader that accepts a
/// `LocalModelPath` is guaranteed to read from local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModelPath {
    path: PathBuf,
    format: ArtifactFormat,
}

impl LocalModelPath {
    fn new(path: PathBuf, format: ArtifactFormat) -> Self {
        Self { path, format }
    }

    /// The artifact root (directory or packed file)
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// Directory holding the model files.
    ///
    /// For hub-layout directories this is the snapshot referenced by
    /// `refs/main`, else the first snapshot with a `config.json`, else the
    /// artifact root itself. For packed files it is the file itself.
    pub fn content_dir(&self) -> PathBuf {
        if self.format == ArtifactFormat::SingleFile {
            return self.path.clone();
        }

        let refs_main = self.path.join("refs/main");
        if let Ok(revision) = std::fs::read_to_string(&refs_main) {
            let snapshot = self.path.join("snapshots").join(revision.trim());
            if snapshot.is_dir() {
                return snapshot;
            }
        }

        if let Ok(entries) = std::fs::read_dir(self.path.join("snapshots")) {
            let mut snapshots: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.join("config.json").exists())
                .collect();
            snapshots.sort();
            if let Some(first) = snapshots.into_iter().next() {
                return first;
            }
        }

        self.path.clone()
    }
}

/// Get the default cache root
///
/// Checks in order:
/// 1. `$HF_HOME`
/// 2. `$XDG_CACHE_HOME/huggingface/hub`
/// 3. `~/.cache/huggingface/hub`
pub fn default_cache_dir() -> PathBuf {
    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return PathBuf::from(hf_home);
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| PathBuf::from("storage/models"))
}

/// Normalize a caller-supplied model name into the resident key space
///
/// - `models--org--name` is returned unchanged
/// - `org/name` becomes `models--org--name`
/// - anything else is returned unchanged
pub fn to_canonical_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with(CANONICAL_PREFIX) {
        name.to_string()
    } else if name.contains('/') {
        format!("{}{}", CANONICAL_PREFIX, name.replace('/', "--"))
    } else {
        name.to_string()
    }
}

/// Human-readable form of a cache entry name
///
/// e.g. "models--BAAI--bge-small-en-v1.5" -> "BAAI/bge-small-en-v1.5"
pub fn display_name(cache_name: &str) -> String {
    match cache_name.strip_prefix(CANONICAL_PREFIX) {
        Some(rest) => rest.replacen("--", "/", 1),
        None => cache_name.to_string(),
    }
}

/// Whether a directory name follows `models--org--name`
pub fn is_canonical_dir_name(name: &str) -> bool {
    match name.strip_prefix(CANONICAL_PREFIX) {
        Some(rest) => match rest.split_once("--") {
            Some((org, model)) => !org.is_empty() && !model.is_empty(),
            None => false,
        },
        None => false,
    }
}

/// Whether a path has a packed-model extension
pub fn has_packed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PACKED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_relative_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && !name.split('/').any(|part| part == ".." || part == ".")
}

/// Resolve a caller-supplied name to an artifact inside `root`
///
/// Accepts canonical names, `org/name` ids, bare file names of packed models
/// directly in the root, and absolute paths to packed models directly in the
/// root. Returns `None` for anything else.
pub fn resolve_path(root: &Path, requested: &str) -> Option<LocalModelPath> {
    let requested = requested.trim();
    let as_path = Path::new(requested);

    if as_path.is_absolute() {
        return resolve_absolute_packed(root, as_path);
    }

    if !is_relative_safe(requested) {
        return None;
    }

    if has_packed_extension(as_path) && !requested.contains('/') {
        let candidate = root.join(requested);
        if candidate.is_file() {
            return Some(LocalModelPath::new(candidate, ArtifactFormat::SingleFile));
        }
    }

    // Only direct `models--org--name` children of the root are artifacts
    let canonical = to_canonical_name(requested);
    if !is_canonical_dir_name(&canonical) || canonical.contains('/') {
        return None;
    }

    let candidate = root.join(canonical);
    if candidate.is_dir() {
        return Some(LocalModelPath::new(candidate, ArtifactFormat::Directory));
    }

    None
}

fn resolve_absolute_packed(root: &Path, path: &Path) -> Option<LocalModelPath> {
    if !has_packed_extension(path) || !path.is_file() {
        return None;
    }

    let root = root.canonicalize().ok()?;
    let file = path.canonicalize().ok()?;
    if file.parent() == Some(root.as_path()) {
        Some(LocalModelPath::new(file, ArtifactFormat::SingleFile))
    } else {
        None
    }
}

/// Remove an artifact from the cache
///
/// Returns `Ok(false)` without touching the filesystem when the name does not
/// resolve.
pub fn delete(root: &Path, name: &str) -> GatewayResult<bool> {
    let Some(resolved) = resolve_path(root, name) else {
        return Ok(false);
    };

    let path = resolved.as_path();
    let result = match resolved.format() {
        ArtifactFormat::Directory => std::fs::remove_dir_all(path),
        ArtifactFormat::SingleFile => std::fs::remove_file(path),
    };

    result.map_err(|e| {
        GatewayError::internal(format!("failed to delete {}: {}", path.display(), e))
    })?;

    tracing::warn!(model = %name, path = %path.display(), "Deleted model from cache");
    Ok(true)
}

/// Recursively sum regular-file sizes under `path`
///
/// Symlinks are not followed, so hub snapshots that link into `blobs/` are
/// counted once.
pub fn directory_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                size += directory_size(&entry.path());
            } else if file_type.is_file()
                && let Ok(metadata) = entry.metadata()
            {
                size += metadata.len();
            }
        }
    }

    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_to_canonical_name() {
        assert_eq!(
            to_canonical_name("BAAI/bge-small-en-v1.5"),
            "models--BAAI--bge-small-en-v1.5"
        );
        assert_eq!(
            to_canonical_name("models--BAAI--bge-small-en-v1.5"),
            "models--BAAI--bge-small-en-v1.5"
        );
        assert_eq!(to_canonical_name("gpt2"), "gpt2");
    }

    #[test]
    fn test_canonical_name_is_idempotent() {
        let once = to_canonical_name("sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(to_canonical_name(&once), once);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            display_name("models--sentence-transformers--all-MiniLM-L6-v2"),
            "sentence-transformers/all-MiniLM-L6-v2"
        );
        assert_eq!(display_name("model.gguf"), "model.gguf");
    }

    #[test]
    fn test_is_canonical_dir_name() {
        assert!(is_canonical_dir_name("models--org--name"));
        assert!(!is_canonical_dir_name("models--orgonly"));
        assert!(!is_canonical_dir_name("models----name"));
        assert!(!is_canonical_dir_name(".locks"));
        assert!(!is_canonical_dir_name("quantized"));
    }

    #[test]
    #[serial]
    fn test_default_cache_dir_prefers_hf_home() {
        unsafe {
            std::env::set_var("HF_HOME", "/srv/models");
        }
        assert_eq!(default_cache_dir(), PathBuf::from("/srv/models"));
        unsafe {
            std::env::remove_var("HF_HOME");
            std::env::remove_var("XDG_CACHE_HOME");
        }
        assert!(default_cache_dir().to_string_lossy().contains("huggingface/hub"));
    }

    #[test]
    fn test_resolve_directory_by_both_forms() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("models--org--model")).unwrap();

        let a = resolve_path(root.path(), "org/model").unwrap();
        let b = resolve_path(root.path(), "models--org--model").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.format(), ArtifactFormat::Directory);
    }

    #[test]
    fn test_resolve_missing_returns_none() {
        let root = TempDir::new().unwrap();
        assert!(resolve_path(root.path(), "org/missing").is_none());
        assert!(resolve_path(root.path(), "missing.gguf").is_none());
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let root = TempDir::new().unwrap();
        let inner = root.path().join("cache");
        std::fs::create_dir(&inner).unwrap();
        std::fs::create_dir(root.path().join("models--org--outside")).unwrap();

        assert!(resolve_path(&inner, "../models--org--outside").is_none());
        assert!(resolve_path(&inner, "..").is_none());
    }

    #[test]
    fn test_resolve_ignores_non_model_directories() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("quantized/models--org--m--4bit")).unwrap();
        std::fs::create_dir(root.path().join("my-model")).unwrap();
        std::fs::create_dir_all(root.path().join("models--org--model/snapshots")).unwrap();

        assert!(resolve_path(root.path(), "quantized").is_none());
        assert!(resolve_path(root.path(), "my-model").is_none());
        assert!(resolve_path(root.path(), "org/model/snapshots").is_none());
        assert!(resolve_path(root.path(), "models--org--model/snapshots").is_none());
        assert!(resolve_path(root.path(), "org/model").is_some());
    }

    #[test]
    fn test_resolve_packed_file() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("tiny-llama-7b.Q4_K_M.gguf");
        std::fs::write(&file, b"GGUF").unwrap();

        let by_name = resolve_path(root.path(), "tiny-llama-7b.Q4_K_M.gguf").unwrap();
        assert_eq!(by_name.format(), ArtifactFormat::SingleFile);

        let by_abs = resolve_path(root.path(), file.to_str().unwrap()).unwrap();
        assert_eq!(by_abs.format(), ArtifactFormat::SingleFile);
    }

    #[test]
    fn test_resolve_absolute_outside_root() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = other.path().join("stray.gguf");
        std::fs::write(&file, b"GGUF").unwrap();

        assert!(resolve_path(root.path(), file.to_str().unwrap()).is_none());
    }

    #[test]
    fn test_content_dir_follows_refs_main() {
        let root = TempDir::new().unwrap();
        let model = root.path().join("models--org--model");
        std::fs::create_dir_all(model.join("snapshots/abc123")).unwrap();
        std::fs::create_dir_all(model.join("refs")).unwrap();
        std::fs::write(model.join("refs/main"), "abc123\n").unwrap();

        let resolved = resolve_path(root.path(), "org/model").unwrap();
        assert_eq!(resolved.content_dir(), model.join("snapshots/abc123"));
    }

    #[test]
    fn test_content_dir_flat_directory() {
        let root = TempDir::new().unwrap();
        let model = root.path().join("models--org--flat");
        std::fs::create_dir(&model).unwrap();
        std::fs::write(model.join("config.json"), "{}").unwrap();

        let resolved = resolve_path(root.path(), "models--org--flat").unwrap();
        assert_eq!(resolved.content_dir(), model);
    }

    #[test]
    fn test_delete_directory_and_file() {
        let root = TempDir::new().unwrap();
        let model = root.path().join("models--org--gone");
        std::fs::create_dir_all(model.join("snapshots/x")).unwrap();
        std::fs::write(model.join("snapshots/x/config.json"), "{}").unwrap();
        std::fs::write(root.path().join("m.gguf"), b"GGUF").unwrap();

        assert!(delete(root.path(), "org/gone").unwrap());
        assert!(!model.exists());
        assert!(delete(root.path(), "m.gguf").unwrap());
        assert!(!root.path().join("m.gguf").exists());
    }

    #[test]
    fn test_delete_unresolved_is_noop() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("keep.txt"), "x").unwrap();

        assert!(!delete(root.path(), "org/missing").unwrap());
        assert!(root.path().join("keep.txt").exists());
    }

    #[test]
    fn test_delete_leaves_non_model_directories() {
        let root = TempDir::new().unwrap();
        let quantized = root.path().join("quantized/models--org--m--4bit");
        std::fs::create_dir_all(&quantized).unwrap();
        std::fs::write(quantized.join("model.safetensors"), "x").unwrap();
        std::fs::create_dir(root.path().join("my-model")).unwrap();

        assert!(!delete(root.path(), "quantized").unwrap());
        assert!(!delete(root.path(), "my-model").unwrap());
        assert!(quantized.join("model.safetensors").exists());
        assert!(root.path().join("my-model").exists());
    }

    #[test]
    fn test_directory_size_nested() {
        let temp_dir = TempDir::new().unwrap();
        let subdir = temp_dir.path().join("subdir");
        std::fs::create_dir(&subdir).unwrap();
        std::fs::write(subdir.join("file1.txt"), "abc").unwrap();
        std::fs::write(temp_dir.path().join("file2.txt"), "defgh").unwrap();

        assert_eq!(directory_size(temp_dir.path()), 8);
    }

    #[test]
    fn test_directory_size_missing_dir() {
        assert_eq!(directory_size(Path::new("/nonexistent/dir/12345")), 0);
    }
}
