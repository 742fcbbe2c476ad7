//! Model management module
//!
//! Provides functionality for:
//! - Scanning the local model cache and classifying artifacts
//! - Resolving requested names to validated local paths
//! - Parsing model metadata from config.json
//! - Loading, tracking and unloading resident models

pub mod cache;
pub mod classify;
pub mod manager;
pub mod metadata;
pub mod runtime;
pub mod scanner;

pub use cache::{ArtifactFormat, LocalModelPath, default_cache_dir, display_name, to_canonical_name};
pub use classify::ArtifactKind;
pub use manager::{LoadOutcome, LoadedModelInfo, ManagerStats, ModelManager, UnloadOutcome};
pub use metadata::{ModelMetadata, parse_model_config};
pub use runtime::{
    ChatMessage, Device, EmbeddingModel, Generation, GenerationParams, GenerativeModel, ModelKind,
    ModelRuntime, ReferenceRuntime,
};
pub use scanner::{CacheScanner, ModelArtifact, ScanReport};
