//! Resident model manager
//!
//! Owns every loaded model handle. Loading is gated on the cache scanner:
//! a name that does not resolve to a local artifact is refused, so nothing
//! here can trigger a network download.
//!
//! Load and unload for one name are serialized by a per-name async mutex,
//! so concurrent duplicate loads instantiate the model exactly once and the
//! later callers observe [`LoadOutcome::AlreadyLoaded`].

use super::cache::to_canonical_name;
use super::runtime::{
    ChatMessage, Device, EmbeddingModel, Generation, GenerationParams, GenerativeModel, ModelKind,
    ModelRuntime,
};
use super::scanner::CacheScanner;
use crate::error::{GatewayError, GatewayResult};
use crate::gpu::AcceleratorProbe;
use crate::metrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Resident embedding model
struct EmbeddingEntry {
    handle: Arc<dyn EmbeddingModel>,
    device: Device,
    source_path: PathBuf,
    dimensions: usize,
    loaded_at: DateTime<Utc>,
}

/// Resident generative model
struct GenerativeEntry {
    handle: Arc<dyn GenerativeModel>,
    device: Device,
    source_path: PathBuf,
    loaded_at: DateTime<Utc>,
}

enum LoadedModel {
    Embedding(EmbeddingEntry),
    Generative(GenerativeEntry),
}

impl LoadedModel {
    fn kind(&self) -> ModelKind {
        match self {
            Self::Embedding(_) => ModelKind::Embedding,
            Self::Generative(_) => ModelKind::Generative,
        }
    }

    fn device(&self) -> Device {
        match self {
            Self::Embedding(e) => e.device,
            Self::Generative(g) => g.device,
        }
    }

    /// Handles held outside this entry, i.e. requests still running
    fn in_flight(&self) -> usize {
        let count = match self {
            Self::Embedding(e) => Arc::strong_count(&e.handle),
            Self::Generative(g) => Arc::strong_count(&g.handle),
        };
        count - 1
    }

    fn info(&self, name: &str) -> LoadedModelInfo {
        match self {
            Self::Embedding(e) => LoadedModelInfo {
                name: name.to_string(),
                kind: ModelKind::Embedding,
                device: e.device,
                source_path: e.source_path.clone(),
                dimensions: Some(e.dimensions),
                loaded_at: e.loaded_at,
            },
            Self::Generative(g) => LoadedModelInfo {
                name: name.to_string(),
                kind: ModelKind::Generative,
                device: g.device,
                source_path: g.source_path.clone(),
                dimensions: None,
                loaded_at: g.loaded_at,
            },
        }
    }
}

/// Read-only view of a resident entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedModelInfo {
    pub name: String,
    pub kind: ModelKind,
    pub device: Device,
    pub source_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadOutcome {
    Unloaded,
    /// Benign no-op: the name was never resident
    NotLoaded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub total_loaded: usize,
    pub embedding_models: usize,
    pub generative_models: usize,
    pub models: BTreeMap<String, ModelKind>,
}

/// Owner of all resident models
pub struct ModelManager {
    scanner: Arc<CacheScanner>,
    runtime: Arc<dyn ModelRuntime>,
    probe: Arc<dyn AcceleratorProbe>,
    resident: RwLock<HashMap<String, LoadedModel>>,
    name_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ModelManager {
    pub fn new(
        scanner: Arc<CacheScanner>,
        runtime: Arc<dyn ModelRuntime>,
        probe: Arc<dyn AcceleratorProbe>,
    ) -> Self {
        Self {
            scanner,
            runtime,
            probe,
            resident: RwLock::new(HashMap::new()),
            name_locks: DashMap::new(),
        }
    }

    fn name_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.name_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-name lock once nobody else holds or waits on it
    fn release_name_lock(&self, key: &str) {
        // One reference in the map plus the caller's clone
        self.name_locks.remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Load a model from the local cache
    ///
    /// Idempotent: a name that is already resident reports
    /// [`LoadOutcome::AlreadyLoaded`] without touching the runtime, whatever
    /// kind it was loaded as.
    pub async fn load(&self, name: &str, kind: ModelKind) -> GatewayResult<LoadOutcome> {
        let key = to_canonical_name(name);
        let lock = self.name_lock(&key);
        let guard = lock.lock().await;

        let result = self.load_locked(name, &key, kind).await;

        drop(guard);
        self.release_name_lock(&key);
        result
    }

    async fn load_locked(
        &self,
        name: &str,
        key: &str,
        kind: ModelKind,
    ) -> GatewayResult<LoadOutcome> {
        if let Some(existing) = self.resident.read().await.get(key) {
            tracing::debug!(model = %key, kind = %existing.kind(), "Model already resident");
            metrics::record_model_load(key, "already_loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        // Resolution uses the caller's original spelling; the key only names the slot
        let Some(path) = self.scanner.resolve_path(name) else {
            tracing::warn!(
                model = %name,
                cache = %self.scanner.root().display(),
                "Model not found in local cache, refusing to fetch from network"
            );
            metrics::record_model_load(key, "not_found");
            return Err(GatewayError::NotFoundInCache {
                name: name.to_string(),
            });
        };

        tracing::info!(model = %key, %kind, path = %path.as_path().display(), "Loading model");

        let runtime = self.runtime.clone();
        let probe = self.probe.clone();
        let loaded = tokio::task::spawn_blocking(move || -> anyhow::Result<LoadedModel> {
            let device = probe.probe().preferred_device();
            let source_path = path.as_path().to_path_buf();
            let loaded_at = Utc::now();
            match kind {
                ModelKind::Embedding => {
                    let handle = runtime.load_embedding(&path, device)?;
                    Ok(LoadedModel::Embedding(EmbeddingEntry {
                        dimensions: handle.dimensions(),
                        handle,
                        device,
                        source_path,
                        loaded_at,
                    }))
                }
                ModelKind::Generative => {
                    let handle = runtime.load_generative(&path, device)?;
                    Ok(LoadedModel::Generative(GenerativeEntry {
                        handle,
                        device,
                        source_path,
                        loaded_at,
                    }))
                }
            }
        })
        .await?;

        match loaded {
            Ok(entry) => {
                let device = entry.device();
                let mut resident = self.resident.write().await;
                resident.insert(key.to_string(), entry);
                metrics::update_resident_models(resident.len());
                metrics::record_model_load(key, "loaded");
                tracing::info!(
                    model = %key,
                    %kind,
                    %device,
                    total_loaded = resident.len(),
                    "Model loaded"
                );
                Ok(LoadOutcome::Loaded)
            }
            Err(e) => {
                metrics::record_model_load(key, "failed");
                tracing::error!(
                    model = %key,
                    %kind,
                    error = %format!("{:#}", e),
                    "Model load failed"
                );
                Err(GatewayError::LoaderFailure {
                    name: key.to_string(),
                    message: format!("{:#}", e),
                })
            }
        }
    }

    /// Unload a model, releasing accelerator memory it held
    pub async fn unload(&self, name: &str) -> UnloadOutcome {
        let key = to_canonical_name(name);
        let lock = self.name_lock(&key);
        let guard = lock.lock().await;

        let removed = self.take_resident(&key).await;

        drop(guard);
        self.release_name_lock(&key);

        match removed {
            Some(entry) => {
                self.retire(&key, entry);
                UnloadOutcome::Unloaded
            }
            None => {
                tracing::warn!(model = %key, "Unload requested for a model that is not loaded");
                UnloadOutcome::NotLoaded
            }
        }
    }

    /// Remove an artifact from the cache, unloading it first when resident
    ///
    /// The name lock is held from the unload through the filesystem delete,
    /// so a concurrent load of the same name either completes before and is
    /// unloaded here, or runs after and finds nothing to load. Returns
    /// `Ok(false)` when the name does not resolve to a cached artifact.
    pub async fn delete_from_cache(&self, name: &str) -> GatewayResult<bool> {
        let key = to_canonical_name(name);
        let lock = self.name_lock(&key);
        let guard = lock.lock().await;

        if let Some(entry) = self.take_resident(&key).await {
            self.retire(&key, entry);
        }

        let scanner = self.scanner.clone();
        let requested = name.to_string();
        let deleted = tokio::task::spawn_blocking(move || scanner.delete(&requested)).await;

        drop(guard);
        self.release_name_lock(&key);

        let deleted = deleted??;
        if deleted {
            metrics::record_cache_deletion();
        }
        Ok(deleted)
    }

    /// Remove the resident entry for `key`. Caller holds the name lock.
    async fn take_resident(&self, key: &str) -> Option<LoadedModel> {
        let mut resident = self.resident.write().await;
        let removed = resident.remove(key);
        metrics::update_resident_models(resident.len());
        removed
    }

    /// Drop a removed entry and give accelerator memory back to the runtime
    ///
    /// Requests already running on the model keep their own handle, so the
    /// cache is only released when the entry held the last reference.
    fn retire(&self, key: &str, entry: LoadedModel) {
        let device = entry.device();
        let in_flight = entry.in_flight();
        drop(entry);

        if device.is_accelerator() {
            if in_flight == 0 {
                self.runtime.release_accelerator_cache(device);
                tracing::debug!(model = %key, %device, "Released accelerator cache");
            } else {
                tracing::debug!(
                    model = %key,
                    %device,
                    in_flight,
                    "Model still in use, leaving accelerator cache in place"
                );
            }
        }

        metrics::record_model_unload(key);
        tracing::info!(model = %key, %device, "Model unloaded");
    }

    /// Snapshot of a resident entry; never triggers a load
    pub async fn get(&self, name: &str) -> Option<LoadedModelInfo> {
        let key = to_canonical_name(name);
        self.resident.read().await.get(&key).map(|m| m.info(&key))
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        let key = to_canonical_name(name);
        self.resident.read().await.contains_key(&key)
    }

    pub async fn list_loaded(&self) -> BTreeMap<String, ModelKind> {
        self.resident
            .read()
            .await
            .iter()
            .map(|(name, model)| (name.clone(), model.kind()))
            .collect()
    }

    /// Details of every resident entry, sorted by name
    pub async fn loaded_details(&self) -> Vec<LoadedModelInfo> {
        let resident = self.resident.read().await;
        let mut details: Vec<_> = resident.iter().map(|(name, m)| m.info(name)).collect();
        details.sort_by(|a, b| a.name.cmp(&b.name));
        details
    }

    pub async fn stats(&self) -> ManagerStats {
        let models = self.list_loaded().await;
        let embedding_models = models.values().filter(|k| **k == ModelKind::Embedding).count();
        ManagerStats {
            total_loaded: models.len(),
            embedding_models,
            generative_models: models.len() - embedding_models,
            models,
        }
    }

    /// Embed texts with a resident embedding model
    pub async fn embed(&self, name: &str, inputs: Vec<String>) -> GatewayResult<Vec<Vec<f32>>> {
        let key = to_canonical_name(name);
        let handle = {
            let resident = self.resident.read().await;
            match resident.get(&key) {
                Some(LoadedModel::Embedding(e)) => e.handle.clone(),
                Some(other) => {
                    return Err(GatewayError::KindMismatch {
                        name: key,
                        expected: ModelKind::Embedding.to_string(),
                        actual: other.kind().to_string(),
                    });
                }
                None => return Err(GatewayError::NotLoaded { name: key }),
            }
        };

        let count = inputs.len();
        let vectors = tokio::task::spawn_blocking(move || handle.embed(&inputs))
            .await?
            .map_err(|e| {
                GatewayError::internal(format!("embedding with '{}' failed: {:#}", key, e))
            })?;

        metrics::record_embedding_inputs(&key, count);
        Ok(vectors)
    }

    /// Generate a reply with a resident generative model
    pub async fn generate(
        &self,
        name: &str,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> GatewayResult<Generation> {
        let key = to_canonical_name(name);
        let handle = {
            let resident = self.resident.read().await;
            match resident.get(&key) {
                Some(LoadedModel::Generative(g)) => g.handle.clone(),
                Some(other) => {
                    return Err(GatewayError::KindMismatch {
                        name: key,
                        expected: ModelKind::Generative.to_string(),
                        actual: other.kind().to_string(),
                    });
                }
                None => return Err(GatewayError::NotLoaded { name: key }),
            }
        };

        let generation = tokio::task::spawn_blocking(move || handle.generate(&messages, &params))
            .await?
            .map_err(|e| {
                GatewayError::internal(format!("generation with '{}' failed: {:#}", key, e))
            })?;

        metrics::record_chat_request(&key);
        Ok(generation)
    }

    /// Unload every resident model
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.resident.read().await.keys().cloned().collect();
        if names.is_empty() {
            return;
        }

        tracing::info!(count = names.len(), "Unloading all models");
        for name in names {
            self.unload(&name).await;
        }
    }
}
