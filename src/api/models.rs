//! API request and response models

use crate::gpu::AcceleratorStatus;
use crate::models::{ChatMessage, LoadedModelInfo, ManagerStats, ModelKind};
use crate::quantization::{EstimateSource, QuantizedArtifact, Recommendation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// GET / response
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub cache_path: PathBuf,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

// ============================================================================
// Model management
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub model_name: String,

    /// "embedding" or "generative"; defaults to embedding
    #[serde(default)]
    pub model_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelActionRequest {
    pub model_name: String,
}

/// Outcome of a load, unload or delete
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelActionResponse {
    /// "success" or "warning"
    pub status: String,
    pub message: String,
    pub model_name: String,
}

#[derive(Debug, Serialize)]
pub struct LoadedModelsResponse {
    pub loaded_models: BTreeMap<String, ModelKind>,
    pub stats: ManagerStats,
    pub details: Vec<LoadedModelInfo>,
}

// ============================================================================
// Quantization
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub model_name: String,

    /// Defaults to "cuda:0"
    #[serde(default)]
    pub target_device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub model_name: String,
    pub estimated_size_gb: f64,
    pub estimate_source: EstimateSource,
    pub can_load: bool,
    /// Absent when no accelerator could be planned against
    pub best_recommendation: Option<Recommendation>,
    pub alternative_recommendations: Vec<Recommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub suggestions: Vec<String>,
    pub gpu_info: AcceleratorStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchAnalyzeRequest {
    pub model_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    pub estimated_size_gb: f64,
    pub can_load: bool,
    pub best_recommendation: Option<Recommendation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchAnalysisResponse {
    pub total_models: usize,
    pub results: BTreeMap<String, AnalysisSummary>,
}

#[derive(Debug, Serialize)]
pub struct PopularModelsResponse {
    pub popular_models: BTreeMap<String, AnalysisSummary>,
    pub gpu_info: AcceleratorStatus,
}

#[derive(Debug, Serialize)]
pub struct GpuConstraints {
    pub free_vram_gb: f64,
    pub total_vram_gb: f64,
}

#[derive(Debug, Serialize)]
pub struct QuantizationOptionsResponse {
    pub model_name: String,
    pub estimated_size_gb: f64,
    pub quantization_options: Vec<Recommendation>,
    pub gpu_constraints: Option<GpuConstraints>,
}

#[derive(Debug, Deserialize)]
pub struct QuantizeQuery {
    #[serde(default = "default_quantization_level")]
    pub quantization_level: String,
}

fn default_quantization_level() -> String {
    "8bit".to_string()
}

#[derive(Debug, Serialize)]
pub struct QuantizeResponse {
    /// "already_exists" or "completed"
    pub status: &'static str,
    pub message: String,
    pub model_name: String,
    pub quantization_level: String,
    pub quantized_path: PathBuf,
    pub estimated_size_gb: f64,
}

#[derive(Debug, Serialize)]
pub struct QuantizedModelsResponse {
    pub quantized_models: Vec<QuantizedArtifact>,
    pub total_quantized: usize,
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

/// `input` may be one string or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Single(text) => vec![text],
            Self::Batch(texts) => texts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    pub input: EmbeddingInput,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub object: String,
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub object: String,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: EmbeddingUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimilarityRequest {
    pub text1: String,
    pub text2: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimilarityResponse {
    pub similarity: f32,
    pub text1: String,
    pub text2: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: CompletionUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: usize,
    pub text: String,
    pub finish_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: CompletionUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}
