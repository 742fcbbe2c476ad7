//! OpenAI-compatible inference endpoints

use super::handlers::blocking;
use super::models::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, CompletionChoice, CompletionRequest,
    CompletionResponse, CompletionUsage, EmbeddingData, EmbeddingUsage, EmbeddingsRequest,
    EmbeddingsResponse, ModelList, ModelObject, SimilarityRequest, SimilarityResponse,
};
use super::routes::AppState;
use crate::error::{GatewayError, GatewayResult};
use crate::models::classify::ArtifactKind;
use crate::models::runtime::count_tokens;
use crate::models::{ChatMessage, GenerationParams, ModelKind};
use axum::{Json, extract::State};

/// Pick the model for a request: explicit name, configured default, then
/// the first cached artifact of the matching kind
async fn select_model(
    state: &AppState,
    requested: Option<String>,
    kind: ModelKind,
) -> GatewayResult<String> {
    if let Some(name) = requested.filter(|n| !n.trim().is_empty()) {
        return Ok(name);
    }

    let configured = match kind {
        ModelKind::Embedding => state.config.default_embedding_model.clone(),
        ModelKind::Generative => state.config.default_chat_model.clone(),
    };
    if let Some(name) = configured {
        return Ok(name);
    }

    let artifact_kind = match kind {
        ModelKind::Embedding => ArtifactKind::Embedding,
        ModelKind::Generative => ArtifactKind::Generative,
    };
    let scanner = state.scanner.clone();
    blocking(move || scanner.first_of_kind(artifact_kind))
        .await?
        .map(|artifact| artifact.name)
        .ok_or_else(|| {
            GatewayError::invalid(format!(
                "no {} model specified or available in the cache",
                kind
            ))
        })
}

/// Select a model and make sure it is resident
async fn ensure_loaded(
    state: &AppState,
    requested: Option<String>,
    kind: ModelKind,
) -> GatewayResult<String> {
    let name = select_model(state, requested, kind).await?;
    state.manager.load(&name, kind).await?;
    Ok(name)
}

async fn embed_all(
    state: &AppState,
    model: &str,
    texts: Vec<String>,
) -> GatewayResult<Vec<Vec<f32>>> {
    let probe = state.probe.clone();
    let batcher = state.batcher;
    let max_volume = blocking(move || batcher.max_volume(&probe.probe())).await?;

    let batches = state.batcher.partition(&texts, max_volume);
    tracing::debug!(
        model = %model,
        inputs = texts.len(),
        batches = batches.len(),
        "Embedding request"
    );

    let mut vectors = Vec::with_capacity(texts.len());
    for range in batches {
        vectors.extend(state.manager.embed(model, texts[range].to_vec()).await?);
    }
    Ok(vectors)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn generation_params(temperature: Option<f32>, max_tokens: Option<u32>) -> GenerationParams {
    let defaults = GenerationParams::default();
    GenerationParams {
        temperature: temperature.unwrap_or(defaults.temperature),
        max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
    }
}

/// POST /v1/embeddings
pub async fn embeddings(
    State(state): State<AppState>,
    Json(req): Json<EmbeddingsRequest>,
) -> GatewayResult<Json<EmbeddingsResponse>> {
    let texts = req.input.into_vec();
    if texts.is_empty() {
        return Err(GatewayError::invalid("input must contain at least one text"));
    }

    let model = ensure_loaded(&state, req.model, ModelKind::Embedding).await?;
    let prompt_tokens = texts.iter().map(|t| count_tokens(t)).sum::<u32>();
    let vectors = embed_all(&state, &model, texts).await?;

    let data = vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| EmbeddingData {
            object: "embedding".to_string(),
            embedding,
            index,
        })
        .collect();

    Ok(Json(EmbeddingsResponse {
        object: "list".to_string(),
        data,
        model,
        usage: EmbeddingUsage {
            prompt_tokens,
            total_tokens: prompt_tokens,
        },
    }))
}

/// POST /v1/embeddings/similarity - Cosine similarity of two texts
pub async fn similarity(
    State(state): State<AppState>,
    Json(req): Json<SimilarityRequest>,
) -> GatewayResult<Json<SimilarityResponse>> {
    let model = ensure_loaded(&state, req.model, ModelKind::Embedding).await?;
    let vectors = state
        .manager
        .embed(&model, vec![req.text1.clone(), req.text2.clone()])
        .await?;

    let [a, b] = vectors.as_slice() else {
        return Err(GatewayError::internal(format!(
            "expected 2 embeddings from '{}', got {}",
            model,
            vectors.len()
        )));
    };

    Ok(Json(SimilarityResponse {
        similarity: cosine_similarity(a, b),
        text1: req.text1,
        text2: req.text2,
        model,
    }))
}

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> GatewayResult<Json<ChatCompletionResponse>> {
    if req.messages.is_empty() {
        return Err(GatewayError::invalid("messages must not be empty"));
    }

    let model = ensure_loaded(&state, req.model, ModelKind::Generative).await?;
    let prompt_tokens = req.messages.iter().map(|m| count_tokens(&m.content)).sum::<u32>();
    let params = generation_params(req.temperature, req.max_tokens);

    let generation = state.manager.generate(&model, req.messages, params).await?;
    let created = chrono::Utc::now().timestamp();

    Ok(Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", created),
        object: "chat.completion".to_string(),
        created,
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: generation.text,
            },
            finish_reason: generation.finish_reason,
        }],
        usage: CompletionUsage {
            prompt_tokens,
            completion_tokens: generation.completion_tokens,
            total_tokens: prompt_tokens + generation.completion_tokens,
        },
    }))
}

/// POST /v1/completions - Single-prompt completion
pub async fn completions(
    State(state): State<AppState>,
    Json(req): Json<CompletionRequest>,
) -> GatewayResult<Json<CompletionResponse>> {
    let model = ensure_loaded(&state, req.model, ModelKind::Generative).await?;
    let prompt_tokens = count_tokens(&req.prompt);
    let params = generation_params(req.temperature, req.max_tokens);

    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: req.prompt,
    }];
    let generation = state.manager.generate(&model, messages, params).await?;
    let created = chrono::Utc::now().timestamp();

    Ok(Json(CompletionResponse {
        id: format!("cmpl-{}", created),
        object: "text_completion".to_string(),
        created,
        model,
        choices: vec![CompletionChoice {
            index: 0,
            text: generation.text,
            finish_reason: generation.finish_reason,
        }],
        usage: CompletionUsage {
            prompt_tokens,
            completion_tokens: generation.completion_tokens,
            total_tokens: prompt_tokens + generation.completion_tokens,
        },
    }))
}

/// GET /v1/models - Usable artifacts in the cache
pub async fn list_models(State(state): State<AppState>) -> GatewayResult<Json<ModelList>> {
    let scanner = state.scanner.clone();
    let artifacts = blocking(move || scanner.usable_models()).await?;
    let created = chrono::Utc::now().timestamp();

    let data = artifacts
        .into_iter()
        .map(|artifact| ModelObject {
            id: artifact.name,
            object: "model".to_string(),
            created,
            owned_by: "local".to_string(),
            kind: artifact.kind.to_string(),
        })
        .collect();

    Ok(Json(ModelList {
        object: "list".to_string(),
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_generation_params_defaults() {
        let params = generation_params(None, Some(32));
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 32);
    }
}
