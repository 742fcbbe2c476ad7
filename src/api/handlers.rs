//! API request handlers

use super::models::{
    AnalysisResponse, AnalysisSummary, AnalyzeRequest, BatchAnalysisResponse, BatchAnalyzeRequest,
    GpuConstraints, HealthResponse, LoadModelRequest, LoadedModelsResponse, ModelActionRequest,
    ModelActionResponse, PopularModelsResponse, QuantizationOptionsResponse, QuantizeQuery,
    QuantizeResponse, QuantizedModelsResponse, ServiceInfo,
};
use super::routes::AppState;
use crate::error::{GatewayError, GatewayResult};
use crate::gpu::AcceleratorStatus;
use crate::models::{LoadOutcome, ModelKind, ScanReport, UnloadOutcome};
use crate::quantization::convert::{self, QuantizeOutcome};
use crate::quantization::{Analysis, DEFAULT_TARGET_DEVICE, Plan};
use crate::resources::{self, ResourceSnapshot};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::collections::BTreeMap;

/// Models analysed by the popular-models endpoint
const POPULAR_MODELS: &[&str] = &[
    "Qwen/Qwen2.5-7B-Instruct",
    "microsoft/DialoGPT-medium",
    "sentence-transformers/all-MiniLM-L6-v2",
    "sentence-transformers/all-mpnet-base-v2",
    "intfloat/multilingual-e5-large-instruct",
    "mistralai/Mistral-7B-Instruct-v0.2",
    "google/flan-t5-large",
];

/// Run filesystem or probe work off the async runtime
pub(crate) async fn blocking<F, T>(f: F) -> GatewayResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

/// GET / - Service information
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    let endpoints = BTreeMap::from([
        ("embeddings", "/v1/embeddings"),
        ("chat", "/v1/chat/completions"),
        ("completions", "/v1/completions"),
        ("models", "/v1/models"),
        ("discovery", "/models/discovery"),
        ("resources", "/models/resources"),
        ("quantization", "/quantization/analyze"),
        ("health", "/health"),
        ("metrics", "/metrics"),
    ]);

    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        cache_path: state.config.cache_dir.clone(),
        endpoints,
    })
}

/// GET /health - Gateway health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /models/discovery - Scan the local cache
pub async fn discover_models(State(state): State<AppState>) -> GatewayResult<Json<ScanReport>> {
    let scanner = state.scanner.clone();
    let report = blocking(move || scanner.scan()).await?;
    Ok(Json(report))
}

/// GET /models/resources - Host and accelerator snapshot
pub async fn system_resources(
    State(state): State<AppState>,
) -> GatewayResult<Json<ResourceSnapshot>> {
    let probe = state.probe.clone();
    let snapshot = blocking(move || resources::probe_resources(probe.as_ref())).await?;
    Ok(Json(snapshot))
}

/// POST /models/load - Load a cached model into memory
pub async fn load_model(
    State(state): State<AppState>,
    Json(req): Json<LoadModelRequest>,
) -> GatewayResult<Json<ModelActionResponse>> {
    let kind: ModelKind = req.model_type.as_deref().unwrap_or("embedding").parse()?;

    let message = match state.manager.load(&req.model_name, kind).await? {
        LoadOutcome::Loaded => format!("Model {} loaded into memory", req.model_name),
        LoadOutcome::AlreadyLoaded => format!("Model {} is already loaded", req.model_name),
    };

    Ok(Json(ModelActionResponse {
        status: "success".to_string(),
        message,
        model_name: req.model_name,
    }))
}

/// POST /models/unload - Release a resident model
pub async fn unload_model(
    State(state): State<AppState>,
    Json(req): Json<ModelActionRequest>,
) -> Json<ModelActionResponse> {
    let (status, message) = match state.manager.unload(&req.model_name).await {
        UnloadOutcome::Unloaded => (
            "success",
            format!("Model {} unloaded from memory", req.model_name),
        ),
        UnloadOutcome::NotLoaded => (
            "warning",
            format!("Model {} was not loaded or is already unloaded", req.model_name),
        ),
    };

    Json(ModelActionResponse {
        status: status.to_string(),
        message,
        model_name: req.model_name,
    })
}

/// GET /models/loaded - Resident models and stats
pub async fn loaded_models(State(state): State<AppState>) -> Json<LoadedModelsResponse> {
    let stats = state.manager.stats().await;
    Json(LoadedModelsResponse {
        loaded_models: stats.models.clone(),
        details: state.manager.loaded_details().await,
        stats,
    })
}

/// DELETE /cache/{model_name} - Remove an artifact from the cache
pub async fn delete_from_cache(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
) -> GatewayResult<Json<ModelActionResponse>> {
    tracing::warn!(model = %model_name, "Cache deletion requested");

    if !state.manager.delete_from_cache(&model_name).await? {
        return Err(GatewayError::NotFoundInCache { name: model_name });
    }

    Ok(Json(ModelActionResponse {
        status: "success".to_string(),
        message: format!("Model {} deleted from cache", model_name),
        model_name,
    }))
}

fn analysis_response(analysis: Analysis, gpu_info: AcceleratorStatus) -> AnalysisResponse {
    let reason = match &analysis.plan {
        Plan::Cpu { reason, .. } => Some(reason.clone()),
        Plan::Accelerator(_) => None,
    };
    AnalysisResponse {
        estimated_size_gb: analysis.estimate.size_gb,
        estimate_source: analysis.estimate.source,
        can_load: analysis.plan.can_load(),
        best_recommendation: analysis.plan.best().cloned(),
        alternative_recommendations: analysis.plan.alternatives().into_iter().cloned().collect(),
        reason,
        suggestions: analysis.suggestions,
        model_name: analysis.model_name,
        gpu_info,
    }
}

fn analysis_summary(analysis: Analysis, max_suggestions: usize) -> AnalysisSummary {
    AnalysisSummary {
        estimated_size_gb: analysis.estimate.size_gb,
        can_load: analysis.plan.can_load(),
        best_recommendation: analysis.plan.best().cloned(),
        suggestions: analysis.suggestions.into_iter().take(max_suggestions).collect(),
    }
}

/// POST /quantization/analyze - Capacity plan for one model
pub async fn analyze_quantization(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> GatewayResult<Json<AnalysisResponse>> {
    tracing::info!(model = %req.model_name, "Quantization analysis requested");

    let planner = state.planner.clone();
    let target = req
        .target_device
        .unwrap_or_else(|| DEFAULT_TARGET_DEVICE.to_string());
    let (analysis, status) = blocking(move || {
        let status = planner.probe_accelerator();
        (planner.analyze_with(&req.model_name, &target, &status), status)
    })
    .await?;

    Ok(Json(analysis_response(analysis, status)))
}

/// POST /quantization/analyze-batch - Capacity plans for several models
pub async fn analyze_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchAnalyzeRequest>,
) -> GatewayResult<Json<BatchAnalysisResponse>> {
    tracing::info!(count = req.model_names.len(), "Batch quantization analysis requested");

    let planner = state.planner.clone();
    let names = req.model_names;
    let analyses = blocking(move || {
        let status = planner.probe_accelerator();
        names
            .iter()
            .map(|name| planner.analyze_with(name, DEFAULT_TARGET_DEVICE, &status))
            .collect::<Vec<_>>()
    })
    .await?;

    let total_models = analyses.len();
    let results = analyses
        .into_iter()
        .map(|a| (a.model_name.clone(), analysis_summary(a, 3)))
        .collect();

    Ok(Json(BatchAnalysisResponse {
        total_models,
        results,
    }))
}

/// GET /quantization/gpu-info - Live accelerator memory
pub async fn gpu_info(State(state): State<AppState>) -> GatewayResult<Json<AcceleratorStatus>> {
    let probe = state.probe.clone();
    Ok(Json(blocking(move || probe.probe()).await?))
}

/// GET /quantization/recommendations/popular-models
pub async fn popular_models(
    State(state): State<AppState>,
) -> GatewayResult<Json<PopularModelsResponse>> {
    let planner = state.planner.clone();
    let (analyses, status) = blocking(move || {
        let status = planner.probe_accelerator();
        let analyses: Vec<_> = POPULAR_MODELS
            .iter()
            .map(|name| planner.analyze_with(name, DEFAULT_TARGET_DEVICE, &status))
            .collect();
        (analyses, status)
    })
    .await?;

    Ok(Json(PopularModelsResponse {
        popular_models: analyses
            .into_iter()
            .map(|a| (a.model_name.clone(), analysis_summary(a, 0)))
            .collect(),
        gpu_info: status,
    }))
}

/// GET /quantization/model/{model_name}/options - Every precision level
pub async fn quantization_options(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
) -> GatewayResult<Json<QuantizationOptionsResponse>> {
    let planner = state.planner.clone();
    let name = model_name.clone();
    let analysis = blocking(move || planner.analyze(&name, DEFAULT_TARGET_DEVICE)).await?;

    let gpu_constraints = match &analysis.plan {
        Plan::Accelerator(p) => Some(GpuConstraints {
            free_vram_gb: p.free_vram_gb,
            total_vram_gb: p.total_vram_gb,
        }),
        Plan::Cpu { .. } => None,
    };

    Ok(Json(QuantizationOptionsResponse {
        model_name,
        estimated_size_gb: analysis.estimate.size_gb,
        quantization_options: analysis.plan.recommendations().to_vec(),
        gpu_constraints,
    }))
}

/// POST /quantization/model/{model_name}/quantize - Trigger conversion
pub async fn quantize_model(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
    Query(query): Query<QuantizeQuery>,
) -> GatewayResult<Json<QuantizeResponse>> {
    let level = query.quantization_level;
    tracing::info!(model = %model_name, level = %level, "Quantization requested");

    let quantizer = state.quantizer.as_deref();
    let outcome =
        convert::request_quantization(&state.scanner, quantizer, &model_name, &level).await?;

    let (status, message, quantized_path) = match outcome {
        QuantizeOutcome::AlreadyExists { quantized_path } => (
            "already_exists",
            format!("Quantized version of {} ({}) already exists", model_name, level),
            quantized_path,
        ),
        QuantizeOutcome::Completed { quantized_path } => (
            "completed",
            format!("Model {} quantized to {}", model_name, level),
            quantized_path,
        ),
    };

    let planner = state.planner.clone();
    let name = model_name.clone();
    let estimate = blocking(move || planner.estimate_footprint(&name)).await?;

    Ok(Json(QuantizeResponse {
        status,
        message,
        estimated_size_gb: estimate.size_gb,
        model_name,
        quantization_level: level,
        quantized_path,
    }))
}

/// GET /quantization/quantized-models - Converted artifacts on disk
pub async fn quantized_models(
    State(state): State<AppState>,
) -> GatewayResult<Json<QuantizedModelsResponse>> {
    let scanner = state.scanner.clone();
    let quantized_models = blocking(move || convert::list_quantized(&scanner)).await?;

    Ok(Json(QuantizedModelsResponse {
        total_quantized: quantized_models.len(),
        quantized_models,
    }))
}
