//! API route definitions

use crate::batch::VolumeBatcher;
use crate::config::GatewayConfig;
use crate::gpu::AcceleratorProbe;
use crate::models::{CacheScanner, ModelManager, ModelRuntime};
use crate::quantization::{CapacityPlanner, CommandQuantizer, EstimatorChain, Quantizer};
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, openai};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub scanner: Arc<CacheScanner>,
    pub manager: Arc<ModelManager>,
    pub planner: Arc<CapacityPlanner>,
    pub probe: Arc<dyn AcceleratorProbe>,
    pub quantizer: Option<Arc<dyn Quantizer>>,
    pub batcher: VolumeBatcher,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl AppState {
    /// Wire the scanner, manager and planner over one cache root
    pub fn new(
        config: GatewayConfig,
        runtime: Arc<dyn ModelRuntime>,
        probe: Arc<dyn AcceleratorProbe>,
        prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
    ) -> Self {
        let scanner = Arc::new(CacheScanner::new(config.cache_dir.clone()));
        let manager = Arc::new(ModelManager::new(scanner.clone(), runtime, probe.clone()));
        let planner = Arc::new(CapacityPlanner::new(
            EstimatorChain::standard(scanner.clone()),
            probe.clone(),
        ));
        let quantizer = config
            .quantize_command
            .as_deref()
            .and_then(CommandQuantizer::from_command_line)
            .map(|q| Arc::new(q) as Arc<dyn Quantizer>);

        Self {
            batcher: VolumeBatcher::new(&config.batch),
            config: Arc::new(config),
            scanner,
            manager,
            planner,
            probe,
            quantizer,
            prometheus_handle,
        }
    }

    /// Replace the conversion hook
    pub fn with_quantizer(mut self, quantizer: Arc<dyn Quantizer>) -> Self {
        self.quantizer = Some(quantizer);
        self
    }
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Model management
        .route("/models/discovery", get(handlers::discover_models))
        .route("/models/resources", get(handlers::system_resources))
        .route("/models/load", post(handlers::load_model))
        .route("/models/unload", post(handlers::unload_model))
        .route("/models/loaded", get(handlers::loaded_models))
        .route("/cache/{model_name}", delete(handlers::delete_from_cache))
        // Capacity planning and quantization
        .route("/quantization/analyze", post(handlers::analyze_quantization))
        .route("/quantization/analyze-batch", post(handlers::analyze_batch))
        .route("/quantization/gpu-info", get(handlers::gpu_info))
        .route(
            "/quantization/recommendations/popular-models",
            get(handlers::popular_models),
        )
        .route(
            "/quantization/model/{model_name}/options",
            get(handlers::quantization_options),
        )
        .route(
            "/quantization/model/{model_name}/quantize",
            post(handlers::quantize_model),
        )
        .route("/quantization/quantized-models", get(handlers::quantized_models))
        // OpenAI-compatible
        .route("/v1/models", get(openai::list_models))
        .route("/v1/embeddings", post(openai::embeddings))
        .route("/v1/embeddings/similarity", post(openai::similarity))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/completions", post(openai::completions))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
