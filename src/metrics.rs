//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a load attempt; outcome is one of "loaded", "already_loaded",
/// "not_found", "failed"
pub fn record_model_load(model: &str, outcome: &'static str) {
    metrics::counter!("model_gateway_model_loads_total",
        "model" => model.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_model_unload(model: &str) {
    metrics::counter!("model_gateway_model_unloads_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record embedded inputs
pub fn record_embedding_inputs(model: &str, count: usize) {
    metrics::counter!("model_gateway_embedding_inputs_total",
        "model" => model.to_string()
    )
    .increment(count as u64);
}

pub fn record_chat_request(model: &str) {
    metrics::counter!("model_gateway_chat_requests_total",
        "model" => model.to_string()
    )
    .increment(1);
}

pub fn record_cache_deletion() {
    metrics::counter!("model_gateway_cache_deletions_total").increment(1);
}

/// Update resident model gauge
pub fn update_resident_models(count: usize) {
    metrics::gauge!("model_gateway_resident_models").set(count as f64);
}
