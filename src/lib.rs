//! Model Gateway - Local model-serving gateway
//!
//! Serves embedding and generative models straight from a local model cache.
//! Models are never fetched from the network: a name that does not resolve
//! inside the cache is refused. Also plans precision levels against live
//! accelerator memory.

pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod models;
pub mod quantization;
pub mod resources;

pub use config::{BatchConfig, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use gpu::{AcceleratorProbe, AcceleratorStatus, FixedProbe, NvidiaSmiProbe};
pub use models::{CacheScanner, ModelKind, ModelManager, ModelRuntime, ReferenceRuntime};
pub use quantization::CapacityPlanner;
