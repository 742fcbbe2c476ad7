//! Capacity planning and quantization
//!
//! - Footprint estimation from model names and cache contents
//! - Precision-level planning against live accelerator memory
//! - Conversion hook for producing quantized artifacts

pub mod convert;
pub mod estimate;
pub mod planner;

pub use convert::{CommandQuantizer, QuantizeOutcome, QuantizedArtifact, Quantizer};
pub use estimate::{EstimateSource, EstimatorChain, FootprintEstimate, FootprintEstimator};
pub use planner::{Analysis, CapacityPlanner, DEFAULT_TARGET_DEVICE, Plan, Recommendation};
