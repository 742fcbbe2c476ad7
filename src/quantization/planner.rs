//! Capacity planning
//!
//! Given a full-precision footprint and a live accelerator snapshot, decides
//! which precision level fits. Planning itself is pure: everything it needs
//! is passed in, so synthetic snapshots exercise it fully.

use super::estimate::{EstimatorChain, FootprintEstimate};
use crate::gpu::{AcceleratorDevice, AcceleratorProbe, AcceleratorStatus};
use serde::Serialize;
use std::sync::Arc;

/// Memory overhead applied on top of the quantized weight size
pub const SAFETY_MARGIN: f64 = 1.2;

/// Upper bound on alternatives reported next to the best option
pub const MAX_ALTERNATIVES: usize = 3;

/// Device analysed when the caller does not name one
pub const DEFAULT_TARGET_DEVICE: &str = "cuda:0";

/// A precision level and its memory reduction relative to fp32
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionLevel {
    pub name: &'static str,
    pub bits: u32,
    pub reduction: f64,
    pub quality: &'static str,
}

pub const PRECISION_LEVELS: &[PrecisionLevel] = &[
    PrecisionLevel {
        name: "fp32",
        bits: 32,
        reduction: 1.0,
        quality: "original",
    },
    PrecisionLevel {
        name: "fp16",
        bits: 16,
        reduction: 0.5,
        quality: "excellent",
    },
    PrecisionLevel {
        name: "bf16",
        bits: 16,
        reduction: 0.5,
        quality: "excellent",
    },
    PrecisionLevel {
        name: "8bit",
        bits: 8,
        reduction: 0.25,
        quality: "very good",
    },
    PrecisionLevel {
        name: "4bit",
        bits: 4,
        reduction: 0.125,
        quality: "good",
    },
    PrecisionLevel {
        name: "q4",
        bits: 4,
        reduction: 0.125,
        quality: "good",
    },
];

pub fn precision_level(name: &str) -> Option<&'static PrecisionLevel> {
    PRECISION_LEVELS.iter().find(|l| l.name == name)
}

/// Feasibility of one precision level on one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub level: &'static str,
    pub bits: u32,
    pub reduction: f64,
    pub estimated_size_gb: f64,
    pub required_vram_gb: f64,
    pub can_fit: bool,
    pub vram_usage_percent: f64,
    pub quality: &'static str,
    /// Fits and uses 8 bits or fewer
    pub recommended: bool,
    pub forced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Plan against a concrete accelerator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceleratorPlan {
    pub footprint_gb: f64,
    pub target_gpu: AcceleratorDevice,
    pub free_vram_gb: f64,
    pub total_vram_gb: f64,
    /// Sorted fitting-first, then by ascending bit width
    pub recommendations: Vec<Recommendation>,
    pub best: Recommendation,
    pub can_load: bool,
}

impl AcceleratorPlan {
    /// Other fitting options, best first
    pub fn alternatives(&self) -> Vec<&Recommendation> {
        self.recommendations
            .iter()
            .filter(|r| r.can_fit && r.level != self.best.level)
            .take(MAX_ALTERNATIVES)
            .collect()
    }
}

/// Outcome of capacity planning
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Plan {
    /// No accelerator capacity check was possible
    Cpu { footprint_gb: f64, reason: String },
    Accelerator(AcceleratorPlan),
}

impl Plan {
    pub fn can_load(&self) -> bool {
        match self {
            Self::Cpu { .. } => false,
            Self::Accelerator(p) => p.can_load,
        }
    }

    pub fn footprint_gb(&self) -> f64 {
        match self {
            Self::Cpu { footprint_gb, .. } => *footprint_gb,
            Self::Accelerator(p) => p.footprint_gb,
        }
    }

    pub fn best(&self) -> Option<&Recommendation> {
        match self {
            Self::Cpu { .. } => None,
            Self::Accelerator(p) => Some(&p.best),
        }
    }

    pub fn recommendations(&self) -> &[Recommendation] {
        match self {
            Self::Cpu { .. } => &[],
            Self::Accelerator(p) => &p.recommendations,
        }
    }

    pub fn alternatives(&self) -> Vec<&Recommendation> {
        match self {
            Self::Cpu { .. } => Vec::new(),
            Self::Accelerator(p) => p.alternatives(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Evaluate one precision level against free and total memory (GB)
pub fn evaluate_level(
    level: &PrecisionLevel,
    footprint_gb: f64,
    free_gb: f64,
    total_gb: f64,
) -> Recommendation {
    let estimated = footprint_gb * level.reduction;
    let required = estimated * SAFETY_MARGIN;
    let can_fit = required <= free_gb;
    let usage = if total_gb > 0.0 {
        required / total_gb * 100.0
    } else {
        0.0
    };

    Recommendation {
        level: level.name,
        bits: level.bits,
        reduction: level.reduction,
        estimated_size_gb: round2(estimated),
        required_vram_gb: round2(required),
        can_fit,
        vram_usage_percent: round1(usage),
        quality: level.quality,
        recommended: can_fit && level.bits <= 8,
        forced: false,
        warning: None,
    }
}

/// Plan a footprint against one device
pub fn plan_for_device(footprint_gb: f64, device: &AcceleratorDevice) -> AcceleratorPlan {
    let free = device.free_gb;
    let total = device.total_gb;

    let mut recommendations: Vec<Recommendation> = PRECISION_LEVELS
        .iter()
        .map(|level| evaluate_level(level, footprint_gb, free, total))
        .collect();
    recommendations.sort_by_key(|r| (!r.can_fit, r.bits));

    let best_index = match recommendations.iter().position(|r| r.can_fit) {
        Some(index) => index,
        None => {
            // Nothing fits: fall back to the most aggressive level
            let index = recommendations
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| r.bits)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let fallback = &mut recommendations[index];
            fallback.forced = true;
            fallback.warning = Some(format!(
                "model does not fit even when quantized: requires {} GB, only {} GB available",
                fallback.required_vram_gb,
                round2(free)
            ));
            index
        }
    };

    let best = recommendations[best_index].clone();
    let can_load = best.can_fit && !best.forced;

    AcceleratorPlan {
        footprint_gb,
        target_gpu: device.clone(),
        free_vram_gb: round2(free),
        total_vram_gb: round2(total),
        recommendations,
        best,
        can_load,
    }
}

/// Plan a footprint against the live accelerator state
///
/// Without an accelerator, or when `target_device` is not present, the
/// result is a CPU plan that cannot be loaded onto an accelerator.
pub fn plan(footprint_gb: f64, status: &AcceleratorStatus, target_device: &str) -> Plan {
    let snapshot = match status {
        AcceleratorStatus::Available(snapshot) => snapshot,
        AcceleratorStatus::Unavailable { reason } => {
            return Plan::Cpu {
                footprint_gb,
                reason: format!("GPU not available: {}", reason),
            };
        }
    };

    match snapshot.device(target_device) {
        Some(device) => Plan::Accelerator(plan_for_device(footprint_gb, device)),
        None => Plan::Cpu {
            footprint_gb,
            reason: format!("Target GPU not found: {}", target_device),
        },
    }
}

/// Human-readable summary of a plan
pub fn suggestions(plan: &Plan) -> Vec<String> {
    let mut lines = vec![format!("Model size: {} GB", round2(plan.footprint_gb()))];

    let accel = match plan {
        Plan::Cpu { reason, .. } => {
            lines.push(format!("No accelerator capacity check possible ({})", reason));
            lines.push("Model can only run on CPU".to_string());
            return lines;
        }
        Plan::Accelerator(p) => p,
    };

    lines.push(format!("Available VRAM: {} GB", accel.free_vram_gb));
    let best = &accel.best;
    if accel.can_load {
        lines.push(format!("Recommended: {} ({}-bit)", best.level, best.bits));
        lines.push(format!("Quality: {}", best.quality));
        lines.push(format!("VRAM usage: ~{} GB", best.estimated_size_gb));
    } else {
        lines.push("Model does not fit in available memory".to_string());
        lines.push(format!("Could try: {} ({}-bit)", best.level, best.bits));
        lines.push(format!("Would require: ~{} GB", best.required_vram_gb));
        lines.push("Expect degraded performance".to_string());
    }

    let alternatives = accel.alternatives();
    if !alternatives.is_empty() {
        lines.push("Alternatives:".to_string());
        for alt in alternatives.iter().take(2) {
            lines.push(format!(
                "  {} ({}-bit) - {} GB",
                alt.level, alt.bits, alt.estimated_size_gb
            ));
        }
    }

    lines
}

/// Full analysis of one model name
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub model_name: String,
    pub estimate: FootprintEstimate,
    pub plan: Plan,
    pub suggestions: Vec<String>,
}

/// Combines footprint estimation with live accelerator telemetry
pub struct CapacityPlanner {
    estimator: EstimatorChain,
    probe: Arc<dyn AcceleratorProbe>,
}

impl CapacityPlanner {
    pub fn new(estimator: EstimatorChain, probe: Arc<dyn AcceleratorProbe>) -> Self {
        Self { estimator, probe }
    }

    pub fn estimate_footprint(&self, model_name: &str) -> FootprintEstimate {
        self.estimator.estimate_footprint(model_name)
    }

    pub fn probe_accelerator(&self) -> AcceleratorStatus {
        self.probe.probe()
    }

    /// Estimate, probe and plan; probes the accelerator once
    pub fn analyze(&self, model_name: &str, target_device: &str) -> Analysis {
        self.analyze_with(model_name, target_device, &self.probe_accelerator())
    }

    /// Analyse against an already taken snapshot
    pub fn analyze_with(
        &self,
        model_name: &str,
        target_device: &str,
        status: &AcceleratorStatus,
    ) -> Analysis {
        let estimate = self.estimate_footprint(model_name);
        let plan = plan(estimate.size_gb, status, target_device);
        tracing::debug!(
            model = %model_name,
            footprint_gb = estimate.size_gb,
            source = ?estimate.source,
            can_load = plan.can_load(),
            best = ?plan.best().map(|b| b.level),
            "Capacity plan computed"
        );
        Analysis {
            model_name: model_name.to_string(),
            suggestions: suggestions(&plan),
            estimate,
            plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{AcceleratorSnapshot, FixedProbe};
    use crate::quantization::estimate::{EstimateSource, KnownFamilyTable};

    fn gpu(total: f64, free: f64) -> AcceleratorDevice {
        AcceleratorDevice::new(0, "Test GPU", total, total - free, free)
    }

    #[test]
    fn test_14gb_on_8gb_prefers_4bit() {
        let plan = plan_for_device(14.0, &gpu(8.0, 8.0));

        assert!(plan.can_load);
        assert_eq!(plan.best.level, "4bit");
        assert!(plan.best.can_fit);
        assert!(!plan.best.forced);
        assert_eq!(plan.best.required_vram_gb, 2.1);
        assert!(plan.best.recommended);
    }

    #[test]
    fn test_fallback_when_nothing_fits() {
        let plan = plan_for_device(100.0, &gpu(8.0, 4.0));

        assert!(!plan.can_load);
        assert!(plan.best.forced);
        assert_eq!(plan.best.bits, 4);
        assert!(plan.best.required_vram_gb > 4.0);
        let warning = plan.best.warning.as_deref().unwrap();
        assert!(warning.contains("15 GB"));
        assert!(warning.contains("4 GB"));
        assert!(plan.alternatives().is_empty());
        assert_eq!(plan.recommendations.iter().filter(|r| r.forced).count(), 1);
    }

    #[test]
    fn test_sort_order() {
        let plan = plan_for_device(14.0, &gpu(24.0, 20.0));
        let levels: Vec<_> = plan.recommendations.iter().map(|r| r.level).collect();
        // fp32 needs 16.8 GB and fits; ordering is by bits among fitting
        assert_eq!(levels, vec!["4bit", "q4", "8bit", "fp16", "bf16", "fp32"]);
    }

    #[test]
    fn test_unfitting_levels_sort_last() {
        let plan = plan_for_device(14.0, &gpu(8.0, 8.0));
        let fits: Vec<_> = plan.recommendations.iter().map(|r| r.can_fit).collect();
        assert_eq!(fits, vec![true, true, true, false, false, false]);
        assert_eq!(plan.recommendations.last().unwrap().level, "fp32");
    }

    #[test]
    fn test_alternatives_bounded() {
        let plan = plan_for_device(1.0, &gpu(80.0, 80.0));
        let alternatives = plan.alternatives();
        assert_eq!(alternatives.len(), MAX_ALTERNATIVES);
        assert!(alternatives.iter().all(|a| a.level != plan.best.level));
    }

    #[test]
    fn test_no_accelerator_is_cpu_plan() {
        let status = AcceleratorStatus::unavailable("CUDA not available");
        let plan = plan(14.0, &status, DEFAULT_TARGET_DEVICE);

        assert!(!plan.can_load());
        assert!(plan.best().is_none());
        assert!(matches!(&plan, Plan::Cpu { reason, .. } if reason.contains("GPU not available")));
    }

    #[test]
    fn test_unknown_target_device() {
        let status = AcceleratorStatus::Available(AcceleratorSnapshot {
            devices: vec![gpu(8.0, 8.0)],
        });
        let plan = plan(1.0, &status, "cuda:3");
        let Plan::Cpu { reason, .. } = &plan else {
            panic!("expected a CPU plan");
        };
        assert!(reason.contains("Target GPU not found"));
    }

    #[test]
    fn test_suggestions_mention_best_level() {
        let plan = Plan::Accelerator(plan_for_device(14.0, &gpu(8.0, 8.0)));
        let lines = suggestions(&plan);
        assert_eq!(lines[0], "Model size: 14 GB");
        assert!(lines.iter().any(|l| l == "Recommended: 4bit (4-bit)"));
    }

    #[test]
    fn test_planner_analyze() {
        let planner = CapacityPlanner::new(
            EstimatorChain::new(vec![Box::new(KnownFamilyTable::default())]),
            Arc::new(FixedProbe::single_gpu(8.0, 8.0)),
        );

        let analysis = planner.analyze("mistral-7b-instruct", DEFAULT_TARGET_DEVICE);
        assert_eq!(analysis.estimate.size_gb, 14.0);
        assert_eq!(analysis.estimate.source, EstimateSource::KnownFamily);
        assert_eq!(analysis.plan.best().unwrap().level, "4bit");
        assert!(!analysis.suggestions.is_empty());
    }
}
