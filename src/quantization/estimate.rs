//! Model footprint estimation
//!
//! Estimates are heuristics: full-precision memory in GB, inferred from the
//! model name or its size on disk. Callers treat them as advisory.

use crate::models::CacheScanner;
use serde::Serialize;
use std::sync::Arc;

/// Estimate used when no estimator matches
pub const DEFAULT_FOOTPRINT_GB: f64 = 2.0;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Known model families and their approximate full-precision footprint (GB).
/// Matched as case-insensitive substrings, in order.
pub const KNOWN_FAMILIES: &[(&str, f64)] = &[
    ("Qwen2.5-7B", 14.5),
    ("Qwen2.5-14B", 28.0),
    ("Qwen2-7B", 14.0),
    ("Qwen2-1.5B", 3.0),
    ("Llama-3-8B", 16.0),
    ("Llama-3-70B", 140.0),
    ("mistral-7b", 14.0),
    ("mixtral-8x7b", 45.0),
    ("all-MiniLM-L6-v2", 0.09),
    ("all-mpnet-base-v2", 0.42),
    ("paraphrase-multilingual-mpnet-base-v2", 2.1),
    ("multilingual-e5-large", 2.2),
];

/// Parameter counts with fixed estimates; other counts use 2 GB per billion
const PARAMETER_TABLE: &[(f64, f64)] = &[(7.0, 14.0), (13.0, 26.0), (70.0, 140.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    KnownFamily,
    ParameterCount,
    OnDiskSize,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FootprintEstimate {
    pub size_gb: f64,
    pub source: EstimateSource,
}

/// One way of estimating a footprint; `None` passes to the next estimator
pub trait FootprintEstimator: Send + Sync {
    fn estimate(&self, model_name: &str) -> Option<FootprintEstimate>;
}

/// Lookup in a table of known families
#[derive(Debug, Clone)]
pub struct KnownFamilyTable {
    entries: Vec<(String, f64)>,
}

impl KnownFamilyTable {
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(pattern, size)| (pattern.to_lowercase(), size))
                .collect(),
        }
    }
}

impl Default for KnownFamilyTable {
    fn default() -> Self {
        Self::new(KNOWN_FAMILIES.iter().map(|(p, s)| (p.to_string(), *s)))
    }
}

impl FootprintEstimator for KnownFamilyTable {
    fn estimate(&self, model_name: &str) -> Option<FootprintEstimate> {
        let name = model_name.to_lowercase();
        self.entries
            .iter()
            .find(|(pattern, _)| name.contains(pattern.as_str()))
            .map(|(_, size_gb)| FootprintEstimate {
                size_gb: *size_gb,
                source: EstimateSource::KnownFamily,
            })
    }
}

/// Parses a `<n>b` parameter-count token such as "7b" or "1.5B"
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterCountHeuristic;

impl ParameterCountHeuristic {
    /// Billions of parameters named by a standalone token, if any
    pub fn parameter_count(model_name: &str) -> Option<f64> {
        model_name
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
            .filter_map(|token| token.strip_suffix('b'))
            .filter(|digits| {
                !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
            })
            .filter_map(|digits| digits.parse::<f64>().ok())
            .find(|count| *count > 0.0)
    }
}

impl FootprintEstimator for ParameterCountHeuristic {
    fn estimate(&self, model_name: &str) -> Option<FootprintEstimate> {
        let count = Self::parameter_count(model_name)?;
        let size_gb = PARAMETER_TABLE
            .iter()
            .find(|(params, _)| *params == count)
            .map(|(_, size)| *size)
            .unwrap_or(count * 2.0);
        Some(FootprintEstimate {
            size_gb,
            source: EstimateSource::ParameterCount,
        })
    }
}

/// Size of the artifact on disk, when the name resolves in the cache
#[derive(Debug, Clone)]
pub struct OnDiskSize {
    scanner: Arc<CacheScanner>,
}

impl OnDiskSize {
    pub fn new(scanner: Arc<CacheScanner>) -> Self {
        Self { scanner }
    }
}

impl FootprintEstimator for OnDiskSize {
    fn estimate(&self, model_name: &str) -> Option<FootprintEstimate> {
        let path = self.scanner.resolve_path(model_name)?;
        let bytes = match std::fs::metadata(path.as_path()) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => self.scanner.directory_size(path.as_path()),
        };
        (bytes > 0).then(|| FootprintEstimate {
            size_gb: bytes as f64 / BYTES_PER_GIB,
            source: EstimateSource::OnDiskSize,
        })
    }
}

/// Ordered estimators with a flat default
pub struct EstimatorChain {
    estimators: Vec<Box<dyn FootprintEstimator>>,
    default_gb: f64,
}

impl EstimatorChain {
    pub fn new(estimators: Vec<Box<dyn FootprintEstimator>>) -> Self {
        Self {
            estimators,
            default_gb: DEFAULT_FOOTPRINT_GB,
        }
    }

    /// Known families, then parameter count, then on-disk size
    pub fn standard(scanner: Arc<CacheScanner>) -> Self {
        Self::new(vec![
            Box::new(KnownFamilyTable::default()),
            Box::new(ParameterCountHeuristic),
            Box::new(OnDiskSize::new(scanner)),
        ])
    }

    pub fn estimate_footprint(&self, model_name: &str) -> FootprintEstimate {
        self.estimators
            .iter()
            .find_map(|e| e.estimate(model_name))
            .unwrap_or(FootprintEstimate {
                size_gb: self.default_gb,
                source: EstimateSource::Default,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chain_without_disk() -> EstimatorChain {
        EstimatorChain::new(vec![
            Box::new(KnownFamilyTable::default()),
            Box::new(ParameterCountHeuristic),
        ])
    }

    #[test]
    fn test_known_family_is_case_insensitive() {
        let estimate = chain_without_disk().estimate_footprint("Qwen/qwen2.5-7b-instruct");
        assert_eq!(estimate.size_gb, 14.5);
        assert_eq!(estimate.source, EstimateSource::KnownFamily);

        let estimate = chain_without_disk()
            .estimate_footprint("models--intfloat--multilingual-e5-large-instruct");
        assert_eq!(estimate.size_gb, 2.2);
    }

    #[test]
    fn test_parameter_count_tokens() {
        assert_eq!(ParameterCountHeuristic::parameter_count("org/model-7b-chat"), Some(7.0));
        assert_eq!(ParameterCountHeuristic::parameter_count("Model-1.5B"), Some(1.5));
        assert_eq!(ParameterCountHeuristic::parameter_count("phi_3b"), Some(3.0));
        assert_eq!(ParameterCountHeuristic::parameter_count("llama3b"), None);
        assert_eq!(ParameterCountHeuristic::parameter_count("bert-base"), None);
        assert_eq!(ParameterCountHeuristic::parameter_count("web-crawler"), None);
    }

    #[test]
    fn test_parameter_count_estimates() {
        let chain = chain_without_disk();
        assert_eq!(chain.estimate_footprint("vicuna-13b").size_gb, 26.0);
        assert_eq!(chain.estimate_footprint("falcon-70b").size_gb, 140.0);

        let estimate = chain.estimate_footprint("acme-3b");
        assert_eq!(estimate.size_gb, 6.0);
        assert_eq!(estimate.source, EstimateSource::ParameterCount);
    }

    #[test]
    fn test_default_estimate() {
        let estimate = chain_without_disk().estimate_footprint("acme/widget");
        assert_eq!(estimate.size_gb, DEFAULT_FOOTPRINT_GB);
        assert_eq!(estimate.source, EstimateSource::Default);
    }

    #[test]
    fn test_on_disk_size_fallback() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("models--acme--widget");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("model.safetensors"), vec![0u8; 4096]).unwrap();

        let chain = EstimatorChain::standard(Arc::new(CacheScanner::new(root.path())));
        let estimate = chain.estimate_footprint("acme/widget");

        assert_eq!(estimate.source, EstimateSource::OnDiskSize);
        assert!((estimate.size_gb - 4096.0 / BYTES_PER_GIB).abs() < 1e-12);
    }
}
