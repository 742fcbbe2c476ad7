//! Memory-proportional batching for embedding requests
//!
//! Texts are grouped so that the total character count of a batch stays
//! under a volume derived from free accelerator memory.

use crate::config::BatchConfig;
use crate::gpu::AcceleratorStatus;

/// Volume used when no accelerator is present
pub const CPU_MAX_VOLUME: usize = 10_000;

/// Lower bound on any accelerator-derived volume
pub const MIN_VOLUME: usize = 1_000;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBatcher {
    memory_per_char: f64,
    memory_fraction: f64,
}

impl VolumeBatcher {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            memory_per_char: config.memory_per_char,
            memory_fraction: config.memory_fraction,
        }
    }

    /// Maximum characters per batch for the given accelerator state
    pub fn max_volume(&self, status: &AcceleratorStatus) -> usize {
        let Some(device) = status.snapshot().and_then(|s| s.primary()) else {
            return CPU_MAX_VOLUME;
        };
        let usable_bytes = device.free_gb * BYTES_PER_GIB * self.memory_fraction;
        let volume = (usable_bytes / self.memory_per_char) as usize;
        tracing::debug!(free_gb = device.free_gb, max_volume = volume, "Computed batch volume");
        volume.max(MIN_VOLUME)
    }

    /// Split `texts` into consecutive batches of at most `max_volume` characters
    ///
    /// Order is preserved; a text longer than `max_volume` forms its own batch.
    /// Returns index ranges into `texts`.
    pub fn partition(&self, texts: &[String], max_volume: usize) -> Vec<std::ops::Range<usize>> {
        let mut batches = Vec::new();
        let mut start = 0;
        let mut volume = 0;

        for (i, text) in texts.iter().enumerate() {
            let len = text.chars().count().max(1);
            if i > start && volume + len > max_volume {
                batches.push(start..i);
                start = i;
                volume = 0;
            }
            volume += len;
        }

        if start < texts.len() {
            batches.push(start..texts.len());
        }
        batches
    }
}
