//! Host resource probe
//!
//! CPU and RAM figures come from `sysinfo`; accelerator memory comes from an
//! [`AcceleratorProbe`]. Every call takes a fresh reading.

use crate::gpu::{AcceleratorProbe, AcceleratorStatus};
use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuInfo {
    pub usage_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_cores: Option<usize>,
    pub logical_cores: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub total_gb: f64,
    pub available_gb: f64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
}

/// Host plus accelerator state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    #[serde(flatten)]
    pub host: HostSnapshot,
    pub gpu: AcceleratorStatus,
}

/// Take a CPU/RAM reading
///
/// Blocks for `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL` so the CPU usage figure
/// covers a real interval; call from a blocking task.
pub fn probe_host() -> HostSnapshot {
    let mut system = System::new_with_specifics(
        RefreshKind::new()
            .with_memory(MemoryRefreshKind::everything())
            .with_cpu(CpuRefreshKind::everything()),
    );
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu();

    let total = system.total_memory();
    let available = system.available_memory();

    HostSnapshot {
        cpu: CpuInfo {
            usage_percent: system.global_cpu_info().cpu_usage(),
            physical_cores: system.physical_core_count(),
            logical_cores: system.cpus().len(),
        },
        memory: memory_info(total, available),
    }
}

fn memory_info(total_bytes: u64, available_bytes: u64) -> MemoryInfo {
    let used_percent = if total_bytes > 0 {
        (total_bytes.saturating_sub(available_bytes)) as f64 / total_bytes as f64 * 100.0
    } else {
        0.0
    };
    MemoryInfo {
        total_gb: total_bytes as f64 / BYTES_PER_GIB,
        available_gb: available_bytes as f64 / BYTES_PER_GIB,
        used_percent,
    }
}

/// Host reading combined with a live accelerator probe
pub fn probe_resources(accelerators: &dyn AcceleratorProbe) -> ResourceSnapshot {
    ResourceSnapshot {
        host: probe_host(),
        gpu: accelerators.probe(),
    }
}
