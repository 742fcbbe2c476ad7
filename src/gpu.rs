//! Accelerator detection and memory telemetry
//!
//! Queries GPUs via nvidia-smi on every call; nothing is cached, since free
//! memory changes as models are loaded and unloaded. The absence of an
//! accelerator is an explicit [`AcceleratorStatus::Unavailable`], never a
//! zero-filled snapshot.

use crate::models::Device;
use serde::Serialize;
use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use std::process::Command;

const MIB_PER_GIB: f64 = 1024.0;

/// Memory state of one accelerator device (GB)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceleratorDevice {
    pub index: u32,
    pub name: String,
    pub total_gb: f64,
    pub allocated_gb: f64,
    /// Memory held back by the driver (total - used - free)
    pub reserved_gb: f64,
    pub free_gb: f64,
    pub free_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_capability: Option<String>,
}

impl AcceleratorDevice {
    /// Build a device entry from raw GB figures
    pub fn new(
        index: u32,
        name: impl Into<String>,
        total_gb: f64,
        allocated_gb: f64,
        free_gb: f64,
    ) -> Self {
        let reserved_gb = (total_gb - allocated_gb - free_gb).max(0.0);
        let free_percent = if total_gb > 0.0 {
            free_gb / total_gb * 100.0
        } else {
            0.0
        };
        Self {
            index,
            name: name.into(),
            total_gb,
            allocated_gb,
            reserved_gb,
            free_gb,
            free_percent,
            compute_capability: None,
        }
    }

    /// Device identifier as used in requests, e.g. "cuda:0"
    pub fn id(&self) -> String {
        format!("cuda:{}", self.index)
    }
}

/// Live view of all visible accelerators
#[derive(Debug, Clone, PartialEq)]
pub struct AcceleratorSnapshot {
    pub devices: Vec<AcceleratorDevice>,
}

impl AcceleratorSnapshot {
    pub fn primary(&self) -> Option<&AcceleratorDevice> {
        self.devices.first()
    }

    /// Look up a device by id ("cuda:1") or bare index ("1")
    pub fn device(&self, id: &str) -> Option<&AcceleratorDevice> {
        let index: u32 = id.trim().trim_start_matches("cuda:").parse().ok()?;
        self.devices.iter().find(|d| d.index == index)
    }
}

/// Result of probing for accelerators
#[derive(Debug, Clone, PartialEq)]
pub enum AcceleratorStatus {
    Available(AcceleratorSnapshot),
    Unavailable { reason: String },
}

impl AcceleratorStatus {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn snapshot(&self) -> Option<&AcceleratorSnapshot> {
        match self {
            Self::Available(snapshot) => Some(snapshot),
            Self::Unavailable { .. } => None,
        }
    }

    /// Device new models should be placed on
    pub fn preferred_device(&self) -> Device {
        self.snapshot()
            .and_then(|s| s.primary())
            .map(|d| Device::Accelerator(d.index))
            .unwrap_or(Device::Cpu)
    }
}

struct DeviceMap<'a>(&'a [AcceleratorDevice]);

impl Serialize for DeviceMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for device in self.0 {
            map.serialize_entry(&device.id(), device)?;
        }
        map.end()
    }
}

impl Serialize for AcceleratorStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Available(snapshot) => {
                let mut s = serializer.serialize_struct("AcceleratorStatus", 3)?;
                s.serialize_field("available", &true)?;
                s.serialize_field("gpus", &DeviceMap(&snapshot.devices))?;
                s.serialize_field("primary_gpu", &snapshot.primary().map(|d| d.id()))?;
                s.end()
            }
            Self::Unavailable { reason } => {
                let mut s = serializer.serialize_struct("AcceleratorStatus", 3)?;
                s.serialize_field("available", &false)?;
                s.serialize_field("error", reason)?;
                s.serialize_field("gpus", &DeviceMap(&[]))?;
                s.end()
            }
        }
    }
}

/// Source of accelerator telemetry
pub trait AcceleratorProbe: Send + Sync {
    fn probe(&self) -> AcceleratorStatus;
}

/// Probe backed by nvidia-smi
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    binary: String,
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self {
            binary: "nvidia-smi".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn query(&self, fields: &str) -> Result<String, String> {
        let output = Command::new(&self.binary)
            .arg(format!("--query-gpu={}", fields))
            .args(["--format=csv,noheader,nounits"])
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.binary, e))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceleratorProbe for NvidiaSmiProbe {
    fn probe(&self) -> AcceleratorStatus {
        // Older drivers reject compute_cap; retry without it
        let stdout = self
            .query("index,name,memory.total,memory.used,memory.free,compute_cap")
            .or_else(|_| self.query("index,name,memory.total,memory.used,memory.free"));

        match stdout {
            Ok(stdout) => {
                let devices = parse_nvidia_smi_csv(&stdout);
                if devices.is_empty() {
                    tracing::debug!("nvidia-smi reported no devices");
                    return AcceleratorStatus::unavailable("no accelerator devices visible");
                }
                tracing::debug!(gpu_count = devices.len(), "Probed accelerator memory");
                AcceleratorStatus::Available(AcceleratorSnapshot { devices })
            }
            Err(e) => {
                tracing::debug!(error = %e, "nvidia-smi unavailable, assuming no GPUs");
                AcceleratorStatus::unavailable(e)
            }
        }
    }
}

/// Probe returning a fixed status, for tests and headless deployments
#[derive(Debug, Clone)]
pub struct FixedProbe {
    status: AcceleratorStatus,
}

impl FixedProbe {
    pub fn new(status: AcceleratorStatus) -> Self {
        Self { status }
    }

    pub fn unavailable() -> Self {
        Self::new(AcceleratorStatus::unavailable("CUDA not available"))
    }

    /// One GPU with the given total and free memory (GB)
    pub fn single_gpu(total_gb: f64, free_gb: f64) -> Self {
        let device = AcceleratorDevice::new(0, "Fixed GPU", total_gb, total_gb - free_gb, free_gb);
        Self::new(AcceleratorStatus::Available(AcceleratorSnapshot {
            devices: vec![device],
        }))
    }
}

impl AcceleratorProbe for FixedProbe {
    fn probe(&self) -> AcceleratorStatus {
        self.status.clone()
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output (memory in MiB)
pub fn parse_nvidia_smi_csv(stdout: &str) -> Vec<AcceleratorDevice> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 5 {
                return None;
            }
            let index = fields[0].parse::<u32>().ok()?;
            let total = fields[2].parse::<f64>().ok()? / MIB_PER_GIB;
            let used = fields[3].parse::<f64>().ok()? / MIB_PER_GIB;
            let free = fields[4].parse::<f64>().ok()? / MIB_PER_GIB;

            let mut device = AcceleratorDevice::new(index, fields[1], total, used, free);
            device.compute_capability = fields
                .get(5)
                .filter(|c| !c.is_empty() && !c.starts_with('['))
                .map(|c| c.to_string());
            Some(device)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_csv() {
        let out = "0, NVIDIA GeForce RTX 4090, 24564, 1024, 23000, 8.9\n\
                   1, Tesla T4, 15360, 0, 15095, [N/A]\n";
        let devices = parse_nvidia_smi_csv(out);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "NVIDIA GeForce RTX 4090");
        assert!((devices[0].total_gb - 23.988).abs() < 0.01);
        assert!((devices[0].allocated_gb - 1.0).abs() < 1e-9);
        assert_eq!(devices[0].compute_capability.as_deref(), Some("8.9"));
        assert_eq!(devices[1].compute_capability, None);
        assert!(devices[1].reserved_gb > 0.0);
    }

    #[test]
    fn test_parse_skips_garbage_lines() {
        let devices = parse_nvidia_smi_csv("No devices were found\n\n");
        assert!(devices.is_empty());
    }

    #[test]
    fn test_snapshot_device_lookup() {
        let status = FixedProbe::single_gpu(24.0, 20.0).probe();
        let snapshot = status.snapshot().unwrap();

        assert!(snapshot.device("cuda:0").is_some());
        assert!(snapshot.device("0").is_some());
        assert!(snapshot.device("cuda:1").is_none());
        assert!(snapshot.device("cpu").is_none());
    }

    #[test]
    fn test_preferred_device() {
        assert_eq!(FixedProbe::unavailable().probe().preferred_device(), Device::Cpu);
        assert_eq!(
            FixedProbe::single_gpu(8.0, 8.0).probe().preferred_device(),
            Device::Accelerator(0)
        );
    }

    #[test]
    fn test_unavailable_is_not_zero_snapshot() {
        let status = FixedProbe::unavailable().probe();
        assert!(!status.is_available());
        assert!(status.snapshot().is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["available"], false);
        assert_eq!(json["error"], "CUDA not available");
    }

    #[test]
    fn test_available_serializes_keyed_by_id() {
        let json = serde_json::to_value(FixedProbe::single_gpu(8.0, 6.0).probe()).unwrap();
        assert_eq!(json["available"], true);
        assert_eq!(json["primary_gpu"], "cuda:0");
        assert_eq!(json["gpus"]["cuda:0"]["free_gb"], 6.0);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let status = NvidiaSmiProbe::with_binary("/nonexistent/nvidia-smi-12345").probe();
        assert!(!status.is_available());
    }
}
