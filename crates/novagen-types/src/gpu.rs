use serde::{Deserialize, Serialize};

use crate::serialize_rounded;

/// Accelerator index as reported by the driver.
pub type DeviceId = u32;

/// Device used when no accelerator is present (CPU / single-device fallback).
pub const DEFAULT_DEVICE: DeviceId = 0;

/// Raw memory reading for one accelerator, as returned by a device probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub name: String,
    pub total_gb: f64,
    pub allocated_gb: f64,
    pub reserved_gb: f64,
}

/// Live view of one accelerator, including the jobs the registry placed on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuRecord {
    pub id: DeviceId,
    pub name: String,
    #[serde(serialize_with = "serialize_rounded")]
    pub total_vram_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub allocated_vram_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub cached_vram_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub free_vram_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub utilization: f64,
    pub active_jobs: u32,
}

impl GpuRecord {
    /// Derive free memory and utilization from a probe reading.
    ///
    /// Allocation is clamped into `0..=total` so `free <= total` holds even
    /// when the driver reports a transiently inconsistent pair.
    pub fn from_snapshot(snapshot: &DeviceSnapshot, active_jobs: u32) -> Self {
        let total = snapshot.total_gb.max(0.0);
        let allocated = snapshot.allocated_gb.clamp(0.0, total);
        let utilization = if total > 0.0 {
            allocated / total * 100.0
        } else {
            0.0
        };

        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            total_vram_gb: total,
            allocated_vram_gb: allocated,
            cached_vram_gb: snapshot.reserved_gb.max(0.0),
            free_vram_gb: total - allocated,
            utilization,
            active_jobs,
        }
    }
}

/// Aggregate GPU status returned by `/gpu/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuStatus {
    pub available: bool,
    pub count: usize,
    pub gpus: Vec<GpuRecord>,
}

impl GpuStatus {
    pub fn from_records(gpus: Vec<GpuRecord>) -> Self {
        Self {
            available: !gpus.is_empty(),
            count: gpus.len(),
            gpus,
        }
    }
}

/// Memory figures for the primary accelerator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    #[serde(serialize_with = "serialize_rounded")]
    pub total_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub allocated_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub reserved_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub free_gb: f64,
    #[serde(serialize_with = "serialize_rounded")]
    pub utilization: f64,
}

impl MemoryUsage {
    /// Utilization is rounded to one decimal here, before any threshold sees
    /// it, so 80.04 % reads as 80.0 %.
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        let record = GpuRecord::from_snapshot(snapshot, 0);
        Self {
            total_gb: record.total_vram_gb,
            allocated_gb: record.allocated_vram_gb,
            reserved_gb: record.cached_vram_gb,
            free_gb: record.free_vram_gb,
            utilization: (record.utilization * 10.0).round() / 10.0,
        }
    }
}

/// Either the primary device's memory usage or the "unavailable" marker.
///
/// Serializes as `{"available": false}` or `{"available": true, ...usage}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VramUsage {
    pub available: bool,
    #[serde(flatten)]
    pub usage: Option<MemoryUsage>,
}

impl VramUsage {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            usage: None,
        }
    }

    pub fn from_usage(usage: MemoryUsage) -> Self {
        Self {
            available: true,
            usage: Some(usage),
        }
    }
}

/// A memory-saving transform that can be applied to a loaded pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTransform {
    /// Compute attention in slices instead of one large matmul.
    AttentionSlicing,
    /// Decode latents one slice at a time.
    VaeSlicing,
    /// Keep inactive sub-models in host memory and stream them in.
    SequentialCpuOffload,
}

impl MemoryTransform {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTransform::AttentionSlicing => "attention_slicing",
            MemoryTransform::VaeSlicing => "vae_slicing",
            MemoryTransform::SequentialCpuOffload => "sequential_cpu_offload",
        }
    }
}

impl std::fmt::Display for MemoryTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
