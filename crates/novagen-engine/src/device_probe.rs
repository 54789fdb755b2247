//! Accelerator memory probes.
//!
//! The registry and the memory policy never talk to a driver directly; they
//! ask a [`DeviceProbe`] for fresh readings on every query.

use std::process::Command;
use std::sync::{Mutex, PoisonError};

use novagen_types::{sys_debug, DeviceId, DeviceSnapshot};

pub const MB_TO_GB: f64 = 1024.0;

const NVIDIA_SMI_QUERY: &str = "--query-gpu=index,name,memory.total,memory.used,memory.reserved";

/// Source of live accelerator readings.
pub trait DeviceProbe: Send + Sync {
    /// Current readings for every detected accelerator. Empty when none exist.
    fn probe(&self) -> Vec<DeviceSnapshot>;
}

/// Reads memory figures from `nvidia-smi` on every call.
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
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProbe for NvidiaSmiProbe {
    fn probe(&self) -> Vec<DeviceSnapshot> {
        let output = match Command::new(&self.binary)
            .args([NVIDIA_SMI_QUERY, "--format=csv,noheader,nounits"])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                sys_debug!("[GPU] {} not runnable: {}", self.binary, e);
                return Vec::new();
            }
        };

        if !output.status.success() {
            sys_debug!(
                "[GPU] {} failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Vec::new();
        }

        parse_nvidia_smi_csv(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `index, name, total MiB, used MiB, reserved MiB` lines.
///
/// Lines that do not carry an index and a total are skipped; `[N/A]` in the
/// used/reserved columns reads as zero.
pub fn parse_nvidia_smi_csv(output: &str) -> Vec<DeviceSnapshot> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 3 {
                return None;
            }
            let id = fields[0].parse::<DeviceId>().ok()?;
            let total_mb = fields[2].parse::<f64>().ok()?;
            let mb_or_zero = |index: usize| {
                fields
                    .get(index)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };

            Some(DeviceSnapshot {
                id,
                name: fields[1].to_string(),
                total_gb: total_mb / MB_TO_GB,
                allocated_gb: mb_or_zero(3) / MB_TO_GB,
                reserved_gb: mb_or_zero(4) / MB_TO_GB,
            })
        })
        .collect()
}

/// Probe returning a fixed, replaceable set of readings.
///
/// Used for CPU-only deployments (empty) and in tests.
#[derive(Debug, Default)]
pub struct StaticProbe {
    devices: Mutex<Vec<DeviceSnapshot>>,
}

impl StaticProbe {
    pub fn new(devices: Vec<DeviceSnapshot>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    /// A probe that never finds an accelerator.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn set(&self, devices: Vec<DeviceSnapshot>) {
        *self.devices.lock().unwrap_or_else(PoisonError::into_inner) = devices;
    }
}

impl DeviceProbe for StaticProbe {
    fn probe(&self) -> Vec<DeviceSnapshot> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
