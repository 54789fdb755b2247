//! GPU registry: live device records and load-balanced device selection.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use novagen_types::{
    sys_debug, sys_info, sys_warn, DeviceId, DeviceSnapshot, GpuRecord, GpuStatus, DEFAULT_DEVICE,
};

use crate::device_probe::DeviceProbe;

/// Tracks how many jobs run on each accelerator and picks the next one.
///
/// The active-job counters sit behind one lock; [`GpuRegistry::acquire_best_device`]
/// holds it across read, decide and increment so two concurrent dispatches
/// never both see the same stale count. Probing happens before the lock is
/// taken, so a slow driver query never stalls `release_job`.
pub struct GpuRegistry {
    probe: Arc<dyn DeviceProbe>,
    active_jobs: Mutex<HashMap<DeviceId, u32>>,
}

impl GpuRegistry {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        let devices = probe.probe();
        if devices.is_empty() {
            sys_warn!("[GPU] No accelerator detected, jobs will use the default device");
        } else {
            sys_info!("[GPU] Detected {} GPU(s)", devices.len());
            for device in &devices {
                sys_info!(
                    "[GPU] GPU {}: {} ({:.2} GB)",
                    device.id,
                    device.name,
                    device.total_gb
                );
            }
        }

        let active_jobs = devices.iter().map(|d| (d.id, 0)).collect();
        Self {
            probe,
            active_jobs: Mutex::new(active_jobs),
        }
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<DeviceId, u32>> {
        self.active_jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh record for every detected accelerator; empty when there are none.
    pub fn list_devices(&self) -> Vec<GpuRecord> {
        let snapshots = self.probe.probe();
        records_with(&snapshots, &self.counters())
    }

    /// Record for one device, if it exists.
    pub fn device(&self, id: DeviceId) -> Option<GpuRecord> {
        let record = self.list_devices().into_iter().find(|r| r.id == id);
        if record.is_none() {
            sys_warn!("[GPU] GPU {} not available", id);
        }
        record
    }

    /// Device the next job should run on. Does not reserve it.
    pub fn select_best_device(&self) -> DeviceId {
        let snapshots = self.probe.probe();
        pick_best_device(&records_with(&snapshots, &self.counters()))
    }

    /// Select and reserve a device as one lock-held unit.
    ///
    /// Memory readings are taken first; ranking and the increment then run
    /// under the counter lock against the live job counts.
    pub fn acquire_best_device(&self) -> DeviceId {
        let snapshots = self.probe.probe();
        let mut counters = self.counters();
        let records = records_with(&snapshots, &counters);
        let device = pick_best_device(&records);
        let active = counters.entry(device).or_insert(0);
        *active += 1;
        sys_info!(
            "[GPU] Selected GPU {} ({} active job(s))",
            device,
            *active
        );
        device
    }

    pub fn assign_job(&self, device: DeviceId) {
        let mut counters = self.counters();
        let active = counters.entry(device).or_insert(0);
        *active += 1;
        sys_debug!("[GPU] Job assigned to GPU {} (total: {})", device, *active);
    }

    /// Decrement the device's counter; already-zero counters stay at zero.
    pub fn release_job(&self, device: DeviceId) {
        let mut counters = self.counters();
        match counters.get_mut(&device) {
            Some(active) if *active > 0 => {
                *active -= 1;
                sys_debug!(
                    "[GPU] Job released from GPU {} (remaining: {})",
                    device,
                    *active
                );
            }
            _ => sys_debug!("[GPU] Release on idle GPU {} ignored", device),
        }
    }

    pub fn active_jobs(&self, device: DeviceId) -> u32 {
        self.counters().get(&device).copied().unwrap_or(0)
    }

    pub fn status(&self) -> GpuStatus {
        GpuStatus::from_records(self.list_devices())
    }
}

fn records_with(snapshots: &[DeviceSnapshot], counters: &HashMap<DeviceId, u32>) -> Vec<GpuRecord> {
    snapshots
        .iter()
        .map(|snapshot| {
            let active = counters.get(&snapshot.id).copied().unwrap_or(0);
            GpuRecord::from_snapshot(snapshot, active)
        })
        .collect()
}

/// Fewest active jobs first, then most free memory, then lowest id.
pub fn pick_best_device(records: &[GpuRecord]) -> DeviceId {
    match records {
        [] => DEFAULT_DEVICE,
        [only] => only.id,
        _ => records
            .iter()
            .min_by(|a, b| compare_load(a, b))
            .map(|r| r.id)
            .unwrap_or(DEFAULT_DEVICE),
    }
}

fn compare_load(a: &GpuRecord, b: &GpuRecord) -> Ordering {
    a.active_jobs
        .cmp(&b.active_jobs)
        .then_with(|| b.free_vram_gb.total_cmp(&a.free_vram_gb))
        .then_with(|| a.id.cmp(&b.id))
}
