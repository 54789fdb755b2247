//! VRAM-aware optimization policy.
//!
//! Attention slicing and VAE slicing are always attempted. Sequential CPU
//! offload is slower and only applied under memory pressure: a small card
//! (below the low-VRAM threshold) or a busy one (above the utilization
//! threshold).

use std::sync::Arc;

use novagen_types::{
    sys_debug, sys_info, sys_warn, MemoryTransform, MemoryUsage, VramUsage,
};

use crate::device_probe::DeviceProbe;
use crate::inference::{MemoryReclaim, PipelineHandle};

pub use novagen_config::{DEFAULT_HIGH_UTILIZATION_PCT, DEFAULT_LOW_VRAM_THRESHOLD_GB};

/// Transforms attempted on every pipeline.
pub const ALWAYS_ON: [MemoryTransform; 2] =
    [MemoryTransform::AttentionSlicing, MemoryTransform::VaeSlicing];

/// Transforms attempted only in aggressive mode.
pub const AGGRESSIVE_ONLY: [MemoryTransform; 1] = [MemoryTransform::SequentialCpuOffload];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationThresholds {
    pub low_vram_gb: f64,
    pub high_utilization_pct: f64,
}

impl Default for OptimizationThresholds {
    fn default() -> Self {
        Self {
            low_vram_gb: DEFAULT_LOW_VRAM_THRESHOLD_GB,
            high_utilization_pct: DEFAULT_HIGH_UTILIZATION_PCT,
        }
    }
}

impl OptimizationThresholds {
    /// Whether `usage` calls for the aggressive transform set.
    pub fn is_under_pressure(&self, usage: &MemoryUsage) -> bool {
        usage.total_gb < self.low_vram_gb || usage.utilization > self.high_utilization_pct
    }
}

pub struct VramOptimizer {
    probe: Arc<dyn DeviceProbe>,
    reclaim: Arc<dyn MemoryReclaim>,
    thresholds: OptimizationThresholds,
}

impl VramOptimizer {
    pub fn new(
        probe: Arc<dyn DeviceProbe>,
        reclaim: Arc<dyn MemoryReclaim>,
        thresholds: OptimizationThresholds,
    ) -> Self {
        Self {
            probe,
            reclaim,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> OptimizationThresholds {
        self.thresholds
    }

    /// Memory figures of the primary (lowest-id) device.
    pub fn current_usage(&self) -> VramUsage {
        self.probe
            .probe()
            .iter()
            .min_by_key(|d| d.id)
            .map(|primary| VramUsage::from_usage(MemoryUsage::from_snapshot(primary)))
            .unwrap_or_else(VramUsage::unavailable)
    }

    pub fn should_use_aggressive(&self) -> bool {
        match self.current_usage().usage {
            Some(usage) => self.thresholds.is_under_pressure(&usage),
            None => false,
        }
    }

    /// Attempt each transform independently; returns the ones that applied.
    pub fn apply_optimizations<P>(&self, pipeline: &mut P, aggressive: bool) -> Vec<MemoryTransform>
    where
        P: PipelineHandle + ?Sized,
    {
        let extra: &[MemoryTransform] = if aggressive { &AGGRESSIVE_ONLY } else { &[] };

        let mut applied = Vec::new();
        for transform in ALWAYS_ON.iter().chain(extra) {
            match pipeline.apply_transform(*transform) {
                Ok(()) => applied.push(*transform),
                Err(e) => sys_warn!("[VRAM] Could not enable {}: {}", transform, e),
            }
        }

        sys_debug!(
            "[VRAM] Applied {:?} (aggressive: {})",
            applied,
            aggressive
        );
        applied
    }

    /// Release cached memory on every device, then run a reclamation pass.
    pub fn clear_cache(&self) {
        let devices = self.probe.probe();
        if devices.is_empty() {
            sys_debug!("[VRAM] No accelerator present, nothing to clear");
            return;
        }
        for device in &devices {
            self.reclaim.release_cached(device.id);
        }
        self.reclaim.collect();
        sys_info!("[VRAM] Cleared cached memory on {} device(s)", devices.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_probe::StaticProbe;
    use crate::inference::{NoopReclaim, TransformError};
    use novagen_types::{DeviceId, DeviceSnapshot};
    use std::sync::Mutex;

    fn snapshot(total: f64, allocated: f64) -> DeviceSnapshot {
        DeviceSnapshot {
            id: 0,
            name: "Test GPU".to_string(),
            total_gb: total,
            allocated_gb: allocated,
            reserved_gb: allocated,
        }
    }

    fn optimizer(devices: Vec<DeviceSnapshot>) -> VramOptimizer {
        VramOptimizer::new(
            Arc::new(StaticProbe::new(devices)),
            Arc::new(NoopReclaim),
            OptimizationThresholds::default(),
        )
    }

    #[derive(Default)]
    struct FakePipeline {
        unsupported: Vec<MemoryTransform>,
        attempted: Vec<MemoryTransform>,
    }

    impl PipelineHandle for FakePipeline {
        fn apply_transform(&mut self, transform: MemoryTransform) -> Result<(), TransformError> {
            self.attempted.push(transform);
            if self.unsupported.contains(&transform) {
                Err(TransformError { transform })
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingReclaim {
        released: Mutex<Vec<DeviceId>>,
        collections: Mutex<u32>,
    }

    impl MemoryReclaim for RecordingReclaim {
        fn release_cached(&self, device: DeviceId) {
            self.released.lock().unwrap().push(device);
        }

        fn collect(&self) {
            *self.collections.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_small_card_is_always_aggressive() {
        assert!(optimizer(vec![snapshot(10.0, 0.5)]).should_use_aggressive());
    }

    #[test]
    fn test_busy_card_is_aggressive() {
        assert!(optimizer(vec![snapshot(24.0, 24.0 * 0.85)]).should_use_aggressive());
    }

    #[test]
    fn test_roomy_card_is_not_aggressive() {
        assert!(!optimizer(vec![snapshot(24.0, 12.0)]).should_use_aggressive());
    }

    #[test]
    fn test_utilization_just_over_threshold_rounds_down() {
        assert!(!optimizer(vec![snapshot(100.0, 80.04)]).should_use_aggressive());
        assert!(optimizer(vec![snapshot(100.0, 80.06)]).should_use_aggressive());
    }

    #[test]
    fn test_no_accelerator_is_not_aggressive() {
        let vram = optimizer(Vec::new());
        assert!(!vram.should_use_aggressive());
        assert!(!vram.current_usage().available);
    }

    #[test]
    fn test_current_usage_reports_primary_device() {
        let mut secondary = snapshot(48.0, 1.0);
        secondary.id = 1;
        let vram = optimizer(vec![secondary, snapshot(16.0, 4.0)]);
        let usage = vram.current_usage().usage.unwrap();
        assert_eq!(usage.total_gb, 16.0);
        assert_eq!(usage.free_gb, 12.0);
        assert_eq!(usage.utilization, 25.0);
    }

    #[test]
    fn test_default_mode_applies_slicing_only() {
        let mut pipeline = FakePipeline::default();
        let applied = optimizer(Vec::new()).apply_optimizations(&mut pipeline, false);
        assert_eq!(
            applied,
            vec![MemoryTransform::AttentionSlicing, MemoryTransform::VaeSlicing]
        );
        assert!(!pipeline
            .attempted
            .contains(&MemoryTransform::SequentialCpuOffload));
    }

    #[test]
    fn test_aggressive_mode_adds_offload() {
        let mut pipeline = FakePipeline::default();
        let applied = optimizer(Vec::new()).apply_optimizations(&mut pipeline, true);
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[2], MemoryTransform::SequentialCpuOffload);
    }

    #[test]
    fn test_unsupported_transform_is_skipped() {
        let mut pipeline = FakePipeline {
            unsupported: vec![MemoryTransform::AttentionSlicing],
            ..Default::default()
        };
        let applied = optimizer(Vec::new()).apply_optimizations(&mut pipeline, true);
        assert_eq!(
            applied,
            vec![
                MemoryTransform::VaeSlicing,
                MemoryTransform::SequentialCpuOffload
            ]
        );
        assert_eq!(pipeline.attempted.len(), 3);
    }

    #[test]
    fn test_clear_cache_without_accelerator_is_a_noop() {
        let reclaim = Arc::new(RecordingReclaim::default());
        let vram = VramOptimizer::new(
            Arc::new(StaticProbe::none()),
            reclaim.clone(),
            OptimizationThresholds::default(),
        );
        vram.clear_cache();
        vram.clear_cache();
        assert!(reclaim.released.lock().unwrap().is_empty());
        assert_eq!(*reclaim.collections.lock().unwrap(), 0);
    }

    #[test]
    fn test_clear_cache_releases_every_device() {
        let reclaim = Arc::new(RecordingReclaim::default());
        let mut second = snapshot(24.0, 2.0);
        second.id = 1;
        let vram = VramOptimizer::new(
            Arc::new(StaticProbe::new(vec![snapshot(24.0, 2.0), second])),
            reclaim.clone(),
            OptimizationThresholds::default(),
        );
        vram.clear_cache();
        assert_eq!(*reclaim.released.lock().unwrap(), vec![0, 1]);
        assert_eq!(*reclaim.collections.lock().unwrap(), 1);
    }
}
