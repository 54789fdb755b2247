//! Job orchestration core: GPU registry, memory policy, priority queue,
//! progress broadcast and the scheduler that ties them together.

pub mod artifacts;
pub mod device_probe;
pub mod gpu_registry;
pub mod inference;
pub mod job_queue;
pub mod progress;
pub mod scheduler;
pub mod seeds;
pub mod simulated;
pub mod vram_optimizer;

use std::sync::Arc;

use novagen_config::ServerConfig;

pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use device_probe::{DeviceProbe, NvidiaSmiProbe, StaticProbe};
pub use gpu_registry::GpuRegistry;
pub use inference::{InferenceBackend, MemoryReclaim, NoopReclaim, PipelineHandle, StepSink};
pub use job_queue::{JobQueue, JobResult};
pub use progress::{ChannelConnection, ProgressConnection, ProgressHub, ProgressReporter};
pub use scheduler::Scheduler;
pub use simulated::SimulatedBackend;
pub use vram_optimizer::{OptimizationThresholds, VramOptimizer};

/// The shared services, constructed once at start-up and handed to the
/// scheduler and every request handler.
#[derive(Clone)]
pub struct Core {
    pub queue: Arc<JobQueue>,
    pub gpus: Arc<GpuRegistry>,
    pub vram: Arc<VramOptimizer>,
    pub hub: Arc<ProgressHub>,
}

impl Core {
    pub fn new(
        probe: Arc<dyn DeviceProbe>,
        reclaim: Arc<dyn MemoryReclaim>,
        max_concurrent: usize,
        thresholds: OptimizationThresholds,
    ) -> Self {
        Self {
            queue: Arc::new(JobQueue::new(max_concurrent)),
            gpus: Arc::new(GpuRegistry::new(Arc::clone(&probe))),
            vram: Arc::new(VramOptimizer::new(probe, reclaim, thresholds)),
            hub: Arc::new(ProgressHub::new()),
        }
    }

    pub fn from_config(
        config: &ServerConfig,
        probe: Arc<dyn DeviceProbe>,
        reclaim: Arc<dyn MemoryReclaim>,
    ) -> Self {
        let thresholds = OptimizationThresholds {
            low_vram_gb: config.low_vram_threshold_gb,
            high_utilization_pct: config.high_utilization_pct,
        };
        Self::new(probe, reclaim, config.max_concurrent_jobs, thresholds)
    }
}
