//! Seams to the external inference collaborator.
//!
//! The engine never looks inside a pipeline. It asks the backend to load one
//! for a device, hands the handle to the memory policy for transforms, then
//! runs it with a [`StepSink`] that receives every step synchronously.

use serde_json::Value;
use thiserror::Error;

use novagen_types::{DeviceId, JobId, JobKind, MemoryTransform};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("pipeline unavailable: {0}")]
    PipelineUnavailable(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("inference failed: {0}")]
    Failed(String),
}

/// A transform the loaded pipeline cannot perform.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{transform} is not supported by this pipeline")]
pub struct TransformError {
    pub transform: MemoryTransform,
}

/// Receives one call per completed inference step.
pub trait StepSink: Send + Sync {
    fn on_step(&self, step: u32, total_steps: u32);
}

/// Handle to a loaded pipeline, as far as memory transforms are concerned.
pub trait PipelineHandle: Send {
    fn apply_transform(&mut self, transform: MemoryTransform) -> Result<(), TransformError>;
}

/// Everything a backend needs to run one job.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub job_id: JobId,
    pub kind: JobKind,
    pub params: Value,
    /// One seed per output image.
    pub seeds: Vec<u64>,
    pub device: DeviceId,
}

/// One output file produced by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File extension without the dot, e.g. `png`.
    pub extension: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceOutput {
    pub artifacts: Vec<Artifact>,
}

/// The opaque model runtime.
///
/// All methods block; the scheduler calls them from `spawn_blocking`.
pub trait InferenceBackend: Send + Sync + 'static {
    type Pipeline: PipelineHandle + 'static;

    fn load_pipeline(
        &self,
        kind: JobKind,
        device: DeviceId,
    ) -> Result<Self::Pipeline, InferenceError>;

    fn run(
        &self,
        pipeline: &mut Self::Pipeline,
        request: &InferenceRequest,
        steps: &dyn StepSink,
    ) -> Result<InferenceOutput, InferenceError>;

    fn unload_pipeline(&self, pipeline: Self::Pipeline) {
        drop(pipeline);
    }
}

/// Frees cached device memory. Implemented by whatever owns allocations.
pub trait MemoryReclaim: Send + Sync {
    /// Release unused cached memory on one device.
    fn release_cached(&self, device: DeviceId);

    /// General reclamation pass after per-device releases.
    fn collect(&self) {}
}

/// Reclaimer for deployments whose backend holds no device cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReclaim;

impl MemoryReclaim for NoopReclaim {
    fn release_cached(&self, _device: DeviceId) {}
}
