//! Stand-in inference backend for deployments without a model runtime.
//!
//! Walks through the requested number of steps with a fixed delay, reporting
//! each one, then renders a small placeholder PNG per seed (or a caption text
//! file for captioning jobs). Useful for exercising the whole job pipeline
//! end to end.

use std::io::Cursor;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;

use novagen_types::{sys_debug, DeviceId, JobKind, MemoryTransform};

use crate::inference::{
    Artifact, InferenceBackend, InferenceError, InferenceOutput, InferenceRequest, MemoryReclaim,
    PipelineHandle, StepSink, TransformError,
};

pub const DEFAULT_STEPS: u32 = 30;
pub const MAX_STEPS: u32 = 150;
const PLACEHOLDER_SIZE: u32 = 64;

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    step_delay: Duration,
}

impl SimulatedBackend {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[derive(Debug)]
pub struct SimulatedPipeline {
    kind: JobKind,
    device: DeviceId,
    transforms: Vec<MemoryTransform>,
}

impl SimulatedPipeline {
    pub fn transforms(&self) -> &[MemoryTransform] {
        &self.transforms
    }
}

impl PipelineHandle for SimulatedPipeline {
    fn apply_transform(&mut self, transform: MemoryTransform) -> Result<(), TransformError> {
        // Captioning models run whole; there are no sub-models to offload.
        if self.kind == JobKind::Caption && transform == MemoryTransform::SequentialCpuOffload {
            return Err(TransformError { transform });
        }
        self.transforms.push(transform);
        Ok(())
    }
}

/// `params.steps`, defaulting to 30 and clamped to `1..=150`.
fn requested_steps(params: &Value) -> Result<u32, InferenceError> {
    match params.get("steps") {
        None | Some(Value::Null) => Ok(DEFAULT_STEPS),
        Some(value) => value
            .as_u64()
            .map(|steps| steps.clamp(1, u64::from(MAX_STEPS)) as u32)
            .ok_or_else(|| {
                InferenceError::InvalidParams(format!(
                    "steps must be a non-negative integer, got {value}"
                ))
            }),
    }
}

fn placeholder_png(seed: u64) -> Result<Vec<u8>, InferenceError> {
    let [r, g, b, ..] = seed.to_le_bytes();
    let image = RgbImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
        Rgb([
            r.wrapping_add((x * 4) as u8),
            g.wrapping_add((y * 4) as u8),
            b,
        ])
    });

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| InferenceError::Failed(format!("failed to encode image: {e}")))?;
    Ok(bytes)
}

impl InferenceBackend for SimulatedBackend {
    type Pipeline = SimulatedPipeline;

    fn load_pipeline(
        &self,
        kind: JobKind,
        device: DeviceId,
    ) -> Result<Self::Pipeline, InferenceError> {
        sys_debug!("[SCHEDULER] Loading simulated {} pipeline on GPU {}", kind, device);
        Ok(SimulatedPipeline {
            kind,
            device,
            transforms: Vec::new(),
        })
    }

    fn run(
        &self,
        pipeline: &mut Self::Pipeline,
        request: &InferenceRequest,
        steps: &dyn StepSink,
    ) -> Result<InferenceOutput, InferenceError> {
        let total_steps = requested_steps(&request.params)?;
        let fail = request
            .params
            .get("simulate_failure")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        for step in 1..=total_steps {
            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }
            steps.on_step(step, total_steps);
            if fail && step >= total_steps.div_ceil(2) {
                return Err(InferenceError::Failed(format!(
                    "simulated failure at step {step} on GPU {}",
                    pipeline.device
                )));
            }
        }

        let artifacts = if pipeline.kind.produces_images() {
            request
                .seeds
                .iter()
                .map(|seed| {
                    Ok(Artifact {
                        extension: "png".to_string(),
                        bytes: placeholder_png(*seed)?,
                    })
                })
                .collect::<Result<Vec<_>, InferenceError>>()?
        } else {
            vec![Artifact {
                extension: "txt".to_string(),
                bytes: format!("placeholder caption for job {}", request.job_id).into_bytes(),
            }]
        };

        Ok(InferenceOutput { artifacts })
    }
}

impl MemoryReclaim for SimulatedBackend {
    fn release_cached(&self, device: DeviceId) {
        sys_debug!("[VRAM] Simulated cache release on GPU {}", device);
    }
}
