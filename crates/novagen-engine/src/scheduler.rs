//! Queue consumer and per-job supervisor.
//!
//! The scheduler owns one cooperative loop: while the concurrency ceiling has
//! room it pulls the next job (bounded wait), reserves a GPU and hands the job
//! to a supervisor task. Every wait races the shutdown token.
//!
//! The supervisor runs the blocking part of a job on the blocking pool:
//! load, optimize, infer, persist. It then records the outcome, publishes
//! the final event and releases the GPU slot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use novagen_types::{
    sys_error, sys_info, sys_warn, DeviceId, JobId, JobKind, MemoryTransform, DEFAULT_DEVICE,
};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::inference::{InferenceBackend, InferenceError, InferenceRequest};
use crate::job_queue::{DispatchedJob, DEFAULT_DEQUEUE_WAIT};
use crate::progress::ProgressReporter;
use crate::seeds::seeds_from_params;
use crate::vram_optimizer::VramOptimizer;
use crate::Core;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub kind: JobKind,
    pub files: Vec<PathBuf>,
    pub seeds: Vec<u64>,
    pub optimizations: Vec<MemoryTransform>,
    pub gpu_id: DeviceId,
    pub aggressive: bool,
}

impl JobOutput {
    /// Result payload stored on the job and attached to the completion event.
    pub fn to_map(&self) -> Map<String, Value> {
        let files: Vec<String> = self
            .files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let files_key = if self.kind.produces_images() {
            "images"
        } else {
            "captions"
        };

        let mut map = Map::new();
        map.insert(files_key.to_string(), json!(files));
        map.insert("seeds".to_string(), json!(self.seeds));
        map.insert("optimizations".to_string(), json!(self.optimizations));
        map.insert("gpu_id".to_string(), json!(self.gpu_id));
        map.insert("aggressive".to_string(), json!(self.aggressive));
        map
    }
}

pub struct Scheduler<B: InferenceBackend> {
    core: Core,
    backend: Arc<B>,
    store: Arc<dyn ArtifactStore>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl<B: InferenceBackend> Scheduler<B> {
    pub fn new(
        core: Core,
        backend: Arc<B>,
        store: Arc<dyn ArtifactStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            core,
            backend,
            store,
            poll_interval: DEFAULT_DEQUEUE_WAIT,
            shutdown,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        sys_info!(
            "[SCHEDULER] Started (max concurrent: {})",
            self.core.queue.max_concurrent()
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if !self.core.queue.can_accept_more() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            }

            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = self.core.queue.next_ready(self.poll_interval) => job,
            };

            if let Some(job) = next {
                self.dispatch(job).await;
            }
        }

        sys_info!("[SCHEDULER] Stopped");
    }

    async fn dispatch(&self, job: DispatchedJob) {
        let gpus = Arc::clone(&self.core.gpus);
        let device = match tokio::task::spawn_blocking(move || gpus.acquire_best_device()).await {
            Ok(device) => device,
            Err(e) => {
                sys_error!("[SCHEDULER] Device selection for job {} panicked: {}", job.id, e);
                if self.core.queue.start(&job.id, DEFAULT_DEVICE) {
                    let message = format!("device selection failed: {e}");
                    self.core.queue.fail(&job.id, message.as_str());
                    ProgressReporter::new(Arc::clone(&self.core.hub), job.id.clone())
                        .error(&message);
                }
                return;
            }
        };

        if !self.core.queue.start(&job.id, device) {
            // Cancelled between dequeue and start.
            self.core.gpus.release_job(device);
            return;
        }

        let supervisor = JobSupervisor {
            core: self.core.clone(),
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
        };
        tokio::spawn(supervisor.run(job, device));
    }
}

struct JobSupervisor<B: InferenceBackend> {
    core: Core,
    backend: Arc<B>,
    store: Arc<dyn ArtifactStore>,
}

impl<B: InferenceBackend> JobSupervisor<B> {
    async fn run(self, job: DispatchedJob, device: DeviceId) {
        let job_id = job.id.clone();
        let reporter = ProgressReporter::new(Arc::clone(&self.core.hub), job_id.clone());

        let outcome = {
            let backend = Arc::clone(&self.backend);
            let vram = Arc::clone(&self.core.vram);
            let store = Arc::clone(&self.store);
            let reporter = reporter.clone();
            tokio::task::spawn_blocking(move || {
                execute(&*backend, &vram, &*store, &reporter, &job, device)
            })
            .await
        };

        match outcome {
            Ok(Ok(output)) => self.finish(&job_id, &reporter, output),
            Ok(Err(e)) => self.abort(&job_id, &reporter, e.to_string()),
            Err(e) => self.abort(&job_id, &reporter, format!("inference task panicked: {e}")),
        }

        self.core.gpus.release_job(device);
    }

    fn finish(&self, job_id: &JobId, reporter: &ProgressReporter, output: JobOutput) {
        let extra = output.to_map();
        if self.core.queue.complete(job_id, Value::Object(extra.clone())) {
            sys_info!(
                "[SCHEDULER] Job {} finished in {:.2}s",
                job_id,
                reporter.elapsed_secs()
            );
            reporter.complete(true, "Generation complete", extra);
        } else {
            sys_warn!("[SCHEDULER] Job {} was cancelled, result discarded", job_id);
            reporter.error("Job was cancelled");
        }
    }

    fn abort(&self, job_id: &JobId, reporter: &ProgressReporter, message: String) {
        sys_error!("[SCHEDULER] Job {} failed: {}", job_id, message);
        self.core.queue.fail(job_id, message.as_str());
        reporter.error(&message);
    }
}

/// Blocking body of one job.
fn execute<B: InferenceBackend>(
    backend: &B,
    vram: &VramOptimizer,
    store: &dyn ArtifactStore,
    reporter: &ProgressReporter,
    job: &DispatchedJob,
    device: DeviceId,
) -> Result<JobOutput, JobError> {
    reporter.stage(
        "loading",
        &format!("Loading {} pipeline on GPU {}", job.kind, device),
    );
    let mut pipeline = backend.load_pipeline(job.kind, device)?;

    reporter.stage("optimizing", "Applying memory optimizations");
    let aggressive = vram.should_use_aggressive();
    let optimizations = vram.apply_optimizations(&mut pipeline, aggressive);

    let seeds = seeds_from_params(&job.params);
    let request = InferenceRequest {
        job_id: job.id.clone(),
        kind: job.kind,
        params: job.params.clone(),
        seeds: seeds.clone(),
        device,
    };

    reporter.stage("generating", "Running inference");
    let run = backend.run(&mut pipeline, &request, reporter);
    backend.unload_pipeline(pipeline);
    if aggressive {
        vram.clear_cache();
    }
    let output = run?;

    reporter.stage("saving", "Saving results");
    let files = store.persist(&job.id, &output.artifacts)?;

    Ok(JobOutput {
        kind: job.kind,
        files,
        seeds,
        optimizations,
        gpu_id: device,
        aggressive,
    })
}
