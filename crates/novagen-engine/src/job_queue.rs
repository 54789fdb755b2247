//! Priority job queue with bounded concurrency.
//!
//! The queue owns every job record. Waiting jobs sit in a max-heap ordered
//! by (priority, submission order); cancelled entries stay in the heap and
//! are skipped when popped. Every transition runs under the one state lock
//! and is a silent no-op when the job is not in the expected source state.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use novagen_types::{
    sys_debug, sys_info, sys_warn, DeviceId, JobId, JobKind, JobSnapshot, JobStatus, QueueStatus,
};

/// How long [`JobQueue::next_ready`] waits for a submission before giving up.
pub const DEFAULT_DEQUEUE_WAIT: Duration = Duration::from_millis(100);

struct Job {
    id: JobId,
    kind: JobKind,
    params: Value,
    status: JobStatus,
    gpu_id: Option<DeviceId>,
    priority: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<String>,
}

impl Job {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            gpu_id: self.gpu_id,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            priority: self.priority,
            error: self.error.clone(),
        }
    }
}

/// Heap entry. Higher priority first, then earlier submission.
#[derive(Debug, PartialEq, Eq)]
struct Waiting {
    priority: i32,
    seq: u64,
    id: JobId,
}

impl Ord for Waiting {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    waiting: BinaryHeap<Waiting>,
    running: HashSet<JobId>,
    next_seq: u64,
}

/// A job handed to the scheduler by [`JobQueue::next_ready`].
///
/// The job is still `queued` until the scheduler calls [`JobQueue::start`].
#[derive(Debug, Clone)]
pub struct DispatchedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub params: Value,
    pub priority: i32,
}

/// Result lookup for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// The job completed with this payload.
    Ready(Value),
    /// The job has no result (yet); carries its current status.
    Unavailable(JobStatus),
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
    max_concurrent: usize,
}

impl JobQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Enqueue a new job and return its id. Never waits for capacity.
    pub fn submit(&self, kind: JobKind, params: Value, priority: i32) -> JobId {
        let id = JobId::new();
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(Waiting {
                priority,
                seq,
                id: id.clone(),
            });
            state.jobs.insert(
                id.clone(),
                Job {
                    id: id.clone(),
                    kind,
                    params,
                    status: JobStatus::Queued,
                    gpu_id: None,
                    priority,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    result: None,
                    error: None,
                },
            );
        }
        self.available.notify_one();
        sys_info!(
            "[QUEUE] Job {} submitted: {} (priority: {})",
            id,
            kind,
            priority
        );
        id
    }

    /// Pop the highest-priority queued job, if any. Does not wait.
    pub fn try_next_ready(&self) -> Option<DispatchedJob> {
        let mut state = self.lock();
        while let Some(entry) = state.waiting.pop() {
            match state.jobs.get(&entry.id) {
                Some(job) if job.status == JobStatus::Queued => {
                    return Some(DispatchedJob {
                        id: job.id.clone(),
                        kind: job.kind,
                        params: job.params.clone(),
                        priority: job.priority,
                    });
                }
                _ => sys_debug!("[QUEUE] Skipping stale entry for job {}", entry.id),
            }
        }
        None
    }

    /// Like [`try_next_ready`](Self::try_next_ready), but waits up to `wait`
    /// for a submission when the queue is empty.
    pub async fn next_ready(&self, wait: Duration) -> Option<DispatchedJob> {
        if let Some(job) = self.try_next_ready() {
            return Some(job);
        }
        if tokio::time::timeout(wait, self.available.notified())
            .await
            .is_err()
        {
            return None;
        }
        self.try_next_ready()
    }

    pub fn can_accept_more(&self) -> bool {
        self.lock().running.len() < self.max_concurrent
    }

    pub fn start(&self, id: &JobId, device: DeviceId) -> bool {
        let mut state = self.lock();
        let QueueState { jobs, running, .. } = &mut *state;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.gpu_id = Some(device);
                job.started_at = Some(Utc::now());
                running.insert(id.clone());
                sys_info!("[QUEUE] Job {} started on GPU {}", id, device);
                true
            }
            Some(job) => {
                sys_debug!("[QUEUE] Ignoring start of job {} ({})", id, job.status);
                false
            }
            None => {
                sys_warn!("[QUEUE] Job {} not found", id);
                false
            }
        }
    }

    pub fn complete(&self, id: &JobId, result: Value) -> bool {
        self.finish_running(id, JobStatus::Completed, |job| job.result = Some(result))
    }

    pub fn fail(&self, id: &JobId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.finish_running(id, JobStatus::Failed, |job| job.error = Some(error))
    }

    fn finish_running<F>(&self, id: &JobId, target: JobStatus, record: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.lock();
        let QueueState { jobs, running, .. } = &mut *state;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = target;
                job.completed_at = Some(Utc::now());
                record(job);
                running.remove(id);
                match target {
                    JobStatus::Failed => sys_warn!(
                        "[QUEUE] Job {} failed: {}",
                        id,
                        job.error.as_deref().unwrap_or("unknown error")
                    ),
                    _ => sys_info!("[QUEUE] Job {} {}", id, target),
                }
                true
            }
            Some(job) => {
                sys_debug!(
                    "[QUEUE] Ignoring {} for job {} ({})",
                    target,
                    id,
                    job.status
                );
                false
            }
            None => {
                sys_warn!("[QUEUE] Job {} not found", id);
                false
            }
        }
    }

    /// Cancel a queued or running job. Running inference is not interrupted.
    pub fn cancel(&self, id: &JobId) -> bool {
        let mut state = self.lock();
        let QueueState { jobs, running, .. } = &mut *state;
        match jobs.get_mut(id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                running.remove(id);
                sys_info!("[QUEUE] Job {} cancelled", id);
                true
            }
            Some(job) => {
                sys_debug!("[QUEUE] Ignoring cancel of job {} ({})", id, job.status);
                false
            }
            None => {
                sys_warn!("[QUEUE] Job {} not found", id);
                false
            }
        }
    }

    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        let snapshot = self.lock().jobs.get(id).map(Job::snapshot);
        if snapshot.is_none() {
            sys_warn!("[QUEUE] Job {} not found", id);
        }
        snapshot
    }

    pub fn result(&self, id: &JobId) -> Option<JobResult> {
        let state = self.lock();
        let job = state.jobs.get(id)?;
        Some(match (&job.status, &job.result) {
            (JobStatus::Completed, Some(result)) => JobResult::Ready(result.clone()),
            (status, _) => JobResult::Unavailable(*status),
        })
    }

    pub fn queue_status(&self) -> QueueStatus {
        let state = self.lock();
        let mut status = QueueStatus {
            total_jobs: state.jobs.len(),
            max_concurrent: self.max_concurrent,
            ..Default::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => status.queued += 1,
                JobStatus::Running => status.running += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
                JobStatus::Cancelled => status.cancelled += 1,
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn submit(queue: &JobQueue, priority: i32) -> JobId {
        queue.submit(JobKind::TextToImage, json!({}), priority)
    }

    #[test]
    fn test_priority_order_is_stable() {
        let queue = JobQueue::new(4);
        let a = submit(&queue, 1);
        let b = submit(&queue, 5);
        let c = submit(&queue, 1);
        let d = submit(&queue, 3);

        let order: Vec<JobId> = std::iter::from_fn(|| queue.try_next_ready())
            .map(|job| job.id)
            .collect();
        assert_eq!(order, vec![b, d, a, c]);
    }

    #[test]
    fn test_submitted_job_is_queued() {
        let queue = JobQueue::new(2);
        let id = queue.submit(JobKind::Upscale, json!({"scale": 4}), 0);
        let snapshot = queue.status(&id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.kind, JobKind::Upscale);
        assert!(snapshot.gpu_id.is_none());
        assert!(snapshot.started_at.is_none());

        let dispatched = queue.try_next_ready().unwrap();
        assert_eq!(dispatched.params["scale"], 4);
    }

    #[test]
    fn test_run_to_completion() {
        let queue = JobQueue::new(2);
        let id = submit(&queue, 0);
        assert!(queue.start(&id, 1));

        let running = queue.status(&id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.gpu_id, Some(1));
        assert!(running.started_at.is_some());

        assert!(queue.complete(&id, json!({"images": ["a.png"]})));
        let done = queue.status(&id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(
            queue.result(&id),
            Some(JobResult::Ready(json!({"images": ["a.png"]})))
        );
    }

    #[test]
    fn test_complete_twice_is_a_noop() {
        let queue = JobQueue::new(1);
        let id = submit(&queue, 0);
        queue.start(&id, 0);
        assert!(queue.complete(&id, json!(1)));
        let first = queue.status(&id).unwrap();

        assert!(!queue.complete(&id, json!(2)));
        assert!(!queue.fail(&id, "late failure"));
        assert!(!queue.cancel(&id));
        assert_eq!(queue.status(&id).unwrap(), first);
        assert_eq!(queue.result(&id), Some(JobResult::Ready(json!(1))));
    }

    #[test]
    fn test_run_to_failure() {
        let queue = JobQueue::new(1);
        let id = submit(&queue, 0);
        queue.start(&id, 0);
        assert!(queue.fail(&id, "out of memory"));
        let snapshot = queue.status(&id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("out of memory"));
        assert_eq!(
            queue.result(&id),
            Some(JobResult::Unavailable(JobStatus::Failed))
        );
    }

    #[test]
    fn test_cancel_queued_job_is_never_dispatched() {
        let queue = JobQueue::new(1);
        let first = submit(&queue, 9);
        let second = submit(&queue, 0);
        assert!(queue.cancel(&first));
        assert_eq!(queue.status(&first).unwrap().status, JobStatus::Cancelled);
        assert_eq!(queue.try_next_ready().unwrap().id, second);
        assert!(queue.try_next_ready().is_none());
        assert!(!queue.start(&first, 0));
    }

    #[test]
    fn test_cancel_running_job_frees_a_slot() {
        let queue = JobQueue::new(1);
        let id = submit(&queue, 0);
        queue.start(&id, 0);
        assert!(!queue.can_accept_more());
        assert!(queue.cancel(&id));
        assert!(queue.can_accept_more());
        // A late completion from the still-running inference is ignored.
        assert!(!queue.complete(&id, json!({})));
        assert_eq!(queue.status(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_transitions_from_wrong_state_are_ignored() {
        let queue = JobQueue::new(1);
        let id = submit(&queue, 0);
        assert!(!queue.complete(&id, json!({})));
        assert!(!queue.fail(&id, "nope"));
        queue.start(&id, 0);
        assert!(!queue.start(&id, 1));
        assert_eq!(queue.status(&id).unwrap().gpu_id, Some(0));
    }

    #[test]
    fn test_unknown_job() {
        let queue = JobQueue::new(1);
        let missing = JobId::from("missing");
        assert!(queue.status(&missing).is_none());
        assert!(queue.result(&missing).is_none());
        assert!(!queue.cancel(&missing));
        assert!(!queue.start(&missing, 0));
    }

    #[test]
    fn test_queue_status_counts() {
        let queue = JobQueue::new(3);
        let running = submit(&queue, 0);
        let done = submit(&queue, 0);
        let failed = submit(&queue, 0);
        let cancelled = submit(&queue, 0);
        submit(&queue, 0);

        for id in [&running, &done, &failed] {
            queue.start(id, 0);
        }
        queue.complete(&done, json!({}));
        queue.fail(&failed, "boom");
        queue.cancel(&cancelled);

        assert_eq!(
            queue.queue_status(),
            QueueStatus {
                total_jobs: 5,
                queued: 1,
                running: 1,
                completed: 1,
                failed: 1,
                cancelled: 1,
                max_concurrent: 3,
            }
        );
    }

    #[test]
    fn test_concurrency_ceiling() {
        let queue = JobQueue::new(2);
        let ids: Vec<JobId> = (0..3).map(|_| submit(&queue, 0)).collect();
        assert!(queue.can_accept_more());
        queue.start(&ids[0], 0);
        assert!(queue.can_accept_more());
        queue.start(&ids[1], 0);
        assert!(!queue.can_accept_more());
        queue.complete(&ids[0], json!({}));
        assert!(queue.can_accept_more());
    }

    #[tokio::test]
    async fn test_next_ready_gives_up_after_bounded_wait() {
        let queue = JobQueue::new(1);
        let started = std::time::Instant::now();
        assert!(queue.next_ready(Duration::from_millis(20)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_next_ready_wakes_on_submit() {
        let queue = Arc::new(JobQueue::new(1));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_ready(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = submit(&queue, 0);
        let dispatched = waiter.await.unwrap().unwrap();
        assert_eq!(dispatched.id, id);
    }
}
