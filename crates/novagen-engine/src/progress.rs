//! Progress broadcast: per-job subscriber sets and the reporter that feeds them.
//!
//! `publish` snapshots the subscriber list under the lock, delivers outside
//! it, then removes every connection that failed. Delivery is a synchronous
//! hand-off (for WebSockets, a push into the connection's outbound channel),
//! so a publish never waits on the network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use novagen_types::{sys_debug, sys_warn, JobId, ProgressEvent};

use crate::inference::StepSink;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh process-unique connection id.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// A live subscriber endpoint.
pub trait ProgressConnection: Send + Sync {
    fn id(&self) -> ConnectionId;
    fn deliver(&self, message: &str) -> Result<(), DeliveryError>;
}

/// Connection backed by an unbounded channel; the receiving half is drained
/// by whoever owns the socket.
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelConnection {
    pub fn open() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: next_connection_id(),
                tx,
            },
            rx,
        )
    }
}

impl ProgressConnection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(message.to_string())
            .map_err(|_| DeliveryError::Closed)
    }
}

type SubscriberMap = HashMap<JobId, BTreeMap<ConnectionId, Arc<dyn ProgressConnection>>>;

/// Subscriber sets keyed by job id.
///
/// An entry exists only while at least one connection is subscribed.
#[derive(Default)]
pub struct ProgressHub {
    subscribers: Mutex<SubscriberMap>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, job_id: &JobId, connection: Arc<dyn ProgressConnection>) {
        let connection_id = connection.id();
        let total = {
            let mut subscribers = self.lock();
            let set = subscribers.entry(job_id.clone()).or_default();
            set.insert(connection_id, connection);
            set.len()
        };
        sys_debug!(
            "[WS_PROGRESS] Connection {} subscribed to job {} ({} subscriber(s))",
            connection_id,
            job_id,
            total
        );
    }

    pub fn unsubscribe(&self, job_id: &JobId, connection_id: ConnectionId) {
        let mut subscribers = self.lock();
        let Some(set) = subscribers.get_mut(job_id) else {
            return;
        };
        if set.remove(&connection_id).is_some() {
            sys_debug!(
                "[WS_PROGRESS] Connection {} unsubscribed from job {}",
                connection_id,
                job_id
            );
        }
        if set.is_empty() {
            subscribers.remove(job_id);
        }
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.lock().get(job_id).map_or(0, BTreeMap::len)
    }

    pub fn has_subscribers(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    /// Deliver `event` to every subscriber of `job_id`; returns the number of
    /// successful deliveries. Failed connections are dropped afterwards.
    pub fn publish(&self, job_id: &JobId, event: &ProgressEvent) -> usize {
        let targets: Vec<Arc<dyn ProgressConnection>> = match self.lock().get(job_id) {
            Some(set) => set.values().cloned().collect(),
            None => return 0,
        };

        let message = event.to_message(job_id, Utc::now()).to_string();
        let mut delivered = 0;
        let mut broken = Vec::new();
        for connection in &targets {
            match connection.deliver(&message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    sys_warn!(
                        "[WS_PROGRESS] Dropping connection {} from job {}: {}",
                        connection.id(),
                        job_id,
                        e
                    );
                    broken.push(connection.id());
                }
            }
        }

        for connection_id in broken {
            self.unsubscribe(job_id, connection_id);
        }
        delivered
    }
}

/// Publishes the progress of one job. Owned by that job's supervisor, so all
/// events for a job come from a single producer in order.
#[derive(Clone)]
pub struct ProgressReporter {
    hub: Arc<ProgressHub>,
    job_id: JobId,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(hub: Arc<ProgressHub>, job_id: JobId) -> Self {
        Self {
            hub,
            job_id,
            started: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn step(&self, step: u32, total_steps: u32) {
        let event = ProgressEvent::step(step, total_steps, self.elapsed_secs());
        self.hub.publish(&self.job_id, &event);
    }

    pub fn stage(&self, stage: &str, message: &str) {
        self.hub
            .publish(&self.job_id, &ProgressEvent::stage(stage, message));
    }

    pub fn complete(&self, success: bool, message: &str, extra: Map<String, Value>) {
        let event = ProgressEvent::completion(success, message, self.elapsed_secs(), extra);
        self.hub.publish(&self.job_id, &event);
    }

    pub fn error(&self, message: &str) {
        self.hub.publish(&self.job_id, &ProgressEvent::error(message));
    }
}

impl StepSink for ProgressReporter {
    fn on_step(&self, step: u32, total_steps: u32) {
        sys_debug!(
            "[WS_PROGRESS] Job {} step {}/{}",
            self.job_id,
            step,
            total_steps
        );
        self.step(step, total_steps);
    }
}
