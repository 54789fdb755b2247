use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::job::JobId;
use crate::round2;

/// A progress notification published for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    #[serde(rename = "step_complete")]
    Step {
        step: u32,
        total_steps: u32,
        progress: f64,
        elapsed: f64,
        eta: f64,
    },
    #[serde(rename = "stage_change")]
    Stage { stage: String, message: String },
    #[serde(rename = "generation_complete")]
    Completion {
        success: bool,
        message: String,
        elapsed: f64,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ProgressEvent {
    /// Build a step event from the raw step counter and elapsed seconds.
    ///
    /// `eta = elapsed / step * (total - step)` once `step > 0`, zero before.
    /// All derived figures are rounded to two decimals.
    pub fn step(step: u32, total_steps: u32, elapsed_secs: f64) -> Self {
        let progress = if total_steps > 0 {
            f64::from(step) / f64::from(total_steps) * 100.0
        } else {
            0.0
        };
        let eta = if step > 0 {
            let remaining = f64::from(total_steps.saturating_sub(step));
            elapsed_secs / f64::from(step) * remaining
        } else {
            0.0
        };

        ProgressEvent::Step {
            step,
            total_steps,
            progress: round2(progress),
            elapsed: round2(elapsed_secs),
            eta: round2(eta),
        }
    }

    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        ProgressEvent::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn completion(
        success: bool,
        message: impl Into<String>,
        elapsed_secs: f64,
        extra: Map<String, Value>,
    ) -> Self {
        ProgressEvent::Completion {
            success,
            message: message.into(),
            elapsed: round2(elapsed_secs),
            extra,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Step { .. } => "step_complete",
            ProgressEvent::Stage { .. } => "stage_change",
            ProgressEvent::Completion { .. } => "generation_complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// Wire message: the event fields plus `job_id` and `timestamp`.
    pub fn to_message(&self, job_id: &JobId, timestamp: DateTime<Utc>) -> Value {
        let mut message = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("event".to_string(), Value::from(self.name()));
                map
            }
        };
        message.insert("job_id".to_string(), Value::from(job_id.as_str()));
        message.insert(
            "timestamp".to_string(),
            Value::from(timestamp.to_rfc3339()),
        );
        Value::Object(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_progress_and_eta() {
        let event = ProgressEvent::step(10, 40, 5.0);
        assert_eq!(
            event,
            ProgressEvent::Step {
                step: 10,
                total_steps: 40,
                progress: 25.0,
                elapsed: 5.0,
                eta: 15.0,
            }
        );
    }

    #[test]
    fn test_step_zero_has_zero_eta() {
        match ProgressEvent::step(0, 30, 1.7) {
            ProgressEvent::Step { eta, progress, .. } => {
                assert_eq!(eta, 0.0);
                assert_eq!(progress, 0.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_step_figures_are_rounded() {
        match ProgressEvent::step(1, 3, 1.0) {
            ProgressEvent::Step { progress, eta, .. } => {
                assert_eq!(progress, 33.33);
                assert_eq!(eta, 2.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_zero_total_steps_does_not_divide_by_zero() {
        match ProgressEvent::step(0, 0, 0.0) {
            ProgressEvent::Step { progress, .. } => assert_eq!(progress, 0.0),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_message_carries_job_and_timestamp() {
        let job_id = JobId::from("abc");
        let message = ProgressEvent::stage("loading", "Loading pipeline")
            .to_message(&job_id, Utc::now());
        assert_eq!(message["event"], "stage_change");
        assert_eq!(message["job_id"], "abc");
        assert_eq!(message["stage"], "loading");
        assert!(message["timestamp"].is_string());
    }

    #[test]
    fn test_completion_flattens_extra_fields() {
        let mut extra = Map::new();
        extra.insert("images".to_string(), serde_json::json!(["a.png"]));
        let message = ProgressEvent::completion(true, "done", 12.3456, extra)
            .to_message(&JobId::from("j"), Utc::now());
        assert_eq!(message["event"], "generation_complete");
        assert_eq!(message["success"], true);
        assert_eq!(message["elapsed"], 12.35);
        assert_eq!(message["images"][0], "a.png");
    }
}
