//! Progress event broadcasting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{Job, JobStage};

/// Emitted at every checkpoint of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub stage: JobStage,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn for_job(job: &Job, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            stage: job.stage,
            progress: job.progress,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out of progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobParams;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let broadcaster = JobProgressBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        let job = Job::new(JobParams::new("x", 100));
        broadcaster.send(JobProgressEvent::for_job(&job, "queued"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.stage, JobStage::Pending);
        assert_eq!(event.message, "queued");
    }

    #[test]
    fn test_send_without_subscribers_is_silent() {
        let broadcaster = JobProgressBroadcaster::default();
        let job = Job::new(JobParams::new("x", 100));
        broadcaster.send(JobProgressEvent::for_job(&job, "nobody listening"));
    }
}
