use crate::events::{JobProgressBroadcaster, JobProgressEvent};

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &JobProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: &JobProgressEvent) {}
}

/// Forwards checkpoints to live subscribers.
pub struct BroadcastProgress {
    broadcaster: JobProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: &JobProgressEvent) {
        self.broadcaster.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobParams};

    #[tokio::test]
    async fn test_broadcast_progress_forwards_events() {
        let broadcaster = JobProgressBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        let reporter = BroadcastProgress::new(broadcaster);

        let job = Job::new(JobParams::new("theme", 100));
        reporter.report(&JobProgressEvent::for_job(&job, "queued"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.message, "queued");
    }
}
