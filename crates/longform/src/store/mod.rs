//! Job persistence behind the [`JobStore`] trait.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::events::JobProgressEvent;
use crate::job::{Job, JobStage};

pub mod sqlite;

pub use sqlite::SqliteJobStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to (de)serialize job field: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stored job '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Checkpoint storage for jobs.
pub trait JobStore: Send + Sync {
    fn load_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Jobs in any of `stages`, oldest first; all jobs when empty.
    fn list_jobs(&self, stages: &[JobStage]) -> Result<Vec<Job>, StoreError>;

    /// Appends a checkpoint to the job's history.
    fn record_event(&self, _event: &JobProgressEvent) -> Result<(), StoreError> {
        Ok(())
    }

    fn events(&self, _job_id: &str) -> Result<Vec<JobProgressEvent>, StoreError> {
        Ok(Vec::new())
    }
}

/// Process-local store, used in tests and when no database is configured.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    events: RwLock<Vec<JobProgressEvent>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Job store lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Job store lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl JobStore for MemoryJobStore {
    fn load_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(read(&self.jobs).get(id).cloned())
    }

    fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        write(&self.jobs).insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn list_jobs(&self, stages: &[JobStage]) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = read(&self.jobs)
            .values()
            .filter(|j| stages.is_empty() || stages.contains(&j.stage))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    fn record_event(&self, event: &JobProgressEvent) -> Result<(), StoreError> {
        write(&self.events).push(event.clone());
        Ok(())
    }

    fn events(&self, job_id: &str) -> Result<Vec<JobProgressEvent>, StoreError> {
        Ok(read(&self.events)
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobParams;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryJobStore::new();
        let mut job = Job::new(JobParams::new("x", 100));
        store.save_job(&job).unwrap();

        job.advance(JobStage::Planning, 2).unwrap();
        store.save_job(&job).unwrap();

        let loaded = store.load_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.stage, JobStage::Planning);
        assert!(store.load_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_filters_by_stage() {
        let store = MemoryJobStore::new();
        let pending = Job::new(JobParams::new("a", 100));
        let mut writing = Job::new(JobParams::new("b", 100));
        writing.advance(JobStage::Planning, 2).unwrap();
        writing.advance(JobStage::Writing, 10).unwrap();
        store.save_job(&pending).unwrap();
        store.save_job(&writing).unwrap();

        let active = store.list_jobs(&[JobStage::Writing]).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, writing.id);
        assert_eq!(store.list_jobs(&[]).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_store_events() {
        let store = MemoryJobStore::new();
        let job = Job::new(JobParams::new("x", 100));
        store
            .record_event(&JobProgressEvent::for_job(&job, "queued"))
            .unwrap();
        assert_eq!(store.events(&job.id).unwrap().len(), 1);
        assert!(store.events("other").unwrap().is_empty());
    }
}
