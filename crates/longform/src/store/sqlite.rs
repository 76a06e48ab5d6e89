use std::path::Path;

use chrono::{DateTime, Utc};

use super::{JobStore, StoreError};
use crate::db::job_repo::{self, EventRow, JobFilter, JobRow};
use crate::db::Database;
use crate::events::JobProgressEvent;
use crate::job::{Job, JobStage};

/// [`JobStore`] backed by the SQLite job database.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", value, e),
        })
}

fn parse_stage(id: &str, value: &str) -> Result<JobStage, StoreError> {
    value.parse().map_err(|reason| {
        log::warn!("Unknown stage '{}' on job {}", value, id);
        StoreError::Corrupt {
            id: id.to_string(),
            reason,
        }
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn opt_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value.as_ref().map(to_json).transpose()
}

fn from_opt_json<T: serde::de::DeserializeOwned>(
    value: &Option<String>,
) -> Result<Option<T>, StoreError> {
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(StoreError::from)
}

fn to_row(job: &Job) -> Result<JobRow, StoreError> {
    Ok(JobRow {
        id: job.id.clone(),
        theme: job.params.theme.clone(),
        stage: job.stage.as_str().to_string(),
        progress: job.progress,
        params: to_json(&job.params)?,
        outline: opt_json(&job.outline)?,
        estimates: opt_json(&job.estimates)?,
        sections: to_json(&job.sections)?,
        document: job.document.clone(),
        keyword_counts: to_json(&job.keyword_counts)?,
        quality_check: opt_json(&job.quality_check)?,
        rewrite_attempts: job.rewrite_attempts,
        enhancements: opt_json(&job.enhancements)?,
        error: job.error.clone(),
        failed_stage: job.failed_stage.map(|s| s.as_str().to_string()),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
    })
}

fn from_row(row: JobRow) -> Result<Job, StoreError> {
    let id = row.id.clone();
    Ok(Job {
        stage: parse_stage(&id, &row.stage)?,
        progress: row.progress,
        params: serde_json::from_str(&row.params)?,
        outline: from_opt_json(&row.outline)?,
        estimates: from_opt_json(&row.estimates)?,
        sections: serde_json::from_str(&row.sections)?,
        document: row.document,
        keyword_counts: serde_json::from_str(&row.keyword_counts)?,
        quality_check: from_opt_json(&row.quality_check)?,
        rewrite_attempts: row.rewrite_attempts,
        enhancements: from_opt_json(&row.enhancements)?,
        error: row.error,
        failed_stage: row
            .failed_stage
            .as_deref()
            .map(|s| parse_stage(&id, s))
            .transpose()?,
        created_at: parse_timestamp(&id, &row.created_at)?,
        updated_at: parse_timestamp(&id, &row.updated_at)?,
        id: row.id,
    })
}

impl JobStore for SqliteJobStore {
    fn load_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        job_repo::find_by_id(&self.db, id)?.map(from_row).transpose()
    }

    fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        job_repo::upsert(&self.db, &to_row(job)?)?;
        Ok(())
    }

    fn list_jobs(&self, stages: &[JobStage]) -> Result<Vec<Job>, StoreError> {
        let filter = JobFilter {
            stages: stages.iter().map(|s| s.as_str().to_string()).collect(),
            ..Default::default()
        };
        job_repo::query(&self.db, &filter)?
            .into_iter()
            .map(from_row)
            .collect()
    }

    fn record_event(&self, event: &JobProgressEvent) -> Result<(), StoreError> {
        job_repo::append_event(
            &self.db,
            &EventRow {
                job_id: event.job_id.clone(),
                stage: event.stage.as_str().to_string(),
                progress: event.progress,
                message: event.message.clone(),
                created_at: format_timestamp(event.timestamp),
            },
        )?;
        Ok(())
    }

    fn events(&self, job_id: &str) -> Result<Vec<JobProgressEvent>, StoreError> {
        job_repo::events_for(&self.db, job_id)?
            .into_iter()
            .map(|row| {
                Ok(JobProgressEvent {
                    stage: parse_stage(&row.job_id, &row.stage)?,
                    progress: row.progress,
                    message: row.message,
                    timestamp: parse_timestamp(&row.job_id, &row.created_at)?,
                    job_id: row.job_id,
                })
            })
            .collect()
    }
}
