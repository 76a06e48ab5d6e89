//! CRUD for the `content_jobs` and `job_events` tables.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw `content_jobs` row; JSON columns are kept as text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub theme: String,
    pub stage: String,
    pub progress: u8,
    pub params: String,
    pub outline: Option<String>,
    pub estimates: Option<String>,
    pub sections: String,
    pub document: Option<String>,
    pub keyword_counts: String,
    pub quality_check: Option<String>,
    pub rewrite_attempts: u32,
    pub enhancements: Option<String>,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            theme: row.get("theme")?,
            stage: row.get("stage")?,
            progress: row.get("progress")?,
            params: row.get("params")?,
            outline: row.get("outline")?,
            estimates: row.get("estimates")?,
            sections: row.get("sections")?,
            document: row.get("document")?,
            keyword_counts: row.get("keyword_counts")?,
            quality_check: row.get("quality_check")?,
            rewrite_attempts: row.get("rewrite_attempts")?,
            enhancements: row.get("enhancements")?,
            error: row.get("error")?,
            failed_stage: row.get("failed_stage")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A stage checkpoint recorded for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub job_id: String,
    pub stage: String,
    pub progress: u8,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub stages: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts the job, or overwrites every column but `created_at`.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO content_jobs (id, theme, stage, progress, params, outline, estimates,
             sections, document, keyword_counts, quality_check, rewrite_attempts, enhancements,
             error, failed_stage, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET theme=excluded.theme, stage=excluded.stage,
             progress=excluded.progress, params=excluded.params, outline=excluded.outline,
             estimates=excluded.estimates, sections=excluded.sections,
             document=excluded.document, keyword_counts=excluded.keyword_counts,
             quality_check=excluded.quality_check, rewrite_attempts=excluded.rewrite_attempts,
             enhancements=excluded.enhancements, error=excluded.error,
             failed_stage=excluded.failed_stage, updated_at=excluded.updated_at",
            params![
                job.id,
                job.theme,
                job.stage,
                job.progress,
                job.params,
                job.outline,
                job.estimates,
                job.sections,
                job.document,
                job.keyword_counts,
                job.quality_check,
                job.rewrite_attempts,
                job.enhancements,
                job.error,
                job.failed_stage,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM content_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Query(e)),
            None => Ok(None),
        }
    })
}

/// Lists jobs oldest first, optionally restricted to some stages.
pub fn query(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut sql = String::from("SELECT * FROM content_jobs");
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if !filter.stages.is_empty() {
            let placeholders: Vec<String> = (1..=filter.stages.len())
                .map(|i| format!("?{}", i))
                .collect();
            sql.push_str(&format!(" WHERE stage IN ({})", placeholders.join(", ")));
            values.extend(filter.stages.iter().cloned().map(rusqlite::types::Value::Text));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            filter.limit.map(|l| l as i64).unwrap_or(-1),
            filter.offset.unwrap_or(0)
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn append_event(db: &Database, event: &EventRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_events (job_id, stage, progress, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.job_id,
                event.stage,
                event.progress,
                event.message,
                event.created_at
            ],
        )?;
        Ok(())
    })
}

pub fn events_for(db: &Database, job_id: &str) -> Result<Vec<EventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT job_id, stage, progress, message, created_at FROM job_events
             WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok(EventRow {
                    job_id: row.get(0)?,
                    stage: row.get(1)?,
                    progress: row.get(2)?,
                    message: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
