//! Schema migrations, tracked in `_migrations` and applied in order.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_content_jobs_table",
        sql: "CREATE TABLE content_jobs (
                id TEXT PRIMARY KEY,
                theme TEXT NOT NULL,
                stage TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                params TEXT NOT NULL,
                outline TEXT,
                estimates TEXT,
                sections TEXT NOT NULL DEFAULT '[]',
                document TEXT,
                keyword_counts TEXT NOT NULL DEFAULT '{}',
                quality_check TEXT,
                rewrite_attempts INTEGER NOT NULL DEFAULT 0,
                enhancements TEXT,
                error TEXT,
                failed_stage TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_content_jobs_stage ON content_jobs(stage);
            CREATE INDEX idx_content_jobs_created_at ON content_jobs(created_at);",
    },
    Migration {
        version: 2,
        description: "create_job_events_table",
        sql: "CREATE TABLE job_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES content_jobs(id) ON DELETE CASCADE,
                stage TEXT NOT NULL,
                progress INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_job_events_job_id ON job_events(job_id);",
    },
];

/// Highest schema version this build knows how to use.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    let supported = latest_version();
    if current_version > supported {
        return Err(DatabaseError::NewerSchema {
            found: current_version,
            supported,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
