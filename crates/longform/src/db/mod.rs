//! The SQLite job database behind [`crate::store::SqliteJobStore`].
//!
//! One connection per handle, shared by clones. The file may be opened by
//! several processes at once (a CLI inspecting jobs while another recovers
//! them), so writers wait on SQLite's lock for up to [`BUSY_TIMEOUT`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const IN_MEMORY: &str = ":memory:";

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: Arc<Path>,
}

impl Database {
    /// Opens or creates the job database at `path`, creating missing parent
    /// directories and bringing the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| DatabaseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let db = Self::prepare(conn, path)?;
        log::info!("Job database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::Open {
            path: PathBuf::from(IN_MEMORY),
            source,
        })?;
        Self::prepare(conn, Path::new(IN_MEMORY))
    }

    fn prepare(conn: Connection, location: &Path) -> Result<Self, DatabaseError> {
        // Events cascade with their job.
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: Arc::from(location),
        })
    }

    /// File path, or `:memory:`.
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        f(&self.lock())
    }

    // A panicking caller cannot leave a half-applied statement behind, so the
    // connection stays usable after poisoning.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            log::warn!(
                "Job database lock for {} was poisoned, recovering",
                self.location.display()
            );
            poisoned.into_inner()
        })
    }
}

/// `<data dir>/longform/jobs.db`, e.g. `~/.local/share/longform/jobs.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("longform").join("jobs.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_db_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.location(), path.as_path());
    }

    #[test]
    fn test_refuses_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (99, 'future')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        drop(db);

        match Database::open(&path) {
            Err(DatabaseError::NewerSchema { found, supported }) => {
                assert_eq!(found, 99);
                assert_eq!(supported, migrations::latest_version());
            }
            other => panic!("expected NewerSchema, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_connection_survives_panicking_caller() {
        let db = Database::open_in_memory().unwrap();
        let clone = db.clone();
        let joined = std::thread::spawn(move || {
            let _ = clone.with_conn(|_| -> Result<(), DatabaseError> { panic!("boom") });
        })
        .join();
        assert!(joined.is_err());

        let count: u32 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM content_jobs", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
