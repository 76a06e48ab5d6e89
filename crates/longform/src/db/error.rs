use std::path::PathBuf;

use thiserror::Error;

/// Failures of the job database, tagged with what was being attempted.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Cannot create job database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open job database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Job database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// Written by a newer build; opening it would risk clobbering columns
    /// this build does not know about.
    #[error("Job database is at schema v{found}, this build supports up to v{supported}")]
    NewerSchema { found: u32, supported: u32 },
}
