//! Isolated service environment for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use longform::{Config, ContentService, JobStore, SqliteJobStore};

use super::ScriptedCompletion;

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub corpus_dir: PathBuf,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("jobs.db");
        let corpus_dir = temp_dir.path().join("corpus");
        std::fs::create_dir_all(&corpus_dir).expect("Failed to create corpus directory");

        let mut config = Config::default();
        config.max_concurrent_jobs = 2;
        config.retry.max_attempts = 2;
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 2;
        config.corpus_directory = Some(corpus_dir.display().to_string());
        config.store.database_path = Some(db_path.display().to_string());

        Self {
            temp_dir,
            db_path,
            corpus_dir,
            config,
        }
    }

    /// A fresh store handle on the harness database.
    pub fn store(&self) -> Arc<SqliteJobStore> {
        Arc::new(SqliteJobStore::open(&self.db_path).expect("Failed to open job store"))
    }

    pub fn service(&self, llm: &Arc<ScriptedCompletion>) -> ContentService {
        self.service_with_store(llm, self.store())
    }

    pub fn service_with_store(
        &self,
        llm: &Arc<ScriptedCompletion>,
        store: Arc<dyn JobStore>,
    ) -> ContentService {
        ContentService::builder(self.config.clone(), llm.clone(), store)
            .corpus(Arc::new(longform::DirectoryCorpus::new(&self.corpus_dir)))
            .build()
    }

    /// Writes a reference text for `user_id`.
    pub fn add_corpus_file(&self, user_id: &str, name: &str, text: &str) {
        let dir = self.corpus_dir.join(user_id);
        std::fs::create_dir_all(&dir).expect("Failed to create user corpus directory");
        std::fs::write(dir.join(name), text).expect("Failed to write corpus file");
    }
}
