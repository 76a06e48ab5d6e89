//! External content sources: the reference corpus and competitor context.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{RetryPolicy, Retryable};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Source timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Timeout(_))
    }
}

/// Supplies the reference writing of a user for style analysis.
#[async_trait]
pub trait CorpusProvider: Send + Sync {
    /// Concatenated reference text; may be empty.
    async fn reference_corpus(&self, user_id: &str) -> Result<String, SourceError>;
}

/// Supplies optional competitor/background text for a keyword.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn external_context(&self, keyword: &str) -> Result<String, SourceError>;
}

/// A corpus provider with no data for anyone.
pub struct EmptyCorpus;

#[async_trait]
impl CorpusProvider for EmptyCorpus {
    async fn reference_corpus(&self, _user_id: &str) -> Result<String, SourceError> {
        Ok(String::new())
    }
}

/// A context provider that never has anything to add.
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn external_context(&self, _keyword: &str) -> Result<String, SourceError> {
        Ok(String::new())
    }
}

/// Reads `<root>/<user_id>/**/*.{txt,md}` in path order.
pub struct DirectoryCorpus {
    root: PathBuf,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_user_dir(dir: &Path) -> Result<String, SourceError> {
        if !dir.is_dir() {
            return Ok(String::new());
        }

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    log::warn!("Skipping unreadable corpus entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|ext| ext.to_str()),
                    Some("txt") | Some("md")
                )
            })
            .collect();
        files.sort();

        let mut parts = Vec::with_capacity(files.len());
        for path in files {
            let text = std::fs::read_to_string(&path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            parts.push(text);
        }
        Ok(parts.join("\n\n"))
    }
}

#[async_trait]
impl CorpusProvider for DirectoryCorpus {
    async fn reference_corpus(&self, user_id: &str) -> Result<String, SourceError> {
        if user_id.is_empty()
            || user_id.contains(['/', '\\'])
            || user_id == "."
            || user_id == ".."
        {
            return Err(SourceError::Unavailable(format!(
                "invalid user id '{}'",
                user_id
            )));
        }
        let dir = self.root.join(user_id);
        tokio::task::spawn_blocking(move || Self::read_user_dir(&dir))
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
    }
}

/// Gathers context for each keyword, retrying transient failures.
///
/// Failures are logged and skipped; the result is `None` when nothing
/// usable came back.
pub async fn gather_context(
    provider: &dyn ContextProvider,
    keywords: &[String],
    policy: &RetryPolicy,
    timeout: Duration,
) -> Option<String> {
    let mut blocks = Vec::new();
    for keyword in keywords {
        let result = policy
            .run("external_context", || async move {
                match tokio::time::timeout(timeout, provider.external_context(keyword)).await {
                    Ok(r) => r,
                    Err(_) => Err(SourceError::Timeout(timeout)),
                }
            })
            .await;

        match result {
            Ok(text) if !text.trim().is_empty() => {
                blocks.push(format!("### {}\n{}", keyword, text.trim()));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(keyword = %keyword, error = %e, "External context unavailable"),
        }
    }

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_directory_corpus_reads_sorted_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let user_dir = dir.path().join("alice");
        std::fs::create_dir_all(user_dir.join("nested")).unwrap();
        std::fs::write(user_dir.join("b.md"), "second").unwrap();
        std::fs::write(user_dir.join("a.txt"), "first").unwrap();
        std::fs::write(user_dir.join("nested/c.txt"), "third").unwrap();
        std::fs::write(user_dir.join("ignored.pdf"), "nope").unwrap();

        let corpus = DirectoryCorpus::new(dir.path());
        let text = corpus.reference_corpus("alice").await.unwrap();
        assert_eq!(text, "first\n\nsecond\n\nthird");
    }

    #[tokio::test]
    async fn test_directory_corpus_missing_user_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = DirectoryCorpus::new(dir.path());
        assert_eq!(corpus.reference_corpus("nobody").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_directory_corpus_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = DirectoryCorpus::new(dir.path());
        assert!(corpus.reference_corpus("../etc").await.is_err());
        assert!(corpus.reference_corpus("..").await.is_err());
    }

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContextProvider for Flaky {
        async fn external_context(&self, keyword: &str) -> Result<String, SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::Unavailable("503".into()))
            } else {
                Ok(format!("notes about {}", keyword))
            }
        }
    }

    #[tokio::test]
    async fn test_gather_context_retries_and_formats() {
        let provider = Flaky {
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let context = gather_context(
            &provider,
            &["seo".to_string()],
            &policy,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(context.as_deref(), Some("### seo\nnotes about seo"));
    }

    #[tokio::test]
    async fn test_gather_context_degrades_to_none() {
        let context = gather_context(
            &NoContext,
            &["x".to_string()],
            &RetryPolicy::none(),
            Duration::from_secs(1),
        )
        .await;
        assert!(context.is_none());
    }
}
