use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::RetryPolicy;
use crate::planner::HeadingDensity;
use crate::verify::Tolerance;
use crate::writer::WriterSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub corpus_directory: Option<String>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            corpus_directory: None,
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            style: StyleConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get().clamp(1, 8)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub context_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 180,
            context_timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub word_tolerance: f32,
    pub section_tolerance: u32,
    pub max_rewrite_attempts: u32,
    pub planning_attempts: u32,
    pub section_attempts: u32,
    pub trailing_context_chars: usize,
    pub single_call_max_words: u32,
    pub section_ceiling_ratio: f32,
    pub tokens_per_word: f32,
    pub heading_density: HeadingDensity,
    pub default_keyword_target: u32,
    pub field_ceiling_chars: usize,
    /// Marker in generated text replaced by the first keyword.
    pub conclusion_placeholder: Option<String>,
    /// How many keywords to fetch external context for.
    pub context_keywords: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            word_tolerance: 0.10,
            section_tolerance: 2,
            max_rewrite_attempts: 3,
            planning_attempts: 3,
            section_attempts: 3,
            trailing_context_chars: 1000,
            single_call_max_words: 2500,
            section_ceiling_ratio: 1.2,
            tokens_per_word: 2.0,
            heading_density: HeadingDensity::default(),
            default_keyword_target: 5,
            field_ceiling_chars: 60_000,
            conclusion_placeholder: Some("{{CONCLUSION_KEYWORD}}".to_string()),
            context_keywords: 3,
        }
    }
}

impl PipelineConfig {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            word_ratio: self.word_tolerance,
            sections: self.section_tolerance,
        }
    }

    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            trailing_context_chars: self.trailing_context_chars,
            single_call_max_words: self.single_call_max_words,
            ceiling_ratio: self.section_ceiling_ratio,
            tokens_per_word: self.tokens_per_word,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleConfig {
    pub corpus_cap_chars: usize,
    pub cache_ttl_secs: u64,
    /// Fail the job when no style profile can be built.
    pub require_profile: bool,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            corpus_cap_chars: crate::style::DEFAULT_CORPUS_CAP_CHARS,
            cache_ttl_secs: 600,
            require_profile: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub database_path: Option<String>,
}

impl StoreConfig {
    /// Configured path, or the platform default.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.database_path {
            Some(ref path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}
