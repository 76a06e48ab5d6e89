use std::path::PathBuf;

use thiserror::Error;

use crate::job::InvalidTransition;
use crate::llm::CompletionError;
use crate::pipeline::PipelineError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum LongformError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Invalid job parameters: {0}")]
    InvalidParams(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {id} is {stage} and not running in this process")]
    NotRunning { id: String, stage: String },

    #[error("Job {id} cannot be retried from stage {stage}")]
    NotRetryable { id: String, stage: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, LongformError>;
