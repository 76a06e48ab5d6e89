pub mod config;
pub mod db;
pub mod enhance;
pub mod error;
pub mod events;
pub mod job;
pub mod keywords;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod service;
pub mod sources;
pub mod store;
pub mod style;
pub mod text;
pub mod verify;
pub mod writer;

pub use config::{load_config, Config};
pub use error::{ConfigError, LongformError, Result};
pub use events::{JobProgressBroadcaster, JobProgressEvent};
pub use job::{Job, JobOutcome, JobParams, JobStage, JobStatusView};
pub use keywords::KeywordSpec;
pub use llm::{OpenAiCompatible, TextCompletion};
pub use pipeline::{CancelFlag, Pipeline, PipelineError};
pub use service::{ContentService, ContentServiceBuilder};
pub use sources::{ContextProvider, CorpusProvider, DirectoryCorpus};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
pub use verify::{QualityCheck, QualityIssue};
