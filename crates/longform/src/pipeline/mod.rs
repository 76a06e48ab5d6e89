//! Job orchestration: runs one job through the stage machine.

pub mod cancel;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use cancel::CancelFlag;
pub use context::RunContext;
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter};
pub use runner::Pipeline;
