use thiserror::Error;

use crate::job::InvalidTransition;
use crate::planner::PlanningError;
use crate::store::StoreError;
use crate::style::StyleError;
use crate::writer::SectionGenerationError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Style profile unavailable: {0}")]
    Style(#[from] StyleError),

    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Section(#[from] SectionGenerationError),

    #[error("Checkpoint failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Job was cancelled")]
    Cancelled,
}
