use std::sync::Arc;

use crate::job::Job;
use crate::style::StyleProfile;

use super::CancelFlag;

/// Per-run state threaded through the pipeline steps.
pub struct RunContext {
    pub job: Job,
    /// Keyword targets with defaults applied.
    pub targets: Vec<(String, u32)>,
    pub style: Option<Arc<StyleProfile>>,
    pub cancel: CancelFlag,
}

impl RunContext {
    pub fn new(job: Job, targets: Vec<(String, u32)>, cancel: CancelFlag) -> Self {
        Self {
            job,
            targets,
            style: None,
            cancel,
        }
    }

    /// First keyword, used to fill the concluding placeholder.
    pub fn primary_keyword(&self) -> Option<&str> {
        self.targets.first().map(|(k, _)| k.as_str())
    }
}
