//! Job record, stage machine and progress bands.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enhance::Enhancements;
use crate::keywords::KeywordSpec;
use crate::planner::{Outline, PlanEstimates};
use crate::verify::QualityCheck;

/// Stage of the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Planning,
    Writing,
    Verifying,
    Rewriting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Planning => "planning",
            JobStage::Writing => "writing",
            JobStage::Verifying => "verifying",
            JobStage::Rewriting => "rewriting",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
            JobStage::Cancelled => "cancelled",
        }
    }

    /// No further work will happen without an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStage::Completed | JobStage::Failed | JobStage::Cancelled
        )
    }

    /// A stage in which work is being done.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStage::Planning | JobStage::Writing | JobStage::Verifying | JobStage::Rewriting
        )
    }

    pub fn can_transition_to(&self, next: JobStage) -> bool {
        use JobStage::*;
        if *self == next {
            return self.is_active();
        }
        match (self, next) {
            (Completed, _) => false,
            (Failed | Cancelled, Planning | Writing | Verifying) => true,
            (Failed | Cancelled, _) => false,
            (_, Failed | Cancelled) => true,
            (Pending, Planning)
            | (Planning, Writing)
            | (Writing, Verifying)
            | (Verifying, Rewriting | Completed)
            | (Rewriting, Verifying) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => JobStage::Pending,
            "planning" => JobStage::Planning,
            "writing" => JobStage::Writing,
            "verifying" => JobStage::Verifying,
            "rewriting" => JobStage::Rewriting,
            "completed" => JobStage::Completed,
            "failed" => JobStage::Failed,
            "cancelled" => JobStage::Cancelled,
            other => return Err(format!("unknown job stage '{}'", other)),
        })
    }
}

/// Progress percentage as a function of stage and sub-progress.
pub mod progress {
    pub const PLANNING: u8 = 2;
    pub const WRITING_START: u8 = 10;
    pub const WRITING_END: u8 = 80;
    pub const VERIFY_END: u8 = 99;
    pub const COMPLETED: u8 = 100;

    /// Writing band, proportional to finished sections.
    pub fn writing(done: usize, total: usize) -> u8 {
        if total == 0 {
            return WRITING_START;
        }
        let span = (WRITING_END - WRITING_START) as usize;
        WRITING_START + (span * done.min(total) / total) as u8
    }

    /// Verification band, proportional to rewrite attempts spent.
    pub fn verifying(attempts: u32, cap: u32) -> u8 {
        let span = (VERIFY_END - WRITING_END) as u32;
        WRITING_END + (span * attempts.min(cap) / (cap + 1)) as u8
    }
}

/// Caller-supplied description of the document to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub theme: String,
    pub target_word_count: u32,
    #[serde(default)]
    pub keywords: Vec<KeywordSpec>,
    /// Owner of the reference corpus used for the style profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Author persona label, e.g. "a nurse with ten years of experience".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    /// Call-to-action the article should lead towards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    #[serde(default)]
    pub auto_enhance: bool,
}

impl JobParams {
    pub fn new(theme: impl Into<String>, target_word_count: u32) -> Self {
        Self {
            theme: theme.into(),
            target_word_count,
            keywords: Vec::new(),
            user_id: None,
            persona: None,
            remarks: None,
            offer: None,
            auto_enhance: false,
        }
    }

    pub fn keyword(mut self, keyword: impl Into<String>, target: u32) -> Self {
        self.keywords.push(KeywordSpec::new(keyword, target));
        self
    }
}

/// How the job ended up, as shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobOutcome {
    Queued,
    Running,
    Succeeded,
    SucceededWithIssues,
    Failed { message: String },
    Cancelled,
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub params: JobParams,
    pub stage: JobStage,
    pub progress: u8,
    pub outline: Option<Outline>,
    pub estimates: Option<PlanEstimates>,
    /// Finished sections in outline order; the document prefix on resume.
    #[serde(default)]
    pub sections: Vec<String>,
    pub document: Option<String>,
    #[serde(default)]
    pub keyword_counts: BTreeMap<String, u32>,
    pub quality_check: Option<QualityCheck>,
    #[serde(default)]
    pub rewrite_attempts: u32,
    pub enhancements: Option<Enhancements>,
    pub error: Option<String>,
    pub failed_stage: Option<JobStage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned when a stage change is not allowed by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid stage transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStage,
    pub to: JobStage,
}

impl Job {
    pub fn new(params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            stage: JobStage::Pending,
            progress: 0,
            outline: None,
            estimates: None,
            sections: Vec::new(),
            document: None,
            keyword_counts: BTreeMap::new(),
            quality_check: None,
            rewrite_attempts: 0,
            enhancements: None,
            error: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `stage`; progress never goes backwards.
    pub fn advance(&mut self, stage: JobStage, progress: u8) -> Result<(), InvalidTransition> {
        if !self.stage.can_transition_to(stage) {
            return Err(InvalidTransition {
                from: self.stage,
                to: stage,
            });
        }
        self.stage = stage;
        self.progress = self.progress.max(progress.min(progress::COMPLETED));
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.failed_stage = Some(self.stage);
        self.error = Some(message.into());
        self.stage = JobStage::Failed;
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        self.advance(JobStage::Cancelled, self.progress)
    }

    /// First stage with work left, derived from what has been persisted.
    pub fn resume_stage(&self) -> JobStage {
        match self.outline {
            None => JobStage::Planning,
            Some(ref outline) if self.sections.len() < outline.sections.len() => JobStage::Writing,
            Some(_) => JobStage::Verifying,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        match self.stage {
            JobStage::Pending => JobOutcome::Queued,
            JobStage::Completed => match self.quality_check {
                Some(ref check) if !check.passed => JobOutcome::SucceededWithIssues,
                _ => JobOutcome::Succeeded,
            },
            JobStage::Failed => JobOutcome::Failed {
                message: self.error.clone().unwrap_or_default(),
            },
            JobStage::Cancelled => JobOutcome::Cancelled,
            _ => JobOutcome::Running,
        }
    }

    pub fn status(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            stage: self.stage,
            progress: self.progress,
            outcome: self.outcome(),
            partial_document: self.document.clone(),
            quality_check: self.quality_check.clone(),
            error_message: self.error.clone(),
            failed_stage: self.failed_stage,
            updated_at: self.updated_at,
        }
    }
}

/// Snapshot returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub stage: JobStage,
    pub progress: u8,
    pub outcome: JobOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_check: Option<QualityCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<JobStage>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::parse_structure;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [
            JobStage::Pending,
            JobStage::Planning,
            JobStage::Writing,
            JobStage::Verifying,
            JobStage::Rewriting,
            JobStage::Completed,
            JobStage::Failed,
            JobStage::Cancelled,
        ] {
            assert_eq!(stage.as_str().parse::<JobStage>().unwrap(), stage);
        }
        assert!("bogus".parse::<JobStage>().is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        use JobStage::*;
        assert!(Pending.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Writing));
        assert!(Writing.can_transition_to(Writing));
        assert!(Writing.can_transition_to(Verifying));
        assert!(Verifying.can_transition_to(Rewriting));
        assert!(Rewriting.can_transition_to(Verifying));
        assert!(Verifying.can_transition_to(Completed));
    }

    #[test]
    fn test_illegal_transitions() {
        use JobStage::*;
        assert!(!Pending.can_transition_to(Writing));
        assert!(!Planning.can_transition_to(Verifying));
        assert!(!Writing.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Planning));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_cancel_and_fail_reachable_from_non_terminal() {
        use JobStage::*;
        for stage in [Pending, Planning, Writing, Verifying, Rewriting] {
            assert!(stage.can_transition_to(Cancelled));
            assert!(stage.can_transition_to(Failed));
        }
        assert!(Failed.can_transition_to(Writing));
        assert!(Cancelled.can_transition_to(Planning));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = Job::new(JobParams::new("x", 100));
        job.advance(JobStage::Planning, 20).unwrap();
        job.advance(JobStage::Writing, 10).unwrap();
        assert_eq!(job.progress, 20);
        assert!(job.advance(JobStage::Completed, 100).is_err());
    }

    #[test]
    fn test_progress_bands() {
        assert_eq!(progress::writing(0, 5), 10);
        assert_eq!(progress::writing(3, 5), 52);
        assert_eq!(progress::writing(5, 5), 80);
        assert_eq!(progress::verifying(0, 3), 80);
        assert!(progress::verifying(3, 3) < progress::VERIFY_END);
        assert!(progress::verifying(2, 3) > progress::verifying(1, 3));
    }

    #[test]
    fn test_resume_stage_from_persisted_data() {
        let mut job = Job::new(JobParams::new("x", 100));
        assert_eq!(job.resume_stage(), JobStage::Planning);

        job.outline = Some(parse_structure("## A\n## B"));
        job.sections = vec!["## A\n\ntext".into()];
        assert_eq!(job.resume_stage(), JobStage::Writing);

        job.sections.push("## B\n\ntext".into());
        assert_eq!(job.resume_stage(), JobStage::Verifying);
    }

    #[test]
    fn test_fail_records_stage() {
        let mut job = Job::new(JobParams::new("x", 100));
        job.advance(JobStage::Planning, 2).unwrap();
        job.fail("boom");
        assert_eq!(job.stage, JobStage::Failed);
        assert_eq!(job.failed_stage, Some(JobStage::Planning));
        assert_eq!(
            job.outcome(),
            JobOutcome::Failed {
                message: "boom".into()
            }
        );
    }
}
