//! Boundary with the systems that own submissions and grades.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::AiLikelihood;
use crate::error::GradingWarning;
use crate::scoring::{Category, CategoryScoreSet, PartialScores, ScoreComparison};
use crate::similarity::SimilarityResult;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored result is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Finished,
    Abandoned,
    Overdue,
}

impl AttemptStatus {
    /// Only attempts in these states count towards the submission number.
    pub fn counts_toward_history(self) -> bool {
        matches!(self, AttemptStatus::InProgress | AttemptStatus::Finished)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Finished => "finished",
            AttemptStatus::Abandoned => "abandoned",
            AttemptStatus::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" | "inprogress" => Some(AttemptStatus::InProgress),
            "finished" => Some(AttemptStatus::Finished),
            "abandoned" => Some(AttemptStatus::Abandoned),
            "overdue" => Some(AttemptStatus::Overdue),
            _ => None,
        }
    }
}

/// One essay attempt as owned by the course system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub attempt_id: i64,
    pub user_id: i64,
    pub assignment_id: i64,
    pub question_text: String,
    pub essay_text: String,
    pub submitted_at: DateTime<Utc>,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_id: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: AttemptStatus,
}

/// Which branch of the resubmission flow produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingPath {
    FirstSubmission,
    Comparative,
    CopyPenalty,
}

impl GradingPath {
    pub fn as_str(self) -> &'static str {
        match self {
            GradingPath::FirstSubmission => "first_submission",
            GradingPath::Comparative => "comparative",
            GradingPath::CopyPenalty => "copy_penalty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub attempt_id: i64,
    pub submission_number: u32,
    pub path: GradingPath,
    pub scores: CategoryScoreSet,
    /// Categories no extraction layer resolved; they count as 0.
    pub missing: Vec<Category>,
    pub low_confidence: bool,
    /// Stored feedback, annotated with strategic markers and still holding
    /// the JSON score block.
    pub feedback: String,
    /// `feedback` without the machine-readable block.
    pub display_feedback: String,
    pub overall_comments: String,
    /// Suggested rewrite; the reference text for the next round's copy check.
    pub revision_text: Option<String>,
    pub ai_likelihood: AiLikelihood,
    pub previous_attempt_id: Option<i64>,
    pub previous_scores: Option<CategoryScoreSet>,
    pub comparison: Option<ScoreComparison>,
    pub similarity: Option<SimilarityResult>,
    pub warnings: Vec<GradingWarning>,
    pub graded_at: DateTime<Utc>,
}

impl GradingResult {
    pub fn final_score(&self) -> u32 {
        self.scores.total()
    }
}

#[async_trait]
pub trait GradeStore: Send + Sync {
    /// Insert or replace the result for an attempt.
    async fn save_grading_result(&self, attempt_id: i64, result: &GradingResult) -> Result<(), StoreError>;

    async fn get_grading_result(&self, attempt_id: i64) -> Result<Option<GradingResult>, StoreError>;

    /// Per-category scores from durable fields only; `None` when the attempt
    /// has no stored grade.
    async fn get_previous_category_scores(&self, attempt_id: i64) -> Result<Option<PartialScores>, StoreError>;
}

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    async fn get_submission(&self, attempt_id: i64) -> Result<Option<SubmissionRecord>, StoreError>;

    /// Every attempt by `user_id` at `assignment_id`, oldest first.
    async fn get_attempt_history(
        &self,
        user_id: i64,
        assignment_id: i64,
    ) -> Result<Vec<AttemptSummary>, StoreError>;
}

/// Receives each finished result for report rendering and upload. Failures
/// here never affect the grade.
#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    async fn render(&self, result: &GradingResult, submission: &SubmissionRecord) -> Result<(), String>;
}
