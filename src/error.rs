use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::ProviderFailure;
use crate::scoring::Category;
use crate::store::StoreError;

/// Fatal outcomes of a grading pass. Each one halts the pass before anything
/// is persisted.
#[derive(Debug, Error)]
pub enum GradingError {
    #[error("provider call timed out")]
    ProviderTimeout,

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("provider returned an empty or unparseable reply")]
    MalformedResponse,

    #[error("previous submission {0} must be graded first")]
    PredecessorNotGraded(i64),

    #[error("cannot find the submission preceding attempt {0}")]
    PredecessorMissing(i64),

    #[error("new total {new} is below previous total {previous}")]
    ScoreRegression { previous: u32, new: u32 },

    #[error("essay is too short for grading ({words} words, need {required})")]
    EssayTooShort { words: usize, required: usize },

    #[error("submission {0} not found")]
    SubmissionNotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("prompt template error: {0}")]
    Template(#[from] tera::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GradingError {
    /// Stable identifier handed to callers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            GradingError::ProviderTimeout => "provider_timeout",
            GradingError::ProviderError(_) => "provider_error",
            GradingError::MalformedResponse => "malformed_response",
            GradingError::PredecessorNotGraded(_) => "predecessor_not_graded",
            GradingError::PredecessorMissing(_) => "predecessor_missing",
            GradingError::ScoreRegression { .. } => "score_regression",
            GradingError::EssayTooShort { .. } => "essay_too_short",
            GradingError::SubmissionNotFound(_) => "submission_not_found",
            GradingError::Store(_) => "store_error",
            GradingError::Template(_) => "template_error",
            GradingError::Internal(_) => "internal_error",
        }
    }
}

impl From<ProviderFailure> for GradingError {
    fn from(failure: ProviderFailure) -> Self {
        match failure {
            ProviderFailure::Timeout => GradingError::ProviderTimeout,
            ProviderFailure::ProviderError { message, .. } => GradingError::ProviderError(message),
            ProviderFailure::MalformedResponse => GradingError::MalformedResponse,
        }
    }
}

/// Conditions that lower confidence in a result without aborting the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradingWarning {
    /// Categories no extraction layer could resolve; they count as zero.
    ExtractionIncomplete { missing: Vec<Category> },
    /// The model's own total disagreed with the sum of its category scores,
    /// or a category value fell outside its range.
    InvariantViolation { detail: String },
    /// Ordinary grading produced a lower total than the previous round.
    ScoreRegression { previous: u32, new: u32 },
    /// Similarity crossed the threshold while the copy policy only flags.
    CopyFlagged { percent: f64 },
    /// The model restated a previous score that differs from the stored one.
    PreviousScoreMismatch {
        category: Category,
        stored: u32,
        claimed: i64,
    },
}
