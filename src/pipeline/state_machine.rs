//! Routing for one grading pass: first submission, ordinary comparative
//! grade, or copy penalty.

use std::fmt;
use tracing::{info, warn};

use crate::config::{CopyPolicy, GradingPolicy};
use crate::error::{GradingError, GradingWarning};
use crate::extract::FeedbackExtractor;
use crate::scoring::{CategoryScoreSet, ScoreReconciler};
use crate::similarity::{SimilarityDetector, SimilarityResult};
use crate::store::{GradeStore, GradingResult, SubmissionRecord, SubmissionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingState {
    FirstSubmission,
    ComparativeGrading,
    CopyPenalty,
    Done,
    Failed,
}

impl fmt::Display for GradingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GradingState::FirstSubmission => "first_submission",
            GradingState::ComparativeGrading => "comparative_grading",
            GradingState::CopyPenalty => "copy_penalty",
            GradingState::Done => "done",
            GradingState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything a resubmission is graded against.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub attempt_id: i64,
    pub scores: CategoryScoreSet,
    pub result: GradingResult,
    pub previous_essay: String,
    pub similarity: SimilarityResult,
}

#[derive(Debug, Clone)]
pub enum Decision {
    First {
        submission_number: u32,
    },
    Comparative {
        submission_number: u32,
        baseline: Box<Baseline>,
        warnings: Vec<GradingWarning>,
    },
    CopyPenalty {
        submission_number: u32,
        baseline: Box<Baseline>,
    },
}

impl Decision {
    pub fn state(&self) -> GradingState {
        match self {
            Decision::First { .. } => GradingState::FirstSubmission,
            Decision::Comparative { .. } => GradingState::ComparativeGrading,
            Decision::CopyPenalty { .. } => GradingState::CopyPenalty,
        }
    }

    pub fn submission_number(&self) -> u32 {
        match self {
            Decision::First { submission_number }
            | Decision::Comparative {
                submission_number, ..
            }
            | Decision::CopyPenalty {
                submission_number, ..
            } => *submission_number,
        }
    }
}

pub struct ResubmissionStateMachine<'a> {
    submissions: &'a dyn SubmissionSource,
    grades: &'a dyn GradeStore,
    detector: &'a SimilarityDetector,
    extractor: &'a FeedbackExtractor,
    policy: &'a GradingPolicy,
}

impl<'a> ResubmissionStateMachine<'a> {
    pub fn new(
        submissions: &'a dyn SubmissionSource,
        grades: &'a dyn GradeStore,
        detector: &'a SimilarityDetector,
        extractor: &'a FeedbackExtractor,
        policy: &'a GradingPolicy,
    ) -> Self {
        Self {
            submissions,
            grades,
            detector,
            extractor,
            policy,
        }
    }

    /// Places `record` in its student's history and picks the grading path.
    ///
    /// Only in-progress and finished attempts count. A resubmission whose
    /// predecessor has no stored grade is refused rather than graded blind.
    pub async fn route(&self, record: &SubmissionRecord) -> Result<Decision, GradingError> {
        let history = self
            .submissions
            .get_attempt_history(record.user_id, record.assignment_id)
            .await?;

        let counted: Vec<_> = history
            .iter()
            .filter(|a| a.status.counts_toward_history())
            .collect();

        let submission_number = counted
            .iter()
            .filter(|a| a.submitted_at <= record.submitted_at)
            .count()
            .max(1) as u32;

        info!(
            "Attempt {} is submission {} for user {} on assignment {}",
            record.attempt_id, submission_number, record.user_id, record.assignment_id
        );

        if submission_number == 1 {
            log_transition(record.attempt_id, GradingState::FirstSubmission);
            return Ok(Decision::First { submission_number });
        }

        let predecessor = counted
            .iter()
            .filter(|a| a.attempt_id != record.attempt_id && a.submitted_at < record.submitted_at)
            .max_by_key(|a| (a.submitted_at, a.attempt_id))
            .ok_or(GradingError::PredecessorMissing(record.attempt_id))?;
        let predecessor_id = predecessor.attempt_id;

        let previous_result = self
            .grades
            .get_grading_result(predecessor_id)
            .await?
            .ok_or_else(|| {
                warn!(
                    "Attempt {} follows ungraded attempt {}",
                    record.attempt_id, predecessor_id
                );
                GradingError::PredecessorNotGraded(predecessor_id)
            })?;

        let scores = self.previous_scores(predecessor_id, &previous_result).await?;

        let previous_essay = self
            .submissions
            .get_submission(predecessor_id)
            .await?
            .map(|s| s.essay_text)
            .ok_or(GradingError::PredecessorMissing(record.attempt_id))?;

        let similarity = match previous_result.revision_text.clone() {
            // Quadratic in essay length, so it runs off the async workers.
            Some(revision) => {
                let detector = *self.detector;
                let candidate = record.essay_text.clone();
                tokio::task::spawn_blocking(move || detector.compare(&candidate, &revision))
                    .await
                    .map_err(|e| GradingError::Internal(format!("similarity check failed: {}", e)))?
            }
            None => {
                info!("Attempt {} has no stored revision to compare against", predecessor_id);
                SimilarityResult {
                    percent: 0.0,
                    is_copy: false,
                }
            }
        };
        info!(
            "Attempt {} is {:.1}% similar to the revision of attempt {}",
            record.attempt_id, similarity.percent, predecessor_id
        );

        let baseline = Box::new(Baseline {
            attempt_id: predecessor_id,
            scores,
            result: previous_result,
            previous_essay,
            similarity,
        });

        if similarity.is_copy {
            match self.policy.copy_policy {
                CopyPolicy::Zero => {
                    warn!(
                        "Attempt {} copies the previous revision; applying copy penalty",
                        record.attempt_id
                    );
                    log_transition(record.attempt_id, GradingState::CopyPenalty);
                    return Ok(Decision::CopyPenalty {
                        submission_number,
                        baseline,
                    });
                }
                CopyPolicy::Flag => {
                    warn!(
                        "Attempt {} copies the previous revision; flagging only",
                        record.attempt_id
                    );
                    log_transition(record.attempt_id, GradingState::ComparativeGrading);
                    return Ok(Decision::Comparative {
                        submission_number,
                        baseline,
                        warnings: vec![GradingWarning::CopyFlagged {
                            percent: similarity.percent,
                        }],
                    });
                }
            }
        }

        log_transition(record.attempt_id, GradingState::ComparativeGrading);
        Ok(Decision::Comparative {
            submission_number,
            baseline,
            warnings: Vec::new(),
        })
    }

    /// Durable per-category fields first; categories they lack are recovered
    /// from the stored feedback text.
    async fn previous_scores(
        &self,
        attempt_id: i64,
        result: &GradingResult,
    ) -> Result<CategoryScoreSet, GradingError> {
        let mut partial = self
            .grades
            .get_previous_category_scores(attempt_id)
            .await?
            .unwrap_or_default();

        if !partial.is_complete() {
            warn!(
                "Stored scores for attempt {} lack {:?}; reading them from feedback",
                attempt_id,
                partial.missing()
            );
            let recovered = self.extractor.extract(&result.feedback);
            partial.fill_from(&recovered.scores);
        }

        Ok(ScoreReconciler::reconcile(&partial, None).scores)
    }
}

pub fn log_transition(attempt_id: i64, to: GradingState) {
    info!("Attempt {} -> {}", attempt_id, to);
}
