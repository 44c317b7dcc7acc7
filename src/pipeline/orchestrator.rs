use chrono::Utc;
use std::collections::BTreeMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::locks::GradingLocks;
use super::penalty::penalty_feedback;
use super::state_machine::{log_transition, Baseline, Decision, GradingState, ResubmissionStateMachine};
use crate::agents::{AiLikelihood, Invoke};
use crate::config::GradingPolicy;
use crate::error::{GradingError, GradingWarning};
use crate::extract::{markup, FeedbackExtractor};
use crate::scoring::{Category, CategoryScoreSet, Reconciliation, ScoreReconciler};
use crate::similarity::SimilarityDetector;
use crate::store::{ArtifactRenderer, GradeStore, GradingPath, GradingResult, SubmissionRecord, SubmissionSource};
use crate::templates::{self, ComparativeInput};

/// What callers receive for one attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GradingOutcome {
    Graded(Box<GradingResult>),
    Failed { kind: String, message: String },
}

pub struct GradingOrchestrator {
    provider: Arc<dyn Invoke>,
    submissions: Arc<dyn SubmissionSource>,
    grades: Arc<dyn GradeStore>,
    renderer: Option<Arc<dyn ArtifactRenderer>>,
    policy: GradingPolicy,
    extractor: FeedbackExtractor,
    detector: SimilarityDetector,
    locks: GradingLocks,
}

/// Model output for one graded essay, before it is assembled into a result.
struct Graded {
    feedback: String,
    reconciliation: Reconciliation,
    overall_comments: String,
    claimed_previous: BTreeMap<Category, i64>,
}

impl GradingOrchestrator {
    pub fn new(
        provider: Arc<dyn Invoke>,
        submissions: Arc<dyn SubmissionSource>,
        grades: Arc<dyn GradeStore>,
        policy: GradingPolicy,
    ) -> Self {
        let detector = SimilarityDetector::new(policy.similarity_threshold);
        Self {
            provider,
            submissions,
            grades,
            renderer: None,
            policy,
            extractor: FeedbackExtractor::new(),
            detector,
            locks: GradingLocks::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ArtifactRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn policy(&self) -> &GradingPolicy {
        &self.policy
    }

    /// Grades one attempt and never panics or propagates: failures come back
    /// as a kind and a message.
    pub async fn grade(&self, attempt_id: i64) -> GradingOutcome {
        match self.run(attempt_id).await {
            Ok(result) => GradingOutcome::Graded(Box::new(result)),
            Err(e) => {
                error!("Grading attempt {} failed: {}", attempt_id, e);
                log_transition(attempt_id, GradingState::Failed);
                GradingOutcome::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Full pass for one attempt. Nothing is saved unless every required
    /// step succeeds.
    pub async fn run(&self, attempt_id: i64) -> Result<GradingResult, GradingError> {
        let record = self
            .submissions
            .get_submission(attempt_id)
            .await?
            .ok_or(GradingError::SubmissionNotFound(attempt_id))?;

        let words = record.essay_text.split_whitespace().count();
        if words < self.policy.min_words {
            return Err(GradingError::EssayTooShort {
                words,
                required: self.policy.min_words,
            });
        }

        let _guard = self.locks.acquire(record.user_id, record.assignment_id).await;
        let deadline = Instant::now() + self.policy.budget;

        let machine = ResubmissionStateMachine::new(
            self.submissions.as_ref(),
            self.grades.as_ref(),
            &self.detector,
            &self.extractor,
            &self.policy,
        );
        let decision = machine.route(&record).await?;
        let submission_number = decision.submission_number();

        let result = match decision {
            Decision::First { .. } => self.grade_first(&record, submission_number, deadline).await?,
            Decision::Comparative {
                baseline, warnings, ..
            } => {
                self.grade_comparative(&record, submission_number, *baseline, warnings, deadline)
                    .await?
            }
            Decision::CopyPenalty { baseline, .. } => {
                self.grade_copy_penalty(&record, submission_number, *baseline, deadline)
                    .await?
            }
        };

        self.grades.save_grading_result(attempt_id, &result).await?;
        info!(
            "Saved grade for attempt {}: {}/100 via {}",
            attempt_id,
            result.final_score(),
            result.path.as_str()
        );

        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.render(&result, &record).await {
                warn!("Rendering report for attempt {} failed: {}", attempt_id, e);
            }
        }

        log_transition(attempt_id, GradingState::Done);
        Ok(result)
    }

    async fn grade_first(
        &self,
        record: &SubmissionRecord,
        submission_number: u32,
        deadline: Instant,
    ) -> Result<GradingResult, GradingError> {
        let request = templates::feedback_prompt(&record.question_text, &record.essay_text)?;
        let reply = self.provider.invoke(&request, Some(deadline)).await?;
        let graded = self.read_feedback(&reply.text, None);

        let revision_text = self.revision(record, deadline).await;
        let ai_likelihood = self.ai_likelihood(record, deadline).await;

        Ok(GradingResult {
            attempt_id: record.attempt_id,
            submission_number,
            path: GradingPath::FirstSubmission,
            scores: graded.reconciliation.scores,
            missing: graded.reconciliation.missing.clone(),
            low_confidence: graded.reconciliation.low_confidence(),
            display_feedback: markup::strip_scores_block(&graded.feedback),
            feedback: graded.feedback,
            overall_comments: graded.overall_comments,
            revision_text,
            ai_likelihood,
            previous_attempt_id: None,
            previous_scores: None,
            comparison: None,
            similarity: None,
            warnings: graded.reconciliation.warnings,
            graded_at: Utc::now(),
        })
    }

    async fn grade_comparative(
        &self,
        record: &SubmissionRecord,
        submission_number: u32,
        baseline: Baseline,
        mut warnings: Vec<GradingWarning>,
        deadline: Instant,
    ) -> Result<GradingResult, GradingError> {
        let key_points = self.extractor.extract(&baseline.result.feedback).prose.key_points();
        let request = templates::comparative_prompt(&ComparativeInput {
            question: &record.question_text,
            essay: &record.essay_text,
            previous_essay: &baseline.previous_essay,
            previous_scores: &baseline.scores,
            key_points: &key_points,
            submission_number,
        })?;
        let reply = self.provider.invoke(&request, Some(deadline)).await?;
        let graded = self.read_feedback(&reply.text, Some(&baseline.scores));

        let comparison = ScoreReconciler::compare(&baseline.scores, &graded.reconciliation.scores);
        if let Some(warning) = ScoreReconciler::check_regression(&comparison, self.policy.regression_policy)? {
            warnings.push(warning);
        }

        for (&category, &claimed) in &graded.claimed_previous {
            let stored = baseline.scores.get(category);
            if claimed != i64::from(stored) {
                warn!(
                    "Model restated {} as {} but the stored score is {}",
                    category.key(),
                    claimed,
                    stored
                );
                warnings.push(GradingWarning::PreviousScoreMismatch {
                    category,
                    stored,
                    claimed,
                });
            }
        }

        let revision_text = self.revision(record, deadline).await;
        let ai_likelihood = self.ai_likelihood(record, deadline).await;

        let mut all_warnings = graded.reconciliation.warnings.clone();
        all_warnings.extend(warnings);

        Ok(GradingResult {
            attempt_id: record.attempt_id,
            submission_number,
            path: GradingPath::Comparative,
            scores: graded.reconciliation.scores,
            missing: graded.reconciliation.missing.clone(),
            low_confidence: graded.reconciliation.low_confidence(),
            display_feedback: markup::strip_scores_block(&graded.feedback),
            feedback: graded.feedback,
            overall_comments: graded.overall_comments,
            revision_text,
            ai_likelihood,
            previous_attempt_id: Some(baseline.attempt_id),
            previous_scores: Some(baseline.scores),
            comparison: Some(comparison),
            similarity: Some(baseline.similarity),
            warnings: all_warnings,
            graded_at: Utc::now(),
        })
    }

    /// No model grade is requested: the scores are zero and the feedback is
    /// fixed. Only the AI likelihood still goes to the provider.
    async fn grade_copy_penalty(
        &self,
        record: &SubmissionRecord,
        submission_number: u32,
        baseline: Baseline,
        deadline: Instant,
    ) -> Result<GradingResult, GradingError> {
        let scores = CategoryScoreSet::zero();
        let feedback = self
            .extractor
            .prepare(&penalty_feedback(&baseline.scores, submission_number));
        let overall_comments = self.extractor.extract(&feedback).prose.overall_comments;
        let comparison = ScoreReconciler::compare(&baseline.scores, &scores);
        let ai_likelihood = self.ai_likelihood(record, deadline).await;

        Ok(GradingResult {
            attempt_id: record.attempt_id,
            submission_number,
            path: GradingPath::CopyPenalty,
            scores,
            missing: Vec::new(),
            low_confidence: false,
            display_feedback: markup::strip_scores_block(&feedback),
            feedback,
            overall_comments,
            revision_text: None,
            ai_likelihood,
            previous_attempt_id: Some(baseline.attempt_id),
            previous_scores: Some(baseline.scores),
            comparison: Some(comparison),
            similarity: Some(baseline.similarity),
            warnings: Vec::new(),
            graded_at: Utc::now(),
        })
    }

    /// Cleans the reply, reconciles its scores and rewrites the final score
    /// line to the reconciled total.
    fn read_feedback(&self, raw: &str, previous: Option<&CategoryScoreSet>) -> Graded {
        let prepared = self.extractor.prepare(raw);
        let extracted = self.extractor.extract(&prepared);
        let reconciliation = ScoreReconciler::reconcile(&extracted.scores, extracted.claimed_final);
        let feedback = markup::stamp_final_score(
            &prepared,
            reconciliation.scores.total(),
            previous.map(CategoryScoreSet::total),
        );

        Graded {
            feedback,
            overall_comments: extracted.prose.overall_comments,
            claimed_previous: extracted.claimed_previous,
            reconciliation,
        }
    }

    /// Suggested rewrite for the student. Losing it costs the next round its
    /// copy check, not this round its grade.
    async fn revision(&self, record: &SubmissionRecord, deadline: Instant) -> Option<String> {
        let request = match templates::revision_prompt(&record.question_text, &record.essay_text, self.policy.level) {
            Ok(request) => request,
            Err(e) => {
                warn!("Revision prompt failed to render: {}", e);
                return None;
            }
        };
        match self.provider.invoke(&request, Some(deadline)).await {
            Ok(reply) => {
                let text = markup::decode_entities(&markup::strip_tags(&markup::strip_fences(&reply.text)));
                Some(text.trim().to_string()).filter(|text| !text.is_empty())
            }
            Err(e) => {
                warn!("Revision for attempt {} failed: {}", record.attempt_id, e);
                None
            }
        }
    }

    async fn ai_likelihood(&self, record: &SubmissionRecord, deadline: Instant) -> AiLikelihood {
        let request = match templates::ai_detection_prompt(&record.essay_text) {
            Ok(request) => request,
            Err(e) => {
                warn!("Detection prompt failed to render: {}", e);
                return AiLikelihood::Unknown;
            }
        };
        match self.provider.invoke(&request, Some(deadline)).await {
            Ok(reply) => AiLikelihood::parse(&reply.text),
            Err(e) => {
                warn!("AI detection for attempt {} failed: {}", record.attempt_id, e);
                AiLikelihood::Unknown
            }
        }
    }
}
