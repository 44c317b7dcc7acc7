use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use essay_grader::agents::{AiLikelihood, Invoke, ProviderFailure, ProviderReply, ProviderRequest};
use essay_grader::config::{CopyPolicy, GradingPolicy, RegressionPolicy};
use essay_grader::scoring::{Category, CategoryScoreSet, PartialScores};
use essay_grader::store::{
    AttemptStatus, AttemptSummary, GradeStore, GradingPath, GradingResult, StoreError, SubmissionRecord,
    SubmissionSource,
};
use essay_grader::{GradingOrchestrator, GradingOutcome, GradingWarning};

const QUESTION: &str = "Why should young people read every day?";

const ESSAY_ONE: &str = "Reading every day is important because it helps young people learn new words. \
    It also helps them understand other people and their feelings. I think schools should give students \
    more time to read books they enjoy.";

const ESSAY_TWO: &str = "Daily reading matters for young people for two reasons. First, every novel \
    quietly widens a reader's vocabulary, so new words arrive without a dictionary. Second, stepping into \
    a character's life teaches empathy that lasts beyond the final page. For these reasons, schools should \
    protect a quiet reading hour each day.";

const REVISION: &str = "Reading every day quietly builds vocabulary, patience and empathy in curious young minds.";

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    attempts: Mutex<Vec<SubmissionRecord>>,
    results: Mutex<HashMap<i64, GradingResult>>,
}

impl MemoryStore {
    fn add_attempt(&self, attempt_id: i64, essay: &str, hours_after_start: i64, status: AttemptStatus) {
        self.attempts.lock().unwrap().push(SubmissionRecord {
            attempt_id,
            user_id: 42,
            assignment_id: 7,
            question_text: QUESTION.to_string(),
            essay_text: essay.to_string(),
            submitted_at: at(hours_after_start),
            status,
        });
    }

    fn seed_result(&self, attempt_id: i64, scores: [u32; 5], revision: Option<&str>) {
        self.insert_result(self.result(attempt_id, scores, revision));
    }

    fn result(&self, attempt_id: i64, scores: [u32; 5], revision: Option<&str>) -> GradingResult {
        let scores = CategoryScoreSet::new(scores[0], scores[1], scores[2], scores[3], scores[4]).unwrap();
        GradingResult {
            attempt_id,
            submission_number: 1,
            path: GradingPath::FirstSubmission,
            scores,
            missing: Vec::new(),
            low_confidence: false,
            feedback: String::new(),
            display_feedback: String::new(),
            overall_comments: String::new(),
            revision_text: revision.map(str::to_string),
            ai_likelihood: AiLikelihood::Unknown,
            previous_attempt_id: None,
            previous_scores: None,
            comparison: None,
            similarity: None,
            warnings: Vec::new(),
            graded_at: at(0),
        }
    }

    fn insert_result(&self, result: GradingResult) {
        self.results.lock().unwrap().insert(result.attempt_id, result);
    }

    fn stored(&self, attempt_id: i64) -> Option<GradingResult> {
        self.results.lock().unwrap().get(&attempt_id).cloned()
    }
}

#[async_trait]
impl GradeStore for MemoryStore {
    async fn save_grading_result(&self, attempt_id: i64, result: &GradingResult) -> Result<(), StoreError> {
        self.results.lock().unwrap().insert(attempt_id, result.clone());
        Ok(())
    }

    async fn get_grading_result(&self, attempt_id: i64) -> Result<Option<GradingResult>, StoreError> {
        Ok(self.stored(attempt_id))
    }

    async fn get_previous_category_scores(&self, attempt_id: i64) -> Result<Option<PartialScores>, StoreError> {
        // Unresolved categories have no durable column value.
        Ok(self.stored(attempt_id).map(|r| {
            let mut partial = PartialScores::new();
            for category in Category::ALL {
                if !r.missing.contains(&category) {
                    partial.set(category, i64::from(r.scores.get(category)));
                }
            }
            partial
        }))
    }
}

#[async_trait]
impl SubmissionSource for MemoryStore {
    async fn get_submission(&self, attempt_id: i64) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.attempt_id == attempt_id)
            .cloned())
    }

    async fn get_attempt_history(
        &self,
        user_id: i64,
        assignment_id: i64,
    ) -> Result<Vec<AttemptSummary>, StoreError> {
        let mut history: Vec<AttemptSummary> = self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.user_id == user_id && a.assignment_id == assignment_id)
            .map(|a| AttemptSummary {
                attempt_id: a.attempt_id,
                submitted_at: a.submitted_at,
                status: a.status,
            })
            .collect();
        history.sort_by_key(|a| a.submitted_at);
        Ok(history)
    }
}

/// Answers each kind of prompt with a canned reply and records every request.
struct ScriptedModel {
    feedback: String,
    comparative: String,
    revision: Option<String>,
    grading_fails: bool,
    calls: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedModel {
    fn new(feedback: String, comparative: String) -> Self {
        Self {
            feedback,
            comparative,
            revision: Some(REVISION.to_string()),
            grading_fails: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn grading_calls(&self) -> Vec<ProviderRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.system.contains("expert essay grader"))
            .collect()
    }
}

#[async_trait]
impl Invoke for ScriptedModel {
    async fn invoke(
        &self,
        request: &ProviderRequest,
        _deadline: Option<tokio::time::Instant>,
    ) -> Result<ProviderReply, ProviderFailure> {
        self.calls.lock().unwrap().push(request.clone());

        let text = if request.system.contains("AI detection tool") {
            r#"```json
{"likelihood": 20}
```"#
                .to_string()
        } else if request.system.contains("editor") {
            self.revision.clone().ok_or(ProviderFailure::MalformedResponse)?
        } else if self.grading_fails {
            return Err(ProviderFailure::Timeout);
        } else if request.system.contains("reviewing the") {
            self.comparative.clone()
        } else {
            self.feedback.clone()
        };

        Ok(ProviderReply { text, attempts: 1 })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + ChronoDuration::hours(hours)
}

/// A reply in the shape the prompts ask for. `previous` switches the score
/// lines to "previous → new" pairs.
fn feedback_html(scores: [u32; 5], previous: Option<[u32; 5]>) -> String {
    let mut html = String::new();
    let mut block = serde_json::Map::new();

    for (i, category) in Category::ALL.into_iter().enumerate() {
        let max = category.max();
        html.push_str(&format!(
            "<h2 style=\"font-size:18px;\">{}. {} ({}%)</h2>\n",
            i + 1,
            category.title(),
            max
        ));
        match previous {
            Some(prev) => html.push_str(&format!(
                "<p><strong>Score (Previous → New):</strong> {}/{max} → {}/{max}</p>\n",
                prev[i], scores[i]
            )),
            None => html.push_str(&format!("<p><strong>Score:</strong> {}/{max}</p>\n", scores[i])),
        }
        html.push_str(
            "<ul>\n<li><strong>Strengths:</strong><ul><li>Clear position.</li></ul></li>\n\
             <li><strong>Areas for Improvement:</strong><ul><li>Add more evidence.</li></ul></li>\n</ul>\n",
        );
        block.insert(category.block_key().to_string(), serde_json::json!(scores[i]));
    }

    let total: u32 = scores.iter().sum();
    block.insert("final_score".to_string(), serde_json::json!(total));

    html.push_str("<h2 style=\"font-size:18px;\">Overall Comments</h2>\n");
    html.push_str("<div id=\"overall-comments\"><p>A solid effort with room to grow.</p></div>\n");
    html.push_str(&format!(
        "<h2 style=\"font-size:16px;\"><p><strong>Final Score: {}/100</strong></p></h2>\n",
        total
    ));
    html.push_str(&format!(
        "<!-- SCORES_JSON_START -->\n{}\n<!-- SCORES_JSON_END -->\n",
        serde_json::Value::Object(block)
    ));
    html
}

fn policy() -> GradingPolicy {
    GradingPolicy {
        budget: Duration::from_secs(30),
        ..GradingPolicy::default()
    }
}

fn orchestrator(model: &Arc<ScriptedModel>, store: &Arc<MemoryStore>, policy: GradingPolicy) -> GradingOrchestrator {
    GradingOrchestrator::new(model.clone(), store.clone(), store.clone(), policy)
}

fn failure_kind(outcome: GradingOutcome) -> String {
    match outcome {
        GradingOutcome::Failed { kind, .. } => kind,
        GradingOutcome::Graded(result) => panic!("expected a failure, got {:?}", result.path),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_submission_is_graded_and_stored() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    let model = Arc::new(ScriptedModel::new(feedback_html([18, 17, 14, 13, 8], None), String::new()));

    let result = orchestrator(&model, &store, policy()).run(1).await.unwrap();

    assert_eq!(result.path, GradingPath::FirstSubmission);
    assert_eq!(result.submission_number, 1);
    assert_eq!(result.final_score(), 70);
    assert!(!result.low_confidence);
    assert!(result.warnings.is_empty());
    assert_eq!(result.revision_text.as_deref(), Some(REVISION));
    assert_eq!(result.ai_likelihood, AiLikelihood::Percent(20));
    assert!(result.overall_comments.contains("solid effort"));

    assert!(result.feedback.contains("EXTRACT_CONTENT_IDEAS_START"));
    assert!(result.feedback.contains("SCORES_JSON_START"));
    assert!(!result.display_feedback.contains("SCORES_JSON_START"));
    assert!(result.display_feedback.contains("Final Score: 70/100"));

    assert_eq!(store.stored(1), Some(result));
    // Feedback, revision, detection.
    assert_eq!(model.calls().len(), 3);
}

#[tokio::test]
async fn disagreeing_final_claim_is_rewritten_to_the_sum() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    let reply = feedback_html([18, 17, 14, 13, 8], None)
        .replace("Final Score: 70/100", "Final Score: 75/100")
        .replace("\"final_score\":70", "\"final_score\":75");
    let model = Arc::new(ScriptedModel::new(reply, String::new()));

    let result = orchestrator(&model, &store, policy()).run(1).await.unwrap();

    assert_eq!(result.final_score(), 70);
    assert!(result.feedback.contains("Final Score: 70/100"));
    assert!(!result.feedback.contains("75/100"));
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, GradingWarning::InvariantViolation { detail } if detail.contains("75"))));
}

#[tokio::test]
async fn resubmission_is_graded_against_the_previous_round() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, ESSAY_TWO, 24, AttemptStatus::Finished);

    // The model misremembers the previous mechanics score (7 instead of 8).
    let comparative = feedback_html([20, 19, 15, 15, 9], Some([18, 17, 14, 13, 7]));
    let model = Arc::new(ScriptedModel::new(feedback_html([18, 17, 14, 13, 8], None), comparative));
    let orchestrator = orchestrator(&model, &store, policy());

    orchestrator.run(1).await.unwrap();
    let result = orchestrator.run(2).await.unwrap();

    assert_eq!(result.path, GradingPath::Comparative);
    assert_eq!(result.submission_number, 2);
    assert_eq!(result.previous_attempt_id, Some(1));
    assert_eq!(result.previous_scores.map(|s| s.total()), Some(70));
    assert_eq!(result.final_score(), 78);

    let comparison = result.comparison.clone().unwrap();
    assert_eq!(comparison.aggregate_delta, 8);
    assert!(!comparison.regressed());

    let similarity = result.similarity.unwrap();
    assert!(!similarity.is_copy);
    assert!(similarity.percent < 70.0);

    assert!(result.feedback.contains("Final Score (Previous → New): 70/100 → 78/100"));
    assert_eq!(
        result.warnings,
        vec![GradingWarning::PreviousScoreMismatch {
            category: Category::Mechanics,
            stored: 8,
            claimed: 7,
        }]
    );

    let grading = model.grading_calls();
    assert_eq!(grading.len(), 2);
    let prompt = &grading[1];
    assert!(prompt.system.contains("second submission"));
    assert!(prompt.system.contains("- Content and Ideas: 18/25"));
    assert!(prompt.user.contains(ESSAY_ONE));
    assert!(prompt.user.contains(ESSAY_TWO));
    assert!(prompt.user.contains("Add more evidence"));
}

#[tokio::test]
async fn missing_previous_columns_are_read_back_from_feedback() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, ESSAY_TWO, 24, AttemptStatus::Finished);

    // Creativity was never stored as a column; the feedback still carries 13.
    let mut previous = store.result(1, [15, 14, 12, 0, 8], None);
    previous.missing = vec![Category::Creativity];
    previous.feedback = feedback_html([15, 14, 12, 13, 8], None);
    store.insert_result(previous);

    let comparative = feedback_html([17, 15, 13, 14, 8], Some([15, 14, 12, 13, 8]));
    let model = Arc::new(ScriptedModel::new(String::new(), comparative));
    let orchestrator = orchestrator(&model, &store, policy());

    let result = orchestrator.run(2).await.unwrap();

    assert_eq!(result.path, GradingPath::Comparative);
    let previous_scores = result.previous_scores.unwrap();
    assert_eq!(previous_scores.get(Category::Creativity), 13);
    assert_eq!(previous_scores.get(Category::Content), 15);
    assert_eq!(previous_scores.total(), 62);
    assert!(!result
        .warnings
        .iter()
        .any(|w| matches!(w, GradingWarning::PreviousScoreMismatch { .. })));

    let grading = model.grading_calls();
    assert_eq!(grading.len(), 1);
    assert!(grading[0].system.contains("- Creativity and Originality: 13/20"));
    assert!(result.feedback.contains("Final Score (Previous → New): 62/100 → 67/100"));
}

#[tokio::test]
async fn copying_the_revision_scores_zero() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, REVISION, 24, AttemptStatus::Finished);
    store.seed_result(1, [15, 14, 12, 13, 8], Some(REVISION));
    let model = Arc::new(ScriptedModel::new(String::new(), String::new()));

    let result = orchestrator(&model, &store, policy()).run(2).await.unwrap();

    assert_eq!(result.path, GradingPath::CopyPenalty);
    assert_eq!(result.final_score(), 0);
    for category in Category::ALL {
        assert_eq!(result.scores.get(category), 0);
    }
    assert_eq!(result.previous_scores.map(|s| s.total()), Some(62));
    assert_eq!(result.comparison.as_ref().map(|c| c.aggregate_delta), Some(-62));

    let similarity = result.similarity.unwrap();
    assert!(similarity.is_copy);
    assert_eq!(similarity.percent, 100.0);

    assert!(result.feedback.contains("62/100 → 0/100"));
    assert!(result.feedback.contains("15/25 → 0/25"));
    assert!(result.overall_comments.contains("identified as a copy"));
    assert!(result.revision_text.is_none());
    assert!(result.warnings.is_empty());

    // Only AI detection reaches the model.
    assert!(model.grading_calls().is_empty());
    assert_eq!(model.calls().len(), 1);
    assert_eq!(store.stored(2).map(|r| r.final_score()), Some(0));
}

#[tokio::test]
async fn flag_policy_grades_copies_normally_with_a_warning() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, REVISION, 24, AttemptStatus::Finished);
    store.seed_result(1, [15, 14, 12, 13, 8], Some(REVISION));
    let comparative = feedback_html([16, 15, 13, 13, 8], Some([15, 14, 12, 13, 8]));
    let model = Arc::new(ScriptedModel::new(String::new(), comparative));

    let policy = GradingPolicy {
        copy_policy: CopyPolicy::Flag,
        ..policy()
    };
    let result = orchestrator(&model, &store, policy).run(2).await.unwrap();

    assert_eq!(result.path, GradingPath::Comparative);
    assert_eq!(result.final_score(), 65);
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, GradingWarning::CopyFlagged { percent } if *percent == 100.0)));
}

#[tokio::test]
async fn regression_is_advisory_by_default() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, ESSAY_TWO, 24, AttemptStatus::Finished);
    store.seed_result(1, [15, 14, 12, 13, 8], Some(REVISION));
    let comparative = feedback_html([14, 14, 12, 13, 8], Some([15, 14, 12, 13, 8]));
    let model = Arc::new(ScriptedModel::new(String::new(), comparative));

    let result = orchestrator(&model, &store, policy()).run(2).await.unwrap();

    // The model's grade stands; the drop is only reported.
    assert_eq!(result.final_score(), 61);
    assert!(result.warnings.contains(&GradingWarning::ScoreRegression {
        previous: 62,
        new: 61
    }));
}

#[tokio::test]
async fn strict_regression_fails_without_saving() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, ESSAY_TWO, 24, AttemptStatus::Finished);
    store.seed_result(1, [15, 14, 12, 13, 8], Some(REVISION));
    let comparative = feedback_html([14, 14, 12, 13, 8], Some([15, 14, 12, 13, 8]));
    let model = Arc::new(ScriptedModel::new(String::new(), comparative));

    let policy = GradingPolicy {
        regression_policy: RegressionPolicy::Strict,
        ..policy()
    };
    let outcome = orchestrator(&model, &store, policy).grade(2).await;

    assert_eq!(failure_kind(outcome), "score_regression");
    assert!(store.stored(2).is_none());
}

#[tokio::test]
async fn ungraded_predecessor_blocks_the_resubmission() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    store.add_attempt(2, ESSAY_TWO, 24, AttemptStatus::Finished);
    let model = Arc::new(ScriptedModel::new(String::new(), String::new()));

    let outcome = orchestrator(&model, &store, policy()).grade(2).await;

    match outcome {
        GradingOutcome::Failed { kind, message } => {
            assert_eq!(kind, "predecessor_not_graded");
            assert!(message.contains('1'));
        }
        GradingOutcome::Graded(_) => panic!("resubmission graded without a baseline"),
    }
    assert!(model.calls().is_empty());
    assert!(store.stored(2).is_none());
}

#[tokio::test]
async fn abandoned_attempts_do_not_count() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Abandoned);
    store.add_attempt(2, ESSAY_TWO, 24, AttemptStatus::Finished);
    let model = Arc::new(ScriptedModel::new(feedback_html([18, 17, 14, 13, 8], None), String::new()));

    let result = orchestrator(&model, &store, policy()).run(2).await.unwrap();

    assert_eq!(result.path, GradingPath::FirstSubmission);
    assert_eq!(result.submission_number, 1);
}

#[tokio::test]
async fn provider_failure_saves_nothing() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    let mut model = ScriptedModel::new(feedback_html([18, 17, 14, 13, 8], None), String::new());
    model.grading_fails = true;
    let model = Arc::new(model);

    let outcome = orchestrator(&model, &store, policy()).grade(1).await;

    assert_eq!(failure_kind(outcome), "provider_timeout");
    assert!(store.stored(1).is_none());
}

#[tokio::test]
async fn lost_revision_does_not_block_the_grade() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, ESSAY_ONE, 0, AttemptStatus::Finished);
    let mut model = ScriptedModel::new(feedback_html([18, 17, 14, 13, 8], None), String::new());
    model.revision = None;
    let model = Arc::new(model);

    let result = orchestrator(&model, &store, policy()).run(1).await.unwrap();

    assert_eq!(result.final_score(), 70);
    assert!(result.revision_text.is_none());
    assert!(store.stored(1).is_some());
}

#[tokio::test]
async fn short_essays_never_reach_the_model() {
    let store = Arc::new(MemoryStore::default());
    store.add_attempt(1, "Too short to grade.", 0, AttemptStatus::Finished);
    let model = Arc::new(ScriptedModel::new(String::new(), String::new()));

    let outcome = orchestrator(&model, &store, policy()).grade(1).await;

    assert_eq!(failure_kind(outcome), "essay_too_short");
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn unknown_attempt_is_reported() {
    let store = Arc::new(MemoryStore::default());
    let model = Arc::new(ScriptedModel::new(String::new(), String::new()));

    let outcome = orchestrator(&model, &store, policy()).grade(99).await;

    assert_eq!(failure_kind(outcome), "submission_not_found");
}
