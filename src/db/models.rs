use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::scoring::{Category, PartialScores};
use crate::store::{AttemptStatus, AttemptSummary, SubmissionRecord};

#[derive(Debug, FromRow)]
pub struct AttemptRow {
    pub attempt_id: i64,
    pub user_id: i64,
    pub assignment_id: i64,
    pub question_text: String,
    pub essay_text: String,
    pub submitted_at: DateTime<Utc>,
    pub status: String,
}

impl AttemptRow {
    /// Unrecognised statuses are treated as abandoned so they never count
    /// towards a student's history.
    fn status(&self) -> AttemptStatus {
        AttemptStatus::parse(&self.status).unwrap_or(AttemptStatus::Abandoned)
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            attempt_id: self.attempt_id,
            submitted_at: self.submitted_at,
            status: self.status(),
        }
    }

    pub fn into_record(self) -> SubmissionRecord {
        let status = self.status();
        SubmissionRecord {
            attempt_id: self.attempt_id,
            user_id: self.user_id,
            assignment_id: self.assignment_id,
            question_text: self.question_text,
            essay_text: self.essay_text,
            submitted_at: self.submitted_at,
            status,
        }
    }
}

/// The per-category columns of `grading_results`.
#[derive(Debug, FromRow)]
pub struct CategoryColumns {
    pub content: Option<i32>,
    pub structure: Option<i32>,
    pub language: Option<i32>,
    pub creativity: Option<i32>,
    pub mechanics: Option<i32>,
}

impl CategoryColumns {
    pub fn to_partial(&self) -> PartialScores {
        let columns = [
            (Category::Content, self.content),
            (Category::Structure, self.structure),
            (Category::Language, self.language),
            (Category::Creativity, self.creativity),
            (Category::Mechanics, self.mechanics),
        ];
        let mut partial = PartialScores::new();
        for (category, value) in columns {
            if let Some(value) = value {
                partial.set(category, i64::from(value));
            }
        }
        partial
    }
}

#[derive(Debug, FromRow)]
pub struct ResultRow {
    pub result_json: serde_json::Value,
}
