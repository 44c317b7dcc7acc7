mod models;

pub use models::*;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::scoring::{Category, PartialScores};
use crate::store::{
    AttemptSummary, GradeStore, GradingResult, StoreError, SubmissionRecord, SubmissionSource,
};

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(Into::into)
}

/// Per-category column values in `Category::ALL` order. Categories the
/// extractor never resolved are stored as NULL, not as their zero default.
fn durable_scores(result: &GradingResult) -> [Option<i32>; 5] {
    Category::ALL.map(|category| {
        (!result.missing.contains(&category)).then(|| result.scores.get(category) as i32)
    })
}

/// Postgres-backed submission source and grade store.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradeStore for PgStore {
    async fn save_grading_result(&self, attempt_id: i64, result: &GradingResult) -> Result<(), StoreError> {
        let json = serde_json::to_value(result)?;
        let [content, structure, language, creativity, mechanics] = durable_scores(result);

        sqlx::query(
            r#"
            INSERT INTO grading_results (
                attempt_id, content, structure, language, creativity, mechanics,
                final_score, path, submission_number, similarity_percent,
                previous_attempt_id, result_json, graded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (attempt_id) DO UPDATE SET
                content = EXCLUDED.content,
                structure = EXCLUDED.structure,
                language = EXCLUDED.language,
                creativity = EXCLUDED.creativity,
                mechanics = EXCLUDED.mechanics,
                final_score = EXCLUDED.final_score,
                path = EXCLUDED.path,
                submission_number = EXCLUDED.submission_number,
                similarity_percent = EXCLUDED.similarity_percent,
                previous_attempt_id = EXCLUDED.previous_attempt_id,
                result_json = EXCLUDED.result_json,
                graded_at = EXCLUDED.graded_at
            "#,
        )
        .bind(attempt_id)
        .bind(content)
        .bind(structure)
        .bind(language)
        .bind(creativity)
        .bind(mechanics)
        .bind(result.final_score() as i32)
        .bind(result.path.as_str())
        .bind(result.submission_number as i32)
        .bind(result.similarity.map(|s| s.percent))
        .bind(result.previous_attempt_id)
        .bind(json)
        .bind(result.graded_at)
        .execute(self.pool.as_ref())
        .await?;

        tracing::debug!("Upserted grading result for attempt {}", attempt_id);
        Ok(())
    }

    async fn get_grading_result(&self, attempt_id: i64) -> Result<Option<GradingResult>, StoreError> {
        let row = sqlx::query_as::<_, ResultRow>(
            "SELECT result_json FROM grading_results WHERE attempt_id = $1",
        )
        .bind(attempt_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.result_json)?)),
            None => Ok(None),
        }
    }

    async fn get_previous_category_scores(&self, attempt_id: i64) -> Result<Option<PartialScores>, StoreError> {
        let row = sqlx::query_as::<_, CategoryColumns>(
            r#"
            SELECT content, structure, language, creativity, mechanics
            FROM grading_results WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(|columns| columns.to_partial()))
    }
}

#[async_trait]
impl SubmissionSource for PgStore {
    async fn get_submission(&self, attempt_id: i64) -> Result<Option<SubmissionRecord>, StoreError> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT attempt_id, user_id, assignment_id, question_text, essay_text, submitted_at, status
            FROM attempts WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(AttemptRow::into_record))
    }

    async fn get_attempt_history(
        &self,
        user_id: i64,
        assignment_id: i64,
    ) -> Result<Vec<AttemptSummary>, StoreError> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT attempt_id, user_id, assignment_id, question_text, essay_text, submitted_at, status
            FROM attempts
            WHERE user_id = $1 AND assignment_id = $2
            ORDER BY submitted_at, attempt_id
            "#,
        )
        .bind(user_id)
        .bind(assignment_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.iter().map(AttemptRow::summary).collect())
    }
}
