// src/storage/postgres.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow, types::Json};
use uuid::Uuid;

use super::ExamStore;
use crate::{
    error::StoreError,
    models::{
        question::{Exam, Question},
        submission::{Submission, TerminalReason},
        violation::ViolationSummary,
    },
};

/// Represents the 'exams' table in the database.
#[derive(Debug, FromRow)]
struct ExamRow {
    id: String,
    title: String,
    code: String,
    duration_seconds: i64,
    /// Stored as a JSON array in the database.
    questions: Json<Vec<Question>>,
}

impl TryFrom<ExamRow> for Exam {
    type Error = StoreError;

    fn try_from(row: ExamRow) -> Result<Self, Self::Error> {
        let duration_seconds = u64::try_from(row.duration_seconds)
            .map_err(|_| StoreError::Backend(format!("exam '{}' has a negative duration", row.id)))?;
        Ok(Exam {
            id: row.id,
            title: row.title,
            code: row.code,
            duration_seconds,
            questions: row.questions.0,
        })
    }
}

/// Represents the 'submissions' table in the database.
#[derive(Debug, FromRow)]
struct SubmissionRow {
    id: Uuid,
    session_id: Uuid,
    exam_id: String,
    student: String,
    answers: Json<BTreeMap<String, usize>>,
    score: i64,
    max_score: i64,
    correct_count: i64,
    total_questions: i64,
    started_at: DateTime<Utc>,
    submitted_at: DateTime<Utc>,
    time_taken_seconds: i64,
    terminal_reason: String,
    violations: Json<ViolationSummary>,
}

fn from_db<T: TryFrom<i64>>(value: i64, name: &str) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Backend(format!("column '{}' out of range: {}", name, value)))
}

fn to_db(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        let terminal_reason = TerminalReason::parse(&row.terminal_reason).ok_or_else(|| {
            StoreError::Backend(format!("unknown terminal reason '{}'", row.terminal_reason))
        })?;
        Ok(Submission {
            id: row.id,
            session_id: row.session_id,
            exam_id: row.exam_id,
            student: row.student,
            answers: row.answers.0,
            score: from_db(row.score, "score")?,
            max_score: from_db(row.max_score, "max_score")?,
            correct_count: from_db(row.correct_count, "correct_count")?,
            total_questions: from_db(row.total_questions, "total_questions")?,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            time_taken_seconds: from_db(row.time_taken_seconds, "time_taken_seconds")?,
            terminal_reason,
            violations: row.violations.0,
        })
    }
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Inserts or replaces an exam by id.
    pub async fn upsert_exam(&self, exam: &Exam) -> Result<(), StoreError> {
        let duration = i64::try_from(exam.duration_seconds)
            .map_err(|_| StoreError::Backend("exam duration out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO exams (id, title, code, duration_seconds, questions)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(id) DO UPDATE SET
                title = EXCLUDED.title,
                code = EXCLUDED.code,
                duration_seconds = EXCLUDED.duration_seconds,
                questions = EXCLUDED.questions
            "#,
        )
        .bind(&exam.id)
        .bind(&exam.title)
        .bind(&exam.code)
        .bind(duration)
        .bind(Json(&exam.questions))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert exam: {:?}", e);
            StoreError::from(e)
        })?;

        Ok(())
    }

    async fn fetch_exam(&self, column: &'static str, key: &str, entity: &'static str) -> Result<Exam, StoreError> {
        let sql = format!(
            "SELECT id, title, code, duration_seconds, questions FROM exams WHERE {} = $1",
            column
        );
        let row: Option<ExamRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch exam by {}: {:?}", column, e);
                StoreError::from(e)
            })?;

        row.ok_or_else(|| StoreError::NotFound {
            entity,
            key: key.to_string(),
        })?
        .try_into()
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn get_exam_by_id(&self, id: &str) -> Result<Exam, StoreError> {
        self.fetch_exam("id", id, "exam").await
    }

    async fn get_exam_by_code(&self, code: &str) -> Result<Exam, StoreError> {
        self.fetch_exam("code", code, "exam code").await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        // Keyed on the submission id so a retried save never adds a second row.
        sqlx::query(
            r#"
            INSERT INTO submissions (
                id, session_id, exam_id, student, answers,
                score, max_score, correct_count, total_questions,
                started_at, submitted_at, time_taken_seconds,
                terminal_reason, violations
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(submission.id)
        .bind(submission.session_id)
        .bind(&submission.exam_id)
        .bind(&submission.student)
        .bind(Json(&submission.answers))
        .bind(i64::from(submission.score))
        .bind(i64::from(submission.max_score))
        .bind(to_db(submission.correct_count))
        .bind(to_db(submission.total_questions))
        .bind(submission.started_at)
        .bind(submission.submitted_at)
        .bind(i64::try_from(submission.time_taken_seconds).unwrap_or(i64::MAX))
        .bind(submission.terminal_reason.as_str())
        .bind(Json(&submission.violations))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert submission: {:?}", e);
            StoreError::from(e)
        })?;

        Ok(())
    }

    async fn submissions_for_exam(&self, exam_id: &str) -> Result<Vec<Submission>, StoreError> {
        let rows: Vec<SubmissionRow> = sqlx::query_as(
            r#"
            SELECT
                id, session_id, exam_id, student, answers,
                score, max_score, correct_count, total_questions,
                started_at, submitted_at, time_taken_seconds,
                terminal_reason, violations
            FROM submissions
            WHERE exam_id = $1
            ORDER BY submitted_at ASC
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch submissions: {:?}", e);
            StoreError::from(e)
        })?;

        rows.into_iter().map(Submission::try_from).collect()
    }
}
