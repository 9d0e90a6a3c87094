// src/storage/mod.rs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{question::Exam, submission::Submission},
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Where exams come from and submissions go to.
///
/// `save_submission` must be idempotent on `Submission::id`: a retry after a
/// timed-out attempt that actually landed must not create a second record.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn get_exam_by_id(&self, id: &str) -> Result<Exam, StoreError>;

    async fn get_exam_by_code(&self, code: &str) -> Result<Exam, StoreError>;

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Submissions for one exam, oldest first.
    async fn submissions_for_exam(&self, exam_id: &str) -> Result<Vec<Submission>, StoreError>;
}
