// src/storage/memory.rs

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ExamStore;
use crate::{
    error::StoreError,
    models::{
        question::{Exam, Question},
        submission::Submission,
    },
};

/// Process-local store. Used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    exams: RwLock<Vec<Exam>>,
    submissions: RwLock<Vec<Submission>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with [`sample_exam`].
    pub fn with_sample_data() -> Self {
        Self {
            exams: RwLock::new(vec![sample_exam()]),
            submissions: RwLock::new(Vec::new()),
        }
    }

    /// Inserts or replaces an exam by id.
    pub async fn upsert_exam(&self, exam: Exam) {
        let mut exams = self.exams.write().await;
        match exams.iter_mut().find(|e| e.id == exam.id) {
            Some(existing) => *existing = exam,
            None => exams.push(exam),
        }
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.read().await.len()
    }
}

#[async_trait]
impl ExamStore for InMemoryStore {
    async fn get_exam_by_id(&self, id: &str) -> Result<Exam, StoreError> {
        self.exams
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "exam",
                key: id.to_string(),
            })
    }

    async fn get_exam_by_code(&self, code: &str) -> Result<Exam, StoreError> {
        self.exams
            .read()
            .await
            .iter()
            .find(|e| e.code == code)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "exam code",
                key: code.to_string(),
            })
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut submissions = self.submissions.write().await;
        if submissions.iter().any(|s| s.id == submission.id) {
            return Ok(());
        }
        submissions.push(submission.clone());
        Ok(())
    }

    async fn submissions_for_exam(&self, exam_id: &str) -> Result<Vec<Submission>, StoreError> {
        Ok(self
            .submissions
            .read()
            .await
            .iter()
            .filter(|s| s.exam_id == exam_id)
            .cloned()
            .collect())
    }
}

/// "Sample JavaScript Quiz": three one-point questions, 30 minutes, code `JS101A`.
pub fn sample_exam() -> Exam {
    let question = |id: &str, text: &str, options: [&str; 4], correct_option: usize| Question {
        id: id.to_string(),
        text: text.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_option,
        points: 1,
    };

    Exam {
        id: "sample-1".to_string(),
        title: "Sample JavaScript Quiz".to_string(),
        code: "JS101A".to_string(),
        duration_seconds: 30 * 60,
        questions: vec![
            question(
                "q1",
                "What is the correct way to declare a variable in JavaScript?",
                [
                    "var myVariable = 5;",
                    "variable myVariable = 5;",
                    "v myVariable = 5;",
                    "declare myVariable = 5;",
                ],
                0,
            ),
            question(
                "q2",
                "Which of the following is NOT a JavaScript data type?",
                ["string", "boolean", "float", "undefined"],
                2,
            ),
            question(
                "q3",
                "What does DOM stand for?",
                [
                    "Document Object Model",
                    "Data Object Management",
                    "Dynamic Object Method",
                    "Document Oriented Model",
                ],
                0,
            ),
        ],
    }
}
