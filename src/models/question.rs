// src/models/question.rs

use serde::{Deserialize, Serialize};

/// A single-choice question. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,

    /// The text content of the question.
    pub text: String,

    /// Ordered list of options (e.g., ["Option A", "Option B"]).
    pub options: Vec<String>,

    /// Index into `options` of the correct answer.
    pub correct_option: usize,

    /// Points awarded when the chosen option is correct.
    pub points: u32,
}

impl Question {
    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}

/// An exam as supplied by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub title: String,

    /// Join code students type in to start the exam (e.g., "JS101A").
    pub code: String,

    pub duration_seconds: u64,

    /// Ordered question list.
    pub questions: Vec<Question>,
}

impl Exam {
    /// Sum of all question points, saturating.
    pub fn max_score(&self) -> u32 {
        self.questions.iter().fold(0, |total: u32, q| total.saturating_add(q.points))
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// DTO for sending question to client (excludes the correct option).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub points: u32,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            text: q.text.clone(),
            options: q.options.clone(),
            points: q.points,
        }
    }
}
