// src/session/answers.rs

use std::collections::{BTreeMap, HashMap};

use crate::{error::SessionError, models::question::Question};

/// Immutable copy of the answers, detached from the tracker.
pub type AnswerSnapshot = BTreeMap<String, usize>;

/// Current answer per question. Last write wins.
#[derive(Debug, Clone)]
pub struct AnswerTracker {
    /// Question ID -> number of options.
    option_counts: HashMap<String, usize>,
    answers: HashMap<String, usize>,
}

impl AnswerTracker {
    pub fn new(questions: &[Question]) -> Self {
        Self {
            option_counts: questions
                .iter()
                .map(|q| (q.id.clone(), q.option_count()))
                .collect(),
            answers: HashMap::new(),
        }
    }

    /// Records `option_index` as the answer to `question_id`.
    ///
    /// Nothing changes when the question is unknown or the index is out of range.
    pub fn set_answer(&mut self, question_id: &str, option_index: usize) -> Result<(), SessionError> {
        let option_count = *self
            .option_counts
            .get(question_id)
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))?;

        if option_index >= option_count {
            return Err(SessionError::InvalidOption {
                question_id: question_id.to_string(),
                option_index,
                option_count,
            });
        }

        self.answers.insert(question_id.to_string(), option_index);
        Ok(())
    }

    /// `None` means unanswered.
    pub fn get_answer(&self, question_id: &str) -> Option<usize> {
        self.answers.get(question_id).copied()
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    pub fn total_questions(&self) -> usize {
        self.option_counts.len()
    }

    pub fn snapshot(&self) -> AnswerSnapshot {
        self.answers
            .iter()
            .map(|(id, idx)| (id.clone(), *idx))
            .collect()
    }
}
