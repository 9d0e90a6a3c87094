// src/session/scoring.rs

use std::time::Duration;

use crate::models::question::Question;

use super::answers::AnswerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreCard {
    pub score: u32,
    pub max_score: u32,
    pub correct_count: usize,
}

/// Sums the points of every question whose snapshot answer is the correct option.
/// Unanswered questions earn nothing. Sums saturate, so `score <= max_score` always holds.
pub fn score_answers(questions: &[Question], answers: &AnswerSnapshot) -> ScoreCard {
    let mut card = ScoreCard {
        score: 0,
        max_score: 0,
        correct_count: 0,
    };

    for question in questions {
        card.max_score = card.max_score.saturating_add(question.points);
        if answers.get(&question.id) == Some(&question.correct_option) {
            card.score = card.score.saturating_add(question.points);
            card.correct_count += 1;
        }
    }

    card
}

/// Elapsed time rounded to whole seconds, clamped to `[0, duration]`.
pub fn time_taken_seconds(elapsed: Duration, duration: Duration) -> u64 {
    let rounded = (elapsed.as_millis() + 500) / 1000;
    let rounded = u64::try_from(rounded).unwrap_or(u64::MAX);
    rounded.min(duration.as_secs())
}
