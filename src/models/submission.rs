// src/models/submission.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::violation::ViolationSummary;

/// Lifecycle of a session. Moves forward only: Active -> Finalizing -> Submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Finalizing,
    Submitted,
}

/// The trigger that caused finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Manual,
    TimerExpired,
    ViolationEscalation,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::Manual => "manual",
            TerminalReason::TimerExpired => "timer_expired",
            TerminalReason::ViolationEscalation => "violation_escalation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(TerminalReason::Manual),
            "timer_expired" => Some(TerminalReason::TimerExpired),
            "violation_escalation" => Some(TerminalReason::ViolationEscalation),
            _ => None,
        }
    }
}

/// The record produced exactly once per session when it finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub session_id: Uuid,
    pub exam_id: String,
    pub student: String,

    /// Copy of the answers at finalize time.
    /// Key: Question ID
    /// Value: chosen option index
    pub answers: BTreeMap<String, usize>,

    pub score: u32,
    pub max_score: u32,
    pub correct_count: usize,
    pub total_questions: usize,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub time_taken_seconds: u64,
    pub terminal_reason: TerminalReason,
    pub violations: ViolationSummary,
}
