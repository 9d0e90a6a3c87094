// src/models/violation.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the proctoring collaborator observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    MultipleFaces,
    NoFace,
    VoiceDetected,
    SuspiciousMovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A single integrity-violation report. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub description: String,
}

impl ViolationEvent {
    /// Builds an event stamped with the current wall-clock time.
    pub fn now(kind: ViolationKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            severity,
            description: description.into(),
        }
    }
}

/// Counts per severity and per kind, taken from the full (untruncated) log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_kind: BTreeMap<ViolationKind, usize>,
}

impl ViolationSummary {
    pub fn severity(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn kind(&self, kind: ViolationKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}
