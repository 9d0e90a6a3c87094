// src/session/monitor.rs

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::models::violation::{Severity, ViolationEvent, ViolationKind, ViolationSummary};

/// Decides when accumulated violations force a session to finalize.
pub trait EscalationPolicy: Send + Sync + fmt::Debug {
    /// Whether `event` counts toward the threshold.
    fn counts_toward_escalation(&self, event: &ViolationEvent) -> bool;

    /// Number of qualifying events that triggers escalation. Zero disables it.
    fn threshold(&self) -> usize;
}

/// Escalates once `threshold` events of a given severity have been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityThreshold {
    pub severity: Severity,
    pub threshold: usize,
}

impl SeverityThreshold {
    pub const DEFAULT_HIGH_THRESHOLD: usize = 5;

    pub fn high(threshold: usize) -> Self {
        Self {
            severity: Severity::High,
            threshold,
        }
    }
}

impl Default for SeverityThreshold {
    fn default() -> Self {
        Self::high(Self::DEFAULT_HIGH_THRESHOLD)
    }
}

impl EscalationPolicy for SeverityThreshold {
    fn counts_toward_escalation(&self, event: &ViolationEvent) -> bool {
        event.severity == self.severity
    }

    fn threshold(&self) -> usize {
        self.threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The monitor is unsubscribed; the event was dropped.
    Ignored,
    Recorded,
    /// This event crossed the escalation threshold.
    Escalated,
}

/// Append-only violation log with counters and an escalation latch.
///
/// Counters and escalation always see every recorded event. The `recent`
/// list is a bounded, newest-first view for display and plays no part in
/// the escalation decision.
#[derive(Debug)]
pub struct ViolationMonitor {
    policy: Arc<dyn EscalationPolicy>,
    log: Vec<ViolationEvent>,
    by_severity: BTreeMap<Severity, usize>,
    by_kind: BTreeMap<ViolationKind, usize>,
    qualifying: usize,
    escalated: bool,
    recent: VecDeque<ViolationEvent>,
    recent_limit: usize,
    subscribed: bool,
}

impl ViolationMonitor {
    pub fn new(policy: Arc<dyn EscalationPolicy>, recent_limit: usize) -> Self {
        Self {
            policy,
            log: Vec::new(),
            by_severity: BTreeMap::new(),
            by_kind: BTreeMap::new(),
            qualifying: 0,
            escalated: false,
            recent: VecDeque::with_capacity(recent_limit),
            recent_limit,
            subscribed: true,
        }
    }

    /// Appends `event` in arrival order. Never rejects while subscribed.
    pub fn record(&mut self, event: ViolationEvent) -> RecordOutcome {
        if !self.subscribed {
            return RecordOutcome::Ignored;
        }

        *self.by_severity.entry(event.severity).or_insert(0) += 1;
        *self.by_kind.entry(event.kind).or_insert(0) += 1;

        if self.policy.counts_toward_escalation(&event) {
            self.qualifying += 1;
        }

        if self.recent_limit > 0 {
            if self.recent.len() == self.recent_limit {
                self.recent.pop_back();
            }
            self.recent.push_front(event.clone());
        }
        self.log.push(event);

        let threshold = self.policy.threshold();
        if !self.escalated && threshold > 0 && self.qualifying >= threshold {
            self.escalated = true;
            return RecordOutcome::Escalated;
        }
        RecordOutcome::Recorded
    }

    /// Stops accepting events. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.subscribed = false;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn has_escalated(&self) -> bool {
        self.escalated
    }

    pub fn log(&self) -> &[ViolationEvent] {
        &self.log
    }

    /// Newest first, at most `recent_limit` entries.
    pub fn recent(&self) -> Vec<ViolationEvent> {
        self.recent.iter().cloned().collect()
    }

    pub fn summary(&self) -> ViolationSummary {
        ViolationSummary {
            total: self.log.len(),
            by_severity: self.by_severity.clone(),
            by_kind: self.by_kind.clone(),
        }
    }
}
