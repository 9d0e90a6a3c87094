// src/session/coordinator.rs

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    answers::AnswerTracker,
    clock::{ClockEvent, SessionClock},
    monitor::{EscalationPolicy, RecordOutcome, SeverityThreshold, ViolationMonitor},
    proctoring::ProctoringSource,
    scoring,
    subscription::Subscription,
};
use crate::{
    error::SessionError,
    models::{
        question::Exam,
        submission::{SessionState, Submission, TerminalReason},
        violation::{ViolationEvent, ViolationSummary},
    },
    storage::ExamStore,
};

/// Bounded retry for handing the submission to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Limit for a single `save_submission` call.
    pub timeout: Duration,
    /// Pause after the n-th failed attempt is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(500),
        }
    }
}

/// Knobs for a single session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub escalation: Arc<dyn EscalationPolicy>,
    pub low_time_warning: Duration,
    /// Length of the display-only recent violations list.
    pub recent_violations_limit: usize,
    pub persist: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            escalation: Arc::new(SeverityThreshold::default()),
            low_time_warning: Duration::from_secs(300),
            recent_violations_limit: 10,
            persist: RetryPolicy::default(),
        }
    }
}

/// Callbacks from a running session. Called outside the session lock.
pub trait SessionObserver: Send + Sync {
    fn on_low_time(&self, _session_id: Uuid, _remaining: Duration) {}

    fn on_escalation(&self, _session_id: Uuid, _violations: &ViolationSummary) {}

    /// Fired exactly once per session, after the first persistence attempt settles.
    fn on_finalized(&self, submission: &Submission);
}

/// Result of handing the submission to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistStatus {
    Saved { attempts: u32 },
    Failed { attempts: u32, message: String },
}

/// A session that reached `Submitted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub submission: Submission,
    pub persistence: PersistStatus,
}

impl Finalized {
    fn into_result(self) -> Result<Submission, SessionError> {
        match self.persistence {
            PersistStatus::Saved { .. } => Ok(self.submission),
            PersistStatus::Failed { attempts, message } => {
                Err(SessionError::StoragePersistFailure { attempts, message })
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Running,
    Closed,
    Done(Finalized),
}

/// Point-in-time view of a session for callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub exam_id: String,
    pub student: String,
    pub state: SessionState,
    pub closed: bool,
    pub started_at: DateTime<Utc>,
    pub remaining_seconds: u64,
    pub low_time_warning: bool,
    pub answered_count: usize,
    pub total_questions: usize,
    pub violations: ViolationSummary,
    pub recent_violations: Vec<ViolationEvent>,
    pub terminal_reason: Option<TerminalReason>,
    pub submission: Option<Submission>,
    pub persistence: Option<PersistStatus>,
}

struct SessionCore {
    state: SessionState,
    /// Torn down without a submission.
    closed: bool,
    clock: SessionClock,
    answers: AnswerTracker,
    monitor: ViolationMonitor,
    terminal_reason: Option<TerminalReason>,
    /// Computed once on leaving Active and never recomputed.
    submission: Option<Submission>,
    persistence: Option<PersistStatus>,
    persisting: bool,
    subscriptions: Vec<Subscription>,
}

impl SessionCore {
    fn is_live(&self) -> bool {
        self.state == SessionState::Active && !self.closed
    }

    /// Stops the clock and drops every listener. Returns them so the caller
    /// can release them after the lock is gone.
    fn detach(&mut self) -> Vec<Subscription> {
        self.clock.stop();
        self.monitor.unsubscribe();
        std::mem::take(&mut self.subscriptions)
    }
}

struct SessionShared {
    id: Uuid,
    exam: Arc<Exam>,
    student: String,
    started_at: DateTime<Utc>,
    store: Arc<dyn ExamStore>,
    settings: SessionSettings,
    observer: Option<Arc<dyn SessionObserver>>,
    core: Mutex<SessionCore>,
    phase: watch::Sender<Phase>,
}

impl SessionShared {
    /// Every mutation completes under the lock, so a poisoned guard still holds consistent state.
    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leaves Active if nothing else has. Returns false for a late trigger.
    fn begin_finalize(&self, core: &mut SessionCore, reason: TerminalReason) -> bool {
        if !core.is_live() {
            tracing::debug!(
                session_id = %self.id,
                reason = reason.as_str(),
                state = ?core.state,
                "trigger ignored; session already finalizing"
            );
            return false;
        }

        core.state = SessionState::Finalizing;
        core.terminal_reason = Some(reason);
        // Aborting here is non-blocking; the tasks stop at their next await.
        drop(core.detach());

        let snapshot = core.answers.snapshot();
        let card = scoring::score_answers(&self.exam.questions, &snapshot);
        let elapsed = core.clock.elapsed();
        let submitted_at = TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| self.started_at.checked_add_signed(delta))
            .unwrap_or(self.started_at);

        let submission = Submission {
            id: Uuid::new_v4(),
            session_id: self.id,
            exam_id: self.exam.id.clone(),
            student: self.student.clone(),
            answers: snapshot,
            score: card.score,
            max_score: card.max_score,
            correct_count: card.correct_count,
            total_questions: self.exam.questions.len(),
            started_at: self.started_at,
            submitted_at,
            time_taken_seconds: scoring::time_taken_seconds(elapsed, core.clock.duration()),
            terminal_reason: reason,
            violations: core.monitor.summary(),
        };

        tracing::info!(
            session_id = %self.id,
            reason = reason.as_str(),
            score = submission.score,
            max_score = submission.max_score,
            time_taken = submission.time_taken_seconds,
            "session finalizing"
        );

        core.submission = Some(submission);
        core.persisting = true;
        true
    }

    fn spawn_persist(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.persist().await;
        });
    }

    /// Saves the retained submission with bounded retries, then marks the
    /// session Submitted. The first completion notifies observers.
    ///
    /// Always runs on its own task so a caller that stops waiting cannot
    /// leave `persisting` set.
    async fn persist(self: Arc<Self>) {
        let Some(submission) = self.core().submission.clone() else {
            return;
        };
        let policy = self.settings.persist;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempts = 0;
        let status = loop {
            attempts += 1;
            let message =
                match tokio::time::timeout(policy.timeout, self.store.save_submission(&submission)).await {
                    Ok(Ok(())) => break PersistStatus::Saved { attempts },
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("save timed out after {:?}", policy.timeout),
                };

            if attempts >= max_attempts {
                tracing::error!(
                    session_id = %self.id,
                    attempts,
                    "giving up on persisting submission: {}",
                    message
                );
                break PersistStatus::Failed { attempts, message };
            }

            tracing::warn!(
                session_id = %self.id,
                attempt = attempts,
                "failed to persist submission, retrying: {}",
                message
            );
            tokio::time::sleep(policy.backoff * attempts).await;
        };

        let first = {
            let mut core = self.core();
            let first = core.state == SessionState::Finalizing;
            core.state = SessionState::Submitted;
            core.persisting = false;
            core.persistence = Some(status.clone());
            // Published under the lock so waiters never see a stale outcome.
            self.phase.send_replace(Phase::Done(Finalized {
                submission: submission.clone(),
                persistence: status,
            }));
            first
        };

        if first {
            tracing::info!(session_id = %self.id, "session submitted");
            if let Some(observer) = &self.observer {
                observer.on_finalized(&submission);
            }
        }
    }

    fn record_violation(self: &Arc<Self>, event: ViolationEvent) -> RecordOutcome {
        let (outcome, escalation) = {
            let mut core = self.core();
            if !core.is_live() {
                tracing::debug!(session_id = %self.id, kind = ?event.kind, "late violation ignored");
                return RecordOutcome::Ignored;
            }

            let outcome = core.monitor.record(event);
            let escalation = match outcome {
                RecordOutcome::Escalated => {
                    let summary = core.monitor.summary();
                    self.begin_finalize(&mut core, TerminalReason::ViolationEscalation)
                        .then_some(summary)
                }
                _ => None,
            };
            (outcome, escalation)
        };

        if let Some(summary) = escalation {
            tracing::warn!(
                session_id = %self.id,
                total = summary.total,
                "violation threshold reached, submitting exam"
            );
            if let Some(observer) = &self.observer {
                observer.on_escalation(self.id, &summary);
            }
            self.spawn_persist();
        }

        outcome
    }

    fn next_clock_deadline(&self) -> Option<Instant> {
        let core = self.core();
        if core.is_live() {
            core.clock.next_deadline()
        } else {
            None
        }
    }

    fn on_clock_tick(self: &Arc<Self>) {
        let (events, expired) = {
            let mut core = self.core();
            if !core.is_live() {
                return;
            }
            let events = core.clock.poll();
            let expired = events.contains(&ClockEvent::Expired)
                && self.begin_finalize(&mut core, TerminalReason::TimerExpired);
            (events, expired)
        };

        for event in events {
            if let ClockEvent::LowTime { remaining } = event {
                tracing::info!(session_id = %self.id, remaining = remaining.as_secs(), "low time warning");
                if let Some(observer) = &self.observer {
                    observer.on_low_time(self.id, remaining);
                }
            }
        }

        if expired {
            self.spawn_persist();
        }
    }
}

/// Rejects exams a session cannot be scored against.
fn validate_exam(exam: &Exam) -> Result<(), SessionError> {
    let invalid = |reason: String| Err(SessionError::InvalidExam(format!("exam '{}' {}", exam.id, reason)));

    if exam.duration_seconds == 0 {
        return invalid("has no time allotted".to_string());
    }

    let mut seen = HashSet::new();
    let mut max_score: u32 = 0;
    for question in &exam.questions {
        if !seen.insert(question.id.as_str()) {
            return invalid(format!("repeats question id '{}'", question.id));
        }
        if question.correct_option >= question.option_count() {
            return invalid(format!(
                "question '{}' marks option {} correct but has {} options",
                question.id,
                question.correct_option,
                question.option_count()
            ));
        }
        max_score = match max_score.checked_add(question.points) {
            Some(total) => total,
            None => return invalid("is worth more points than can be scored".to_string()),
        };
    }
    Ok(())
}

/// Drives the clock: sleeps until the next deadline and polls.
fn spawn_clock_driver(weak: Weak<SessionShared>) -> Subscription {
    let handle = tokio::spawn(async move {
        loop {
            let Some(deadline) = weak.upgrade().and_then(|s| s.next_clock_deadline()) else {
                return;
            };
            tokio::time::sleep_until(deadline).await;
            match weak.upgrade() {
                Some(shared) => shared.on_clock_tick(),
                None => return,
            }
        }
    });
    Subscription::new("clock", handle)
}

/// One student's timed attempt at an exam.
///
/// Clock expiry, violation escalation and explicit submit requests all
/// funnel through a single lock; whichever arrives first moves the session
/// out of `Active`, and every later trigger is a no-op. The submission is
/// computed once, at that moment, from a detached snapshot of the answers.
///
/// Background listeners hold only a weak reference, so dropping the session
/// releases the clock and every proctoring feed.
pub struct ExamSession {
    shared: Arc<SessionShared>,
}

impl ExamSession {
    /// Starts the attempt and its clock. Must be called within a Tokio runtime.
    pub fn start(
        exam: Arc<Exam>,
        student: impl Into<String>,
        store: Arc<dyn ExamStore>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        Self::start_with_observer(exam, student, store, settings, None)
    }

    pub fn start_with_observer(
        exam: Arc<Exam>,
        student: impl Into<String>,
        store: Arc<dyn ExamStore>,
        settings: SessionSettings,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Result<Self, SessionError> {
        validate_exam(&exam)?;

        let clock = SessionClock::start(
            Duration::from_secs(exam.duration_seconds),
            settings.low_time_warning,
        );
        let core = SessionCore {
            state: SessionState::Active,
            closed: false,
            clock,
            answers: AnswerTracker::new(&exam.questions),
            monitor: ViolationMonitor::new(
                Arc::clone(&settings.escalation),
                settings.recent_violations_limit,
            ),
            terminal_reason: None,
            submission: None,
            persistence: None,
            persisting: false,
            subscriptions: Vec::new(),
        };
        let (phase, _) = watch::channel(Phase::Running);

        let shared = Arc::new(SessionShared {
            id: Uuid::new_v4(),
            exam,
            student: student.into(),
            started_at: Utc::now(),
            store,
            settings,
            observer,
            core: Mutex::new(core),
            phase,
        });

        let driver = spawn_clock_driver(Arc::downgrade(&shared));
        shared.core().subscriptions.push(driver);

        tracing::info!(
            session_id = %shared.id,
            exam_id = %shared.exam.id,
            student = %shared.student,
            duration = shared.exam.duration_seconds,
            "exam session started"
        );

        Ok(Self { shared })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn exam(&self) -> &Exam {
        &self.shared.exam
    }

    pub fn student(&self) -> &str {
        &self.shared.student
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub fn state(&self) -> SessionState {
        self.shared.core().state
    }

    pub fn is_closed(&self) -> bool {
        self.shared.core().closed
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        self.shared.core().terminal_reason
    }

    pub fn remaining(&self) -> Duration {
        self.shared.core().clock.remaining()
    }

    pub fn answered_count(&self) -> usize {
        self.shared.core().answers.answered_count()
    }

    pub fn get_answer(&self, question_id: &str) -> Option<usize> {
        self.shared.core().answers.get_answer(question_id)
    }

    pub fn violation_counts(&self) -> ViolationSummary {
        self.shared.core().monitor.summary()
    }

    /// Newest first, truncated for display.
    pub fn recent_violations(&self) -> Vec<ViolationEvent> {
        self.shared.core().monitor.recent()
    }

    /// The computed submission, once the session has left `Active`.
    pub fn submission(&self) -> Option<Submission> {
        self.shared.core().submission.clone()
    }

    pub fn persistence(&self) -> Option<PersistStatus> {
        self.shared.core().persistence.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let core = self.shared.core();
        let remaining = core.clock.remaining();
        SessionStatus {
            session_id: self.shared.id,
            exam_id: self.shared.exam.id.clone(),
            student: self.shared.student.clone(),
            state: core.state,
            closed: core.closed,
            started_at: self.shared.started_at,
            remaining_seconds: remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0),
            low_time_warning: core.clock.low_time_reached(),
            answered_count: core.answers.answered_count(),
            total_questions: core.answers.total_questions(),
            violations: core.monitor.summary(),
            recent_violations: core.monitor.recent(),
            terminal_reason: core.terminal_reason,
            submission: core.submission.clone(),
            persistence: core.persistence.clone(),
        }
    }

    /// Records an answer while the session is active.
    pub fn set_answer(&self, question_id: &str, option_index: usize) -> Result<(), SessionError> {
        let mut core = self.shared.core();
        if !core.is_live() {
            return Err(SessionError::NotActive);
        }
        core.answers.set_answer(question_id, option_index)
    }

    /// Feeds one event to the violation monitor. Never fails; events that
    /// arrive after the session left `Active` are dropped.
    pub fn record_violation(&self, event: ViolationEvent) -> RecordOutcome {
        self.shared.record_violation(event)
    }

    /// Consumes `source` in the background until it ends or the session
    /// leaves `Active`.
    pub fn attach_proctor<S: ProctoringSource>(&self, mut source: S) {
        let weak = Arc::downgrade(&self.shared);
        let mut core = self.shared.core();
        if !core.is_live() {
            tracing::debug!(session_id = %self.shared.id, "proctor attached to a finished session, ignoring");
            return;
        }

        let handle = tokio::spawn(async move {
            while let Some(event) = source.next_violation().await {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if shared.record_violation(event) == RecordOutcome::Ignored {
                    return;
                }
            }
        });
        core.subscriptions.push(Subscription::new("proctor", handle));
    }

    /// Convenience over [`attach_proctor`](Self::attach_proctor): returns the
    /// sending half of a fresh channel. Sends fail once the session stops listening.
    pub fn violation_feed(&self, buffer: usize) -> mpsc::Sender<ViolationEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.attach_proctor(rx);
        tx
    }

    /// Explicit submit. Repeated or late calls return the submission that
    /// was already computed, whatever trigger produced it.
    pub async fn request_submit(&self) -> Result<Submission, SessionError> {
        let started = {
            let mut core = self.shared.core();
            self.shared.begin_finalize(&mut core, TerminalReason::Manual)
        };
        if started {
            self.shared.spawn_persist();
        }
        self.finalized().await?.into_result()
    }

    /// Waits until the session is `Submitted`.
    pub async fn finalized(&self) -> Result<Finalized, SessionError> {
        let mut rx = self.shared.phase.subscribe();
        let phase = rx
            .wait_for(|p| !matches!(p, Phase::Running))
            .await
            .map_err(|_| SessionError::Closed)?;
        match &*phase {
            Phase::Done(finalized) => Ok(finalized.clone()),
            _ => Err(SessionError::Closed),
        }
    }

    /// Tries again to save a submission whose persistence failed. The
    /// retained submission is sent verbatim. A retry that is already running
    /// is joined rather than duplicated.
    pub async fn retry_persist(&self) -> Result<Submission, SessionError> {
        let mut rx = {
            let mut core = self.shared.core();
            let rx = self.shared.phase.subscribe();
            match core.persistence {
                Some(PersistStatus::Saved { .. }) => {
                    return core.submission.clone().ok_or(SessionError::NothingToRetry);
                }
                Some(PersistStatus::Failed { .. }) => {}
                None => return Err(SessionError::NothingToRetry),
            }

            if core.persisting {
                tracing::debug!(session_id = %self.shared.id, "joining persistence retry in flight");
            } else {
                core.persisting = true;
                tracing::info!(session_id = %self.shared.id, "retrying submission persistence");
                self.shared.spawn_persist();
            }
            rx
        };

        rx.changed().await.map_err(|_| SessionError::Closed)?;
        let finalized = match &*rx.borrow_and_update() {
            Phase::Done(finalized) => finalized.clone(),
            _ => return Err(SessionError::NothingToRetry),
        };
        finalized.into_result()
    }

    /// Resolves once the submission is in storage, including after a later
    /// manual retry. Returns false if the session was closed instead.
    pub async fn stored(&self) -> bool {
        let mut rx = self.shared.phase.subscribe();
        let phase = rx
            .wait_for(|p| {
                matches!(
                    p,
                    Phase::Closed
                        | Phase::Done(Finalized {
                            persistence: PersistStatus::Saved { .. },
                            ..
                        })
                )
            })
            .await;
        matches!(phase.as_deref(), Ok(Phase::Done(_)))
    }

    /// Tears the session down without submitting (the student navigated
    /// away). Releases the clock and every proctoring feed. No-op once the
    /// session has left `Active`.
    pub fn close(&self) {
        let released = {
            let mut core = self.shared.core();
            if !core.is_live() {
                return;
            }
            core.closed = true;
            core.detach()
        };
        for subscription in released {
            subscription.release();
        }
        self.shared.phase.send_replace(Phase::Closed);
        tracing::info!(session_id = %self.shared.id, "exam session closed without submission");
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared
            .core()
            .subscriptions
            .iter()
            .filter(|s| s.is_active())
            .count()
    }
}
