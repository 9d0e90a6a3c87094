// tests/session_tests.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use exam_session::{
    error::{SessionError, StoreError},
    models::{
        question::{Exam, Question},
        submission::{SessionState, Submission, TerminalReason},
        violation::{Severity, ViolationEvent, ViolationKind, ViolationSummary},
    },
    session::{
        ExamSession, PersistStatus, RecordOutcome, RetryPolicy, SessionObserver, SessionSettings,
        SeverityThreshold,
    },
    storage::{ExamStore, InMemoryStore},
};
use uuid::Uuid;

/// Three one-point questions; the correct option is 0, 2 and 1.
fn exam(duration_seconds: u64) -> Arc<Exam> {
    let question = |id: &str, correct_option: usize| Question {
        id: id.to_string(),
        text: format!("Question {}", id),
        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        correct_option,
        points: 1,
    };
    Arc::new(Exam {
        id: "exam-1".to_string(),
        title: "Test Exam".to_string(),
        code: "TEST01".to_string(),
        duration_seconds,
        questions: vec![question("q1", 0), question("q2", 2), question("q3", 1)],
    })
}

fn high() -> ViolationEvent {
    ViolationEvent::now(ViolationKind::TabSwitch, Severity::High, "Student switched to another tab")
}

/// Lets woken background tasks run on the current-thread test runtime.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Wraps the in-memory store, failing the first `failures` saves.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    failures_left: AtomicUsize,
    save_calls: AtomicUsize,
}

impl FlakyStore {
    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            ..Default::default()
        })
    }

    fn recover(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    async fn saved(&self) -> Vec<Submission> {
        self.inner.submissions_for_exam("exam-1").await.unwrap()
    }
}

#[async_trait]
impl ExamStore for FlakyStore {
    async fn get_exam_by_id(&self, id: &str) -> Result<Exam, StoreError> {
        self.inner.get_exam_by_id(id).await
    }

    async fn get_exam_by_code(&self, code: &str) -> Result<Exam, StoreError> {
        self.inner.get_exam_by_code(code).await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend("database unavailable".to_string()));
        }
        self.inner.save_submission(submission).await
    }

    async fn submissions_for_exam(&self, exam_id: &str) -> Result<Vec<Submission>, StoreError> {
        self.inner.submissions_for_exam(exam_id).await
    }
}

/// A store whose saves never complete.
struct HangingStore;

#[async_trait]
impl ExamStore for HangingStore {
    async fn get_exam_by_id(&self, id: &str) -> Result<Exam, StoreError> {
        Err(StoreError::NotFound { entity: "exam", key: id.to_string() })
    }

    async fn get_exam_by_code(&self, code: &str) -> Result<Exam, StoreError> {
        Err(StoreError::NotFound { entity: "exam code", key: code.to_string() })
    }

    async fn save_submission(&self, _submission: &Submission) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn submissions_for_exam(&self, _exam_id: &str) -> Result<Vec<Submission>, StoreError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingObserver {
    finalized: Mutex<Vec<Submission>>,
    low_time: AtomicUsize,
    escalations: AtomicUsize,
}

impl SessionObserver for RecordingObserver {
    fn on_low_time(&self, _session_id: Uuid, _remaining: Duration) {
        self.low_time.fetch_add(1, Ordering::SeqCst);
    }

    fn on_escalation(&self, _session_id: Uuid, _violations: &ViolationSummary) {
        self.escalations.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finalized(&self, submission: &Submission) {
        self.finalized.lock().unwrap().push(submission.clone());
    }
}

fn start_observed(
    exam: Arc<Exam>,
    store: Arc<FlakyStore>,
    settings: SessionSettings,
) -> (ExamSession, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let dyn_observer: Arc<dyn SessionObserver> = observer.clone();
    let session =
        ExamSession::start_with_observer(exam, "alice", store, settings, Some(dyn_observer)).unwrap();
    (session, observer)
}

#[tokio::test(start_paused = true)]
async fn timer_expiry_submits_unanswered_exam() {
    let store = FlakyStore::failing(0);
    let (session, observer) = start_observed(exam(60), store.clone(), SessionSettings::default());

    let finalized = session.finalized().await.unwrap();
    let submission = finalized.submission;

    assert_eq!(session.state(), SessionState::Submitted);
    assert_eq!(session.terminal_reason(), Some(TerminalReason::TimerExpired));
    assert_eq!(submission.terminal_reason, TerminalReason::TimerExpired);
    assert_eq!(submission.score, 0);
    assert_eq!(submission.max_score, 3);
    assert_eq!(submission.time_taken_seconds, 60);
    assert!(submission.submitted_at >= submission.started_at);
    assert_eq!(finalized.persistence, PersistStatus::Saved { attempts: 1 });
    assert_eq!(session.remaining(), Duration::ZERO);
    assert_eq!(store.saved().await, vec![submission]);
    assert_eq!(observer.finalized.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fifth_high_violation_escalates_with_time_left() {
    let store = FlakyStore::failing(0);
    let (session, observer) = start_observed(exam(60), store.clone(), SessionSettings::default());

    tokio::time::advance(Duration::from_secs(10)).await;

    for _ in 0..4 {
        assert_eq!(session.record_violation(high()), RecordOutcome::Recorded);
    }
    assert_eq!(session.state(), SessionState::Active);

    assert_eq!(session.record_violation(high()), RecordOutcome::Escalated);
    assert_eq!(session.terminal_reason(), Some(TerminalReason::ViolationEscalation));
    assert_ne!(session.state(), SessionState::Active);
    assert_eq!(session.remaining(), Duration::from_secs(50));

    let submission = session.finalized().await.unwrap().submission;
    assert_eq!(submission.terminal_reason, TerminalReason::ViolationEscalation);
    assert_eq!(submission.time_taken_seconds, 10);
    assert_eq!(submission.violations.severity(Severity::High), 5);
    assert_eq!(submission.violations.kind(ViolationKind::TabSwitch), 5);
    assert_eq!(observer.escalations.load(Ordering::SeqCst), 1);
    assert_eq!(store.saved().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_submit_scores_snapshot() {
    let store = FlakyStore::failing(0);
    let session = ExamSession::start(exam(60), "alice", store.clone(), SessionSettings::default()).unwrap();

    session.set_answer("q1", 0).unwrap();
    session.set_answer("q2", 2).unwrap();
    session.set_answer("q3", 3).unwrap();
    tokio::time::advance(Duration::from_secs(20)).await;

    let submission = session.request_submit().await.unwrap();

    assert_eq!(submission.score, 2);
    assert_eq!(submission.max_score, 3);
    assert_eq!(submission.correct_count, 2);
    assert_eq!(submission.time_taken_seconds, 20);
    assert_eq!(submission.terminal_reason, TerminalReason::Manual);
    assert_eq!(submission.answers.len(), 3);
    assert_eq!(session.state(), SessionState::Submitted);
}

#[tokio::test(start_paused = true)]
async fn repeated_triggers_yield_one_submission() {
    let store = FlakyStore::failing(0);
    let (session, observer) = start_observed(exam(60), store.clone(), SessionSettings::default());
    session.set_answer("q1", 0).unwrap();

    let first = session.request_submit().await.unwrap();
    for _ in 0..5 {
        assert_eq!(session.request_submit().await.unwrap(), first);
    }
    for _ in 0..10 {
        assert_eq!(session.record_violation(high()), RecordOutcome::Ignored);
    }

    // Past the exam expiry.
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;

    assert_eq!(session.terminal_reason(), Some(TerminalReason::Manual));
    assert_eq!(session.submission(), Some(first.clone()));
    assert_eq!(session.violation_counts().total, 0);
    assert_eq!(store.save_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saved().await, vec![first]);
    assert_eq!(observer.finalized.lock().unwrap().len(), 1);
    assert_eq!(observer.escalations.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_and_manual_submit_at_the_same_instant() {
    let store = FlakyStore::failing(0);
    let (session, observer) = start_observed(exam(60), store.clone(), SessionSettings::default());
    session.set_answer("q2", 2).unwrap();

    tokio::time::advance(Duration::from_secs(60)).await;
    let submitted = session.request_submit().await.unwrap();
    settle().await;

    let finalized = session.finalized().await.unwrap().submission;
    assert_eq!(submitted, finalized);
    assert_eq!(session.submission(), Some(finalized.clone()));
    assert!(matches!(
        finalized.terminal_reason,
        TerminalReason::Manual | TerminalReason::TimerExpired
    ));
    assert_eq!(finalized.time_taken_seconds, 60);
    assert_eq!(finalized.score, 1);
    assert_eq!(store.save_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saved().await, vec![finalized.clone()]);
    assert_eq!(observer.finalized.lock().unwrap().clone(), vec![finalized]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_race_to_a_single_submission() {
    let store = FlakyStore::failing(0);
    let settings = SessionSettings {
        escalation: Arc::new(SeverityThreshold::high(1)),
        ..SessionSettings::default()
    };
    let (session, observer) = start_observed(exam(60), store.clone(), settings);
    let session = Arc::new(session);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                session.request_submit().await.map(Some)
            } else {
                session.record_violation(high());
                Ok(None)
            }
        }));
    }

    let mut submissions = Vec::new();
    for task in tasks {
        if let Some(submission) = task.await.unwrap().unwrap() {
            submissions.push(submission);
        }
    }

    let finalized = session.finalized().await.unwrap().submission;
    assert!(submissions.iter().all(|s| *s == finalized));
    assert!(matches!(
        finalized.terminal_reason,
        TerminalReason::Manual | TerminalReason::ViolationEscalation
    ));
    assert_eq!(store.save_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saved().await.len(), 1);
    assert_eq!(observer.finalized.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn answers_are_validated_and_frozen_after_finalize() {
    let store = FlakyStore::failing(0);
    let session = ExamSession::start(exam(60), "alice", store, SessionSettings::default()).unwrap();

    session.set_answer("q1", 1).unwrap();
    let err = session.set_answer("q1", 99).unwrap_err();
    assert!(matches!(err, SessionError::InvalidOption { option_count: 4, .. }));
    assert_eq!(session.get_answer("q1"), Some(1));
    assert_eq!(
        session.set_answer("missing", 0),
        Err(SessionError::UnknownQuestion("missing".to_string()))
    );
    assert_eq!(session.answered_count(), 1);

    session.set_answer("q1", 0).unwrap();
    let submission = session.request_submit().await.unwrap();

    assert_eq!(session.set_answer("q1", 3), Err(SessionError::NotActive));
    assert_eq!(session.get_answer("q1"), Some(0));
    assert_eq!(submission.answers.get("q1"), Some(&0));
    assert_eq!(submission.score, 1);
}

#[tokio::test(start_paused = true)]
async fn persistence_retries_the_same_submission() {
    let store = FlakyStore::failing(2);
    let session = ExamSession::start(exam(60), "alice", store.clone(), SessionSettings::default()).unwrap();
    session.set_answer("q2", 2).unwrap();

    let submission = session.request_submit().await.unwrap();

    assert_eq!(store.save_calls.load(Ordering::SeqCst), 3);
    assert_eq!(session.persistence(), Some(PersistStatus::Saved { attempts: 3 }));
    assert_eq!(store.saved().await, vec![submission.clone()]);
    assert_eq!(session.submission(), Some(submission));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_keep_submission_for_manual_retry() {
    let store = FlakyStore::failing(usize::MAX);
    let (session, observer) = start_observed(exam(60), store.clone(), SessionSettings::default());
    session.set_answer("q1", 0).unwrap();

    let err = session.request_submit().await.unwrap_err();
    assert!(matches!(err, SessionError::StoragePersistFailure { attempts: 3, .. }));
    assert_eq!(session.state(), SessionState::Submitted);
    assert!(store.saved().await.is_empty());

    let retained = session.submission().unwrap();
    assert_eq!(observer.finalized.lock().unwrap().clone(), vec![retained.clone()]);

    // Same error on a repeated submit; nothing is recomputed.
    assert!(session.request_submit().await.is_err());
    assert_eq!(session.submission(), Some(retained.clone()));

    store.recover();
    let saved = session.retry_persist().await.unwrap();
    assert_eq!(saved, retained);
    assert_eq!(store.saved().await, vec![retained.clone()]);
    assert_eq!(session.request_submit().await.unwrap(), retained);

    // Nothing left to do, and observers were told only once.
    assert_eq!(session.retry_persist().await.unwrap(), retained);
    assert_eq!(observer.finalized.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_retry_does_not_block_the_next_one() {
    let store = FlakyStore::failing(usize::MAX);
    let session = ExamSession::start(exam(60), "alice", store.clone(), SessionSettings::default()).unwrap();
    session.set_answer("q1", 0).unwrap();
    assert!(session.request_submit().await.is_err());
    let retained = session.submission().unwrap();

    // The caller stops waiting while the retry is backing off.
    let abandoned = tokio::time::timeout(Duration::from_millis(100), session.retry_persist()).await;
    assert!(abandoned.is_err());

    store.recover();
    assert_eq!(session.retry_persist().await, Ok(retained.clone()));
    assert_eq!(session.persistence(), Some(PersistStatus::Saved { attempts: 2 }));
    assert_eq!(store.saved().await, vec![retained]);
}

#[tokio::test(start_paused = true)]
async fn hung_storage_times_out() {
    let settings = SessionSettings {
        persist: RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(100),
        },
        ..SessionSettings::default()
    };
    let session = ExamSession::start(exam(60), "alice", Arc::new(HangingStore), settings).unwrap();

    match session.request_submit().await {
        Err(SessionError::StoragePersistFailure { attempts, message }) => {
            assert_eq!(attempts, 2);
            assert!(message.contains("timed out"));
        }
        other => panic!("expected persistence failure, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Submitted);
}

#[tokio::test(start_paused = true)]
async fn retry_before_failure_is_rejected() {
    let session =
        ExamSession::start(exam(60), "alice", FlakyStore::failing(0), SessionSettings::default()).unwrap();
    assert_eq!(session.retry_persist().await, Err(SessionError::NothingToRetry));
}

#[tokio::test(start_paused = true)]
async fn low_time_warning_fires_once() {
    let store = FlakyStore::failing(0);
    let (session, observer) = start_observed(exam(600), store, SessionSettings::default());

    tokio::time::advance(Duration::from_secs(299)).await;
    settle().await;
    assert!(!session.status().low_time_warning);

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(observer.low_time.load(Ordering::SeqCst), 1);
    assert!(session.status().low_time_warning);
    assert_eq!(session.status().remaining_seconds, 300);

    let submission = session.finalized().await.unwrap().submission;
    assert_eq!(submission.terminal_reason, TerminalReason::TimerExpired);
    assert_eq!(submission.time_taken_seconds, 600);
    assert_eq!(observer.low_time.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn proctoring_feed_escalates_and_is_released() {
    let store = FlakyStore::failing(0);
    let session = ExamSession::start(exam(60), "alice", store, SessionSettings::default()).unwrap();
    let feed = session.violation_feed(16);
    assert_eq!(session.active_subscriptions(), 2);

    feed.send(ViolationEvent::now(ViolationKind::NoFace, Severity::Medium, "No face detected"))
        .await
        .unwrap();
    for _ in 0..5 {
        feed.send(high()).await.unwrap();
    }

    let submission = session.finalized().await.unwrap().submission;
    assert_eq!(submission.terminal_reason, TerminalReason::ViolationEscalation);
    assert_eq!(submission.violations.total, 6);
    assert_eq!(submission.violations.severity(Severity::Medium), 1);

    // The feed is unsubscribed once the session leaves Active.
    feed.closed().await;
    assert!(feed.send(high()).await.is_err());
    assert_eq!(session.active_subscriptions(), 0);
    assert_eq!(session.violation_counts().total, 6);
}

#[tokio::test(start_paused = true)]
async fn closing_abandons_the_attempt() {
    let store = FlakyStore::failing(0);
    let session = ExamSession::start(exam(60), "alice", store.clone(), SessionSettings::default()).unwrap();
    let feed = session.violation_feed(4);
    session.set_answer("q1", 0).unwrap();

    session.close();
    session.close();

    feed.closed().await;
    assert_eq!(session.active_subscriptions(), 0);
    assert!(session.is_closed());
    assert_eq!(session.request_submit().await, Err(SessionError::Closed));
    assert_eq!(session.finalized().await, Err(SessionError::Closed));
    assert_eq!(session.record_violation(high()), RecordOutcome::Ignored);

    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.submission(), None);
    assert_eq!(store.save_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_session_releases_listeners() {
    let session =
        ExamSession::start(exam(60), "alice", FlakyStore::failing(0), SessionSettings::default()).unwrap();
    let feed = session.violation_feed(4);

    drop(session);

    feed.closed().await;
    assert!(feed.is_closed());
}

#[tokio::test(start_paused = true)]
async fn zero_duration_exam_is_rejected() {
    let result = ExamSession::start(exam(0), "alice", FlakyStore::failing(0), SessionSettings::default());
    assert!(matches!(result, Err(SessionError::InvalidExam(_))));
}

#[tokio::test(start_paused = true)]
async fn malformed_exams_are_rejected() {
    let mut overflowing = (*exam(60)).clone();
    overflowing.questions[0].points = u32::MAX;
    overflowing.questions[1].points = u32::MAX;

    let mut no_options = (*exam(60)).clone();
    no_options.questions[2].options.clear();

    let mut bad_answer_key = (*exam(60)).clone();
    bad_answer_key.questions[1].correct_option = 4;

    let mut duplicate_ids = (*exam(60)).clone();
    duplicate_ids.questions[2].id = "q1".to_string();

    for broken in [overflowing, no_options, bad_answer_key, duplicate_ids] {
        let result = ExamSession::start(
            Arc::new(broken),
            "alice",
            FlakyStore::failing(0),
            SessionSettings::default(),
        );
        assert!(matches!(result, Err(SessionError::InvalidExam(_))));
    }
}
