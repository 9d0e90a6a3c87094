// src/session/mod.rs

pub mod answers;
pub mod clock;
pub mod coordinator;
pub mod monitor;
pub mod proctoring;
pub mod registry;
pub mod scoring;
pub mod subscription;

pub use coordinator::{
    ExamSession, Finalized, PersistStatus, RetryPolicy, SessionObserver, SessionSettings,
    SessionStatus,
};
pub use monitor::{EscalationPolicy, RecordOutcome, SeverityThreshold};
pub use proctoring::ProctoringSource;
pub use registry::SessionRegistry;
