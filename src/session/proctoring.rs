// src/session/proctoring.rs

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::violation::ViolationEvent;

/// Push source of violation events (tab focus, camera, microphone...).
///
/// How events are detected is up to the implementor; the session only
/// consumes them, in arrival order, until the source ends or the session
/// stops listening.
#[async_trait]
pub trait ProctoringSource: Send + 'static {
    /// Next event, or `None` when the source is exhausted.
    async fn next_violation(&mut self) -> Option<ViolationEvent>;
}

#[async_trait]
impl ProctoringSource for mpsc::Receiver<ViolationEvent> {
    async fn next_violation(&mut self) -> Option<ViolationEvent> {
        self.recv().await
    }
}

#[async_trait]
impl ProctoringSource for mpsc::UnboundedReceiver<ViolationEvent> {
    async fn next_violation(&mut self) -> Option<ViolationEvent> {
        self.recv().await
    }
}
