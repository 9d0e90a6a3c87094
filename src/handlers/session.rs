// src/handlers/session.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::{
        question::PublicQuestion,
        violation::{Severity, ViolationEvent, ViolationKind},
    },
    session::{ExamSession, RecordOutcome, SessionRegistry},
    storage::ExamStore,
    utils::jwt::Claims,
};

/// DTO for joining an exam by its code.
#[derive(Debug, Deserialize, Validate)]
pub struct StartSessionRequest {
    #[validate(length(min = 1, max = 32, message = "Exam code must be between 1 and 32 characters."))]
    pub exam_code: String,
}

/// DTO returned when a session starts. Questions never carry the correct option.
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub exam_id: String,
    pub title: String,
    pub duration_seconds: u64,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(min = 1, max = 64))]
    pub question_id: String,
    pub option_index: usize,
}

/// DTO pushed by the proctoring client.
#[derive(Debug, Deserialize, Validate)]
pub struct ViolationRequest {
    pub kind: ViolationKind,
    pub severity: Severity,
    #[validate(length(max = 500))]
    pub description: String,
    /// Defaults to the time of arrival.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ViolationResponse {
    pub recorded: bool,
    pub escalated: bool,
}

/// Looks up a session that belongs to the caller. Someone else's session is reported as missing.
async fn owned_session(
    sessions: &SessionRegistry,
    id: Uuid,
    claims: &Claims,
) -> Result<Arc<ExamSession>, AppError> {
    match sessions.get(&id).await {
        Some(session) if session.student() == claims.sub => Ok(session),
        _ => Err(AppError::NotFound(format!("Session {} not found", id))),
    }
}

/// Starts a timed attempt for the authenticated student.
pub async fn start_session(
    State(store): State<Arc<dyn ExamStore>>,
    State(sessions): State<SessionRegistry>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let exam = store.get_exam_by_code(payload.exam_code.trim()).await?;
    let session = ExamSession::start(Arc::new(exam), claims.sub, store, config.session_settings())?;
    let session = sessions.insert(session).await;

    let exam = session.exam();
    let body = StartSessionResponse {
        session_id: session.id(),
        exam_id: exam.id.clone(),
        title: exam.title.clone(),
        duration_seconds: exam.duration_seconds,
        questions: exam.questions.iter().map(PublicQuestion::from).collect(),
    };

    Ok((StatusCode::CREATED, Json(body)))
}

/// Remaining time, progress, violation counts and, once final, the submission.
pub async fn get_status(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = owned_session(&sessions, id, &claims).await?;
    Ok(Json(session.status()))
}

pub async fn set_answer(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let session = owned_session(&sessions, id, &claims).await?;
    session.set_answer(&payload.question_id, payload.option_index)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts any well-formed event. Events after finalization are dropped, not rejected.
pub async fn record_violation(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ViolationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let session = owned_session(&sessions, id, &claims).await?;
    let outcome = session.record_violation(ViolationEvent {
        kind: payload.kind,
        timestamp: payload.timestamp.unwrap_or_else(Utc::now),
        severity: payload.severity,
        description: payload.description,
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ViolationResponse {
            recorded: outcome != RecordOutcome::Ignored,
            escalated: outcome == RecordOutcome::Escalated,
        }),
    ))
}

/// Submits the exam. Calling it again returns the same submission.
pub async fn submit(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = owned_session(&sessions, id, &claims).await?;
    let submission = session.request_submit().await?;
    Ok(Json(submission))
}

/// Retries saving a submission whose persistence failed.
pub async fn retry_persist(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = owned_session(&sessions, id, &claims).await?;
    let submission = session.retry_persist().await?;
    Ok(Json(submission))
}

/// Leaves the session. An unsubmitted attempt is abandoned.
pub async fn close_session(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    owned_session(&sessions, id, &claims).await?;
    sessions.remove(&id).await;
    Ok(StatusCode::NO_CONTENT)
}
