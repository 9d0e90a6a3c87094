// src/handlers/results.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{error::AppError, storage::ExamStore};

/// Lists stored submissions for one exam, oldest first.
pub async fn list_submissions(
    State(store): State<Arc<dyn ExamStore>>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Unknown exam ids are a 404, not an empty list.
    store.get_exam_by_id(&exam_id).await?;
    let submissions = store.submissions_for_exam(&exam_id).await.map_err(|e| {
        tracing::error!("Failed to list submissions: {:?}", e);
        AppError::from(e)
    })?;
    Ok(Json(submissions))
}
