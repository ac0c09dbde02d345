use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::dto::quiz_dto::{BuildQuizPayload, GenerateQuestionsPayload};
use crate::error::{Error, Result};
use crate::services::generation_service::GenerateOptions;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/quiz/availability",
    responses(
        (status = 200, description = "Model backend availability", body = Json<serde_json::Value>),
    ),
)]
pub async fn availability(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let available = state.generation.check_availability().await;
    Ok(Json(json!({
        "available": available,
        "backend": state.backend.as_str(),
    })))
}

#[utoipa::path(
    post,
    path = "/api/quiz/generate",
    request_body = GenerateQuestionsPayload,
    responses(
        (status = 200, description = "Questions generated", body = Json<serde_json::Value>),
        (status = 400, description = "Invalid request payload"),
        (status = 503, description = "Model backend required but unavailable"),
    ),
)]
pub async fn generate_questions(
    State(state): State<AppState>,
    Json(payload): Json<GenerateQuestionsPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let options = GenerateOptions {
        require_model: payload.require_model,
        deadline: Some(Instant::now() + state.build_timeout),
    };
    let section = payload.into_section(state.max_questions_per_section)?;

    let output = state
        .generation
        .generate(&section.subject, &section.level, section.count, &options, None)
        .await?;
    Ok(Json(output))
}

#[utoipa::path(
    post,
    path = "/api/quiz/build",
    request_body = BuildQuizPayload,
    responses(
        (status = 200, description = "Quiz built", body = Json<serde_json::Value>),
        (status = 400, description = "Invalid request payload"),
        (status = 503, description = "Model backend required but unavailable"),
        (status = 500, description = "Quiz build timed out"),
    ),
)]
pub async fn build_quiz(
    State(state): State<AppState>,
    Json(payload): Json<BuildQuizPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let options = GenerateOptions {
        require_model: payload.require_model,
        deadline: Some(Instant::now() + state.build_timeout),
    };
    let sections = payload.into_sections(state.max_questions_per_section)?;

    // The deadline stops new work at attempt boundaries; the outer timeout
    // covers an attempt that is still in flight when it passes.
    let grace = state.build_timeout + state.attempt_timeout;
    let build = state.generation.build_quiz(&sections, &options, None);
    let output = match tokio::time::timeout(grace, build).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(sections = sections.len(), "Quiz build timed out");
            return Err(Error::Internal("Quiz build timed out".to_string()));
        }
    };

    Ok(Json(json!({
        "questions": output.questions,
        "report": output.report,
    })))
}

#[utoipa::path(
    post,
    path = "/api/quiz/jobs",
    request_body = BuildQuizPayload,
    responses(
        (status = 202, description = "Quiz build job enqueued", body = Json<serde_json::Value>),
        (status = 400, description = "Invalid request payload"),
    ),
)]
pub async fn enqueue_quiz_job(
    State(state): State<AppState>,
    Json(payload): Json<BuildQuizPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let require_model = payload.require_model;
    let sections = payload.into_sections(state.max_questions_per_section)?;
    let id = state.jobs.enqueue(sections, require_model).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"job_id": id}))))
}

#[utoipa::path(
    get,
    path = "/api/quiz/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Quiz job ID")
    ),
    responses(
        (status = 200, description = "Quiz job status retrieved successfully", body = Json<serde_json::Value>),
        (status = 404, description = "Job not found"),
    ),
)]
pub async fn get_quiz_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let job = state.jobs.get(id).await?;
    Ok(Json(job))
}
