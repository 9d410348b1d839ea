use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::{lifecycle::NewJob, storage::types::job::CodeLanguage};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, extract::JsonBody};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobParams {
    pub user_id: i64,
    pub challenge_id: i64,
    pub code_language: String,
    /// Base64 encoded source file.
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub job_id: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobsParams {
    pub user_id: i64,
}

pub async fn create_job(
    State(state): State<ApiState>,
    JsonBody(input): JsonBody<CreateJobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let code_language: CodeLanguage = input.code_language.parse()?;

    info!(
        user_id = input.user_id,
        challenge_id = input.challenge_id,
        language = %code_language,
        encoded_bytes = input.code.len(),
        "Received job creation request"
    );

    let job = state
        .lifecycle
        .create(NewJob {
            user_id: input.user_id,
            challenge_id: input.challenge_id,
            code_language,
            code: input.code,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "jobId": job.job_id })),
    ))
}

pub async fn execute_job(
    State(state): State<ApiState>,
    JsonBody(input): JsonBody<JobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = scoped_user(&state, input.user_id)?;
    let total_test_cases = state.lifecycle.execute(&input.job_id, user_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "totalTestCases": total_test_cases })),
    ))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    JsonBody(input): JsonBody<JobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = scoped_user(&state, input.user_id)?;
    state.lifecycle.cancel(&input.job_id, user_id).await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}

pub async fn delete_job(
    State(state): State<ApiState>,
    JsonBody(input): JsonBody<JobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = scoped_user(&state, input.user_id)?;
    state.lifecycle.delete(&input.job_id, user_id).await?;

    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

pub async fn job_exists(
    State(state): State<ApiState>,
    JsonBody(input): JsonBody<JobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = scoped_user(&state, input.user_id)?;
    if !state.lifecycle.exists(&input.job_id, user_id).await? {
        return Err(ApiError::NotFound(format!(
            "Job not found for jobId={}",
            input.job_id
        )));
    }

    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

pub async fn active_jobs(
    State(state): State<ApiState>,
    JsonBody(input): JsonBody<ActiveJobsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.lifecycle.active_jobs(input.user_id).await?;
    let remaining = state.lifecycle.remaining_quota(jobs.len());
    let job_ids: Vec<String> = jobs.into_iter().map(|job| job.job_id).collect();

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "jobIds": job_ids, "remaining": remaining })),
    ))
}

fn scoped_user(state: &ApiState, user_id: Option<i64>) -> Result<Option<i64>, ApiError> {
    if state.config.scope_jobs_to_user && user_id.is_none() {
        return Err(ApiError::ValidationError(
            "'userId' field is required".to_string(),
        ));
    }
    Ok(user_id)
}
