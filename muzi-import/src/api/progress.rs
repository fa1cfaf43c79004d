//! Progress streams (SSE)
//!
//! GET /import/:job_id/progress, plus the query-string form used by the
//! existing front end: GET /import/spotify/progress?job=<id> and
//! GET /import/lastfm/progress?job=<id>.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use muzi_common::sse::progress_sse_stream;
use serde::Deserialize;

use super::auth::UserId;
use crate::error::ApiResult;
use crate::models::JobId;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub job: String,
}

async fn stream_for(state: &AppState, job_id: JobId, user_id: i64) -> ApiResult<impl IntoResponse> {
    let rx = state.jobs.subscribe(&job_id, user_id).await?;
    tracing::debug!(job_id = %job_id, user_id, "Progress consumer attached");
    Ok(progress_sse_stream(rx))
}

/// GET /import/:job_id/progress
pub async fn job_progress(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    stream_for(&state, JobId::from(job_id), user_id).await
}

/// GET /import/{spotify,lastfm}/progress?job=<id>
pub async fn job_progress_query(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ProgressQuery>,
) -> ApiResult<impl IntoResponse> {
    stream_for(&state, JobId::from(query.job), user_id).await
}

pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/import/spotify/progress", get(job_progress_query))
        .route("/import/lastfm/progress", get(job_progress_query))
        .route("/import/:job_id/progress", get(job_progress))
}
