//! Import endpoints
//!
//! POST /import/spotify, POST /import/lastfm, POST /import/:job_id/cancel,
//! GET /import/jobs

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header::CONTENT_TYPE,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::auth::UserId;
use crate::error::{ApiError, ApiResult};
use crate::models::{JobId, Platform};
use crate::services::{ImportError, JobSummary, LastFmImporter, SpotifyImporter};
use crate::sources::{self, LastFmClient, LastFmCredentials};
use crate::AppState;

/// Multipart field carrying export files
pub const UPLOAD_FIELD: &str = "json_files";

/// Response for an accepted import
#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub job_id: JobId,
    pub status: &'static str,
}

impl StartImportResponse {
    fn started(job_id: JobId) -> Self {
        Self {
            job_id,
            status: "started",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelImportResponse {
    pub job_id: JobId,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
}

/// Reject names that could escape a directory
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Read the uploaded export files, enforcing count and size limits
async fn read_uploads(
    multipart: &mut Multipart,
    max_files: usize,
    max_bytes: usize,
) -> ApiResult<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        if files.len() >= max_files {
            return Err(ApiError::PayloadTooLarge(format!(
                "at most {} files per upload",
                max_files
            )));
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("upload-{}.json", files.len() + 1));
        if !is_safe_file_name(&name) {
            return Err(ApiError::BadRequest(format!("invalid file name: {}", name)));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            if data.len() + chunk.len() > max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "{} exceeds the {} byte limit",
                    name, max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }

        files.push((name, data));
    }

    Ok(files)
}

/// POST /import/spotify
///
/// Multipart upload of Spotify export files. The import runs in the
/// background; progress is streamed from `/import/:job_id/progress`.
pub async fn start_spotify_import(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    mut multipart: Multipart,
) -> ApiResult<Json<StartImportResponse>> {
    let files = read_uploads(
        &mut multipart,
        state.config.max_upload_files,
        state.config.max_upload_bytes,
    )
    .await?;
    if files.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "no files uploaded in field '{}'",
            UPLOAD_FIELD
        )));
    }

    let report = sources::decode_exports_blocking(files, user_id)
        .await
        .map_err(|e| ApiError::Internal(format!("export decoding aborted: {}", e)))?;
    if report.all_failed() {
        return Err(ApiError::BadRequest(
            "none of the uploaded files is a valid Spotify export".to_string(),
        ));
    }

    tracing::info!(
        user_id,
        files = report.decoded_files,
        skipped = report.skipped_files.len(),
        rejected = report.failures.len(),
        events = report.events.len(),
        "Spotify export accepted"
    );

    let importer = SpotifyImporter::new(state.db.clone(), &state.config);
    let handle = state.jobs.register(user_id, Platform::Spotify).await;
    let job_id = handle.job_id().clone();
    let last_error = Arc::clone(&state.last_error);
    let events = report.events;

    state.jobs.spawn(handle, move |mut reporter, cancel| async move {
        if let Err(e) = importer.run(user_id, events, &mut reporter, &cancel).await {
            record_failure(&last_error, Platform::Spotify, &e).await;
        }
    });

    Ok(Json(StartImportResponse::started(job_id)))
}

/// Credentials arrive as a form post from the front end, or as JSON
async fn read_credentials(request: Request) -> ApiResult<LastFmCredentials> {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let credentials = if is_json {
        let Json(credentials) = Json::<LastFmCredentials>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        credentials
    } else {
        let Form(credentials) = Form::<LastFmCredentials>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        credentials
    };

    if credentials.username.trim().is_empty() || credentials.api_key.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "lastfm_username and lastfm_api_key are required".to_string(),
        ));
    }
    Ok(LastFmCredentials {
        username: credentials.username.trim().to_string(),
        api_key: credentials.api_key.trim().to_string(),
    })
}

/// POST /import/lastfm
pub async fn start_lastfm_import(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    request: Request,
) -> ApiResult<Json<StartImportResponse>> {
    let credentials = read_credentials(request).await?;
    tracing::info!(user_id, lastfm_user = %credentials.username, "LastFM import requested");

    let client = LastFmClient::new(&state.config, credentials, user_id)
        .map_err(|e| ApiError::Internal(format!("cannot build HTTP client: {}", e)))?;
    let source = Arc::new(client);

    let importer = LastFmImporter::new(state.db.clone(), &state.config);
    let handle = state.jobs.register(user_id, Platform::LastFm).await;
    let job_id = handle.job_id().clone();
    let last_error = Arc::clone(&state.last_error);

    state.jobs.spawn(handle, move |mut reporter, cancel| async move {
        if let Err(e) = importer.run(user_id, source, &mut reporter, &cancel).await {
            record_failure(&last_error, Platform::LastFm, &e).await;
        }
    });

    Ok(Json(StartImportResponse::started(job_id)))
}

async fn record_failure(
    last_error: &tokio::sync::RwLock<Option<String>>,
    source: Platform,
    error: &ImportError,
) {
    if matches!(error, ImportError::Cancelled) {
        return;
    }
    tracing::error!(source = %source, error = %error, "Import job failed");
    *last_error.write().await = Some(format!("{} import failed: {}", source, error));
}

/// POST /import/:job_id/cancel
pub async fn cancel_import(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelImportResponse>> {
    let job_id = JobId::from(job_id);
    if !state.jobs.cancel(&job_id, user_id).await? {
        return Err(ApiError::Conflict(format!("import job {} already finished", job_id)));
    }
    Ok(Json(CancelImportResponse {
        job_id,
        status: "cancelling",
    }))
}

/// GET /import/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.jobs.active_jobs(Some(user_id)).await,
    })
}

pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/spotify", post(start_spotify_import))
        .route("/import/lastfm", post(start_lastfm_import))
        .route("/import/jobs", get(list_jobs))
        .route("/import/:job_id/cancel", post(cancel_import))
}
