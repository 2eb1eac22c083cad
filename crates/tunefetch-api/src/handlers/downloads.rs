// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tunefetch_application::{AppState, ResolveError};
use tunefetch_domain::{DownloadJob, JobId, JobOutput, JobStatus, SearchQuery, StoredFile};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchAndDownloadRequest {
    pub song_name: String,
    #[serde(default)]
    pub artist: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectDownloadRequest {
    pub song_url: String,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStartedResponse {
    pub download_id: String,
    pub message: String,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatusResponse {
    pub download_id: String,
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub label: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl From<DownloadJob> for DownloadStatusResponse {
    fn from(job: DownloadJob) -> Self {
        Self {
            download_id: job.id.to_string(),
            status: job.status.as_str().to_string(),
            progress: job.progress,
            error: job.error,
            label: job.label,
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn started(result: Result<DownloadJob, ResolveError>, message: &str) -> Response {
    match result {
        Ok(job) => (
            StatusCode::OK,
            Json(DownloadStartedResponse {
                download_id: job.id.to_string(),
                message: message.to_string(),
                status: job.status.as_str().to_string(),
            }),
        )
            .into_response(),
        Err(ResolveError::InvalidRequest(reason)) => error_response(StatusCode::BAD_REQUEST, reason),
        Err(err) => {
            warn!(target: "api", error = %err, "could not start download");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.user_message())
        }
    }
}

fn lookup(state: &AppState, id: &str) -> Option<DownloadJob> {
    id.parse::<JobId>().ok().and_then(|id| state.jobs().get(id))
}

/// Search the music site for a song and download the best match.
#[utoipa::path(
    post,
    path = "/api/search-and-download",
    request_body = SearchAndDownloadRequest,
    responses(
        (status = 200, description = "Download job started", body = DownloadStartedResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "downloads"
)]
pub async fn search_and_download(
    State(state): State<AppState>,
    Json(request): Json<SearchAndDownloadRequest>,
) -> impl IntoResponse {
    let query = SearchQuery::new(request.song_name.trim(), request.artist);
    info!(target: "api", %query, "search-and-download requested");
    started(
        state.downloads.start_search(query),
        "Search started. Poll the status endpoint for progress.",
    )
}

/// Download from a known song page, optionally with an already known audio URL.
#[utoipa::path(
    post,
    path = "/api/direct-download",
    request_body = DirectDownloadRequest,
    responses(
        (status = 200, description = "Download job started", body = DownloadStartedResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "downloads"
)]
pub async fn direct_download(
    State(state): State<AppState>,
    Json(request): Json<DirectDownloadRequest>,
) -> impl IntoResponse {
    info!(target: "api", song_url = %request.song_url, has_audio_url = request.audio_url.is_some(), "direct download requested");
    started(
        state
            .downloads
            .start_direct(&request.song_url, request.audio_url.as_deref()),
        "Download started. Poll the status endpoint for progress.",
    )
}

#[utoipa::path(
    get,
    path = "/api/download-status/{id}",
    params(("id" = String, Path, description = "Download job id")),
    responses(
        (status = 200, description = "Current job state", body = DownloadStatusResponse),
        (status = 404, description = "Unknown job", body = ErrorResponse)
    ),
    tag = "downloads"
)]
pub async fn download_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match lookup(&state, &id) {
        Some(job) => (StatusCode::OK, Json(DownloadStatusResponse::from(job))).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Download not found"),
    }
}

fn content_type_for(file: &StoredFile) -> &'static str {
    let extension = file
        .path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("mp4") | Some("m4a") | Some("aac") => "audio/mp4",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

async fn stream_file(file: &StoredFile) -> Response {
    let handle = match tokio::fs::File::open(&file.path).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(target: "api", path = %file.path.display(), error = %err, "stored file missing");
            return error_response(StatusCode::NOT_FOUND, "File is no longer available");
        }
    };
    let name = file
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("audio")
        .replace('"', "");

    (
        [
            (header::CONTENT_TYPE, content_type_for(file).to_string()),
            (header::CONTENT_LENGTH, file.byte_size.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
        ],
        Body::from_stream(ReaderStream::new(handle)),
    )
        .into_response()
}

/// Stream the downloaded file, or redirect to the audio URL when files are not stored.
#[utoipa::path(
    get,
    path = "/api/download-file/{id}",
    params(("id" = String, Path, description = "Download job id")),
    responses(
        (status = 200, description = "Audio file"),
        (status = 307, description = "Redirect to the resolved audio URL"),
        (status = 404, description = "Unknown or unfinished job", body = ErrorResponse)
    ),
    tag = "downloads"
)]
pub async fn download_file(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(job) = lookup(&state, &id) else {
        return error_response(StatusCode::NOT_FOUND, "Download not found");
    };
    match (&job.status, &job.output) {
        (JobStatus::Completed, Some(JobOutput::File { file, .. })) => stream_file(file).await,
        (JobStatus::Completed, Some(JobOutput::Remote { audio_url })) => {
            Redirect::temporary(audio_url).into_response()
        }
        _ => error_response(StatusCode::NOT_FOUND, "File not ready"),
    }
}
