// HTTP interface - job submission, status polling and one-shot file download

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{AvailableOptions, FormatDescriptor, JobStatus, SelectionCriteria};
use crate::downloader::registry::ClaimError;
use crate::downloader::tools::{ToolInfo, ToolManager};
use crate::downloader::utils::canonicalize_source;
use crate::downloader::{DownloadError, DownloadOrchestrator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub tools: Arc<ToolManager>,
}

/// Error response: `{status: "error", message}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let status = match &err {
            DownloadError::InvalidSource(_) => StatusCode::BAD_REQUEST,
            DownloadError::JobNotFound(_) => StatusCode::NOT_FOUND,
            DownloadError::ArtifactExpired(_) => StatusCode::GONE,
            DownloadError::NoMatchingFormat | DownloadError::ExplicitFormatNotFound(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.user_message())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/parse-url", post(parse_url))
        .route("/formats", post(list_formats))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(job_status))
        .route("/jobs/{id}/file", get(job_file))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!("[Api] Invalid CORS_ORIGIN {:?}, allowing any origin", origin);
                AllowOrigin::any()
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    tools: Vec<ToolInfo>,
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let tools = Arc::clone(&state.tools);
    let tools = tokio::task::spawn_blocking(move || tools.get_all_tools())
        .await
        .map_err(|e| ApiError::internal(format!("Tool probe failed: {}", e)))?;

    Ok(Json(HealthResponse {
        status: "ok",
        message: "YouTube fetcher is running",
        tools,
    }))
}

#[derive(Debug, Deserialize)]
struct UrlRequest {
    #[serde(default)]
    url: String,
}

async fn parse_url(payload: Result<Json<UrlRequest>, JsonRejection>) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = payload?;
    if req.url.trim().is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let source = canonicalize_source(&req.url)?;
    Ok(Json(json!({
        "status": "success",
        "videoId": source.video_id,
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatsResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    formats: Vec<FormatDescriptor>,
    available_options: AvailableOptions,
    ffmpeg_available: bool,
    can_merge: bool,
}

async fn list_formats(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> ApiResult<Json<FormatsResponse>> {
    let Json(req) = payload?;
    if req.url.trim().is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }
    let source = canonicalize_source(&req.url)?;

    match state.orchestrator.list_catalog(&source).await {
        Ok(catalog) => {
            let merge_tool = Arc::clone(state.orchestrator.merge_tool());
            let ffmpeg_available = tokio::task::spawn_blocking(move || merge_tool.available())
                .await
                .unwrap_or(false);

            Ok(Json(FormatsResponse {
                status: "success",
                message: None,
                video_id: catalog.video_id.clone(),
                title: Some(catalog.title.clone()),
                available_options: FormatSelector::available_options(&catalog.formats),
                formats: catalog.formats,
                ffmpeg_available,
                can_merge: ffmpeg_available,
            }))
        }
        Err(e) => {
            tracing::warn!("[Api] Format listing failed for {}: {}", source.video_id, e);
            Ok(Json(FormatsResponse {
                status: "limited",
                message: Some(
                    "Could not load the format list. A download with default settings may still work."
                        .to_string(),
                ),
                video_id: source.video_id,
                title: None,
                formats: Vec::new(),
                available_options: AvailableOptions::default(),
                ffmpeg_available: false,
                can_merge: false,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    #[serde(default, alias = "url")]
    source_url: String,
    #[serde(default)]
    criteria: SelectionCriteria,
}

async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let Json(req) = payload?;
    if req.source_url.trim().is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let job_id = state.orchestrator.start(&req.source_url, req.criteria)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let snapshot = state
        .orchestrator
        .registry()
        .snapshot(&id)
        .ok_or_else(|| ApiError::from(DownloadError::JobNotFound(id.clone())))?;

    Ok(Json(snapshot).into_response())
}

/// Removes the artifact once the response body is dropped, whether the
/// client read it to the end or disconnected
struct DeleteOnDrop {
    path: PathBuf,
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("[Api] Artifact {} delivered and removed", self.path.display()),
            Err(e) => tracing::warn!("[Api] Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

async fn job_file(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let registry = state.orchestrator.registry();
    let job = registry
        .get(&id)
        .ok_or_else(|| ApiError::from(DownloadError::JobNotFound(id.clone())))?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::bad_request("Job is not completed yet"));
    }
    if job.artifact_claimed {
        return Err(DownloadError::ArtifactExpired(id).into());
    }
    let artifact = job
        .result
        .ok_or_else(|| ApiError::internal("Job has no artifact"))?;

    let file = tokio::fs::File::open(&artifact.file_path).await.map_err(|e| {
        tracing::error!("[Api] Artifact {} unreadable: {}", artifact.file_path.display(), e);
        ApiError::internal("File not found on server")
    })?;

    // Lost races end here; only one request gets past the claim
    registry.claim_artifact(&id).map_err(|e| match e {
        ClaimError::AlreadyClaimed => ApiError::from(DownloadError::ArtifactExpired(id.clone())),
        ClaimError::NotFound => ApiError::from(DownloadError::JobNotFound(id.clone())),
        ClaimError::NotCompleted => ApiError::bad_request("Job is not completed yet"),
    })?;

    let length = file.metadata().await.ok().map(|m| m.len());
    let guard = DeleteOnDrop {
        path: artifact.file_path.clone(),
    };
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _keep = &guard;
        chunk
    });

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&artifact.suggested_filename)),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&artifact.suggested_filename),
    );
    if let Some(len) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok(response)
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "3gp" => "video/3gpp",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// `attachment` with an ASCII fallback name plus the RFC 5987 UTF-8 form
fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
