//! Relay server: HTTP front for the camera and the analysis service
//!
//! - `GET /start_recording`: start a fixed-length capture, returns a session
//! - `GET /recording_status?session=<id>[&wait_ms=<ms>]`: `{isRecording}`
//! - `GET /analyze_video?session=<id>`: forward the clip for analysis
//! - `GET /get_analyzed_video/{video_id}`: stream the processed video

pub mod backend;
pub mod capture;
pub mod jobs;

pub use backend::{AnalysisBackend, BackendError, HttpAnalysisBackend, ProcessedVideo};
pub use capture::{ClipRecorder, FfmpegRecorder};
pub use jobs::{JobError, JobTable};

use crate::config::ServerConfig;
use crate::protocol::{
    ANALYZE_VIDEO_PATH, ANALYZED_VIDEO_PATH, AnalyzeResponse, RECORDING_STATUS_PATH,
    RecordingStatusResponse, START_RECORDING_PATH, SessionId, StartRecordingResponse,
};
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Longest a status request may be held open
pub const MAX_STATUS_WAIT: Duration = Duration::from_secs(30);

/// Shared state for the relay server
pub struct RelayState {
    jobs: JobTable,
    recorder: Arc<dyn ClipRecorder>,
    backend: Arc<dyn AnalysisBackend>,
    record_duration: Duration,
    capture_grace: Duration,
    recordings_dir: PathBuf,
}

impl RelayState {
    pub fn new(
        config: &ServerConfig,
        recorder: Arc<dyn ClipRecorder>,
        backend: Arc<dyn AnalysisBackend>,
    ) -> Self {
        Self {
            jobs: JobTable::new(config.max_jobs),
            recorder,
            backend,
            record_duration: Duration::from_secs(config.record_duration_secs),
            capture_grace: Duration::from_secs(config.capture_grace_secs),
            recordings_dir: config.recordings_dir.clone(),
        }
    }
}

/// Start the relay server with the ffmpeg recorder and HTTP analysis backend
pub async fn start(config: &ServerConfig) -> Result<()> {
    let recorder = Arc::new(FfmpegRecorder::new(
        config.ffmpeg_path.clone(),
        config.camera_stream_url.clone(),
    ));
    let backend = Arc::new(HttpAnalysisBackend::new(&config.analysis_url));
    let state = Arc::new(RelayState::new(config, recorder, backend));

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        "Relay server listening on http://{} (camera {}, analysis {})",
        config.bind,
        config.camera_stream_url,
        config.analysis_url
    );

    serve(listener, state).await
}

/// Serve the relay API on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<RelayState>) -> Result<()> {
    tokio::fs::create_dir_all(&state.recordings_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", state.recordings_dir))?;

    axum::serve(listener, router(state))
        .await
        .context("Relay server error")?;

    Ok(())
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route(START_RECORDING_PATH, get(start_recording))
        .route(RECORDING_STATUS_PATH, get(recording_status))
        .route(ANALYZE_VIDEO_PATH, get(analyze_video))
        .route(
            &format!("{}/{{video_id}}", ANALYZED_VIDEO_PATH),
            get(get_analyzed_video),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_json(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

/// GET /start_recording
async fn start_recording(State(state): State<Arc<RelayState>>) -> Response {
    let (session, started_at) = match state.jobs.begin().await {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!("Rejected recording request: {}", e);
            return error_json(StatusCode::CONFLICT, e);
        }
    };

    tracing::info!("Starting recording {}", session);

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let outcome = capture::capture_clip(
            task_state.recorder.as_ref(),
            &task_state.recordings_dir,
            &session.to_string(),
            task_state.record_duration,
            task_state.capture_grace,
        )
        .await;

        let outcome = match outcome {
            Ok(clip) => {
                tracing::info!("Recording {} complete: {:?}", session, clip);
                Ok(clip)
            }
            Err(e) => {
                tracing::error!("Recording {} failed: {:#}", session, e);
                Err(format!("{:#}", e))
            }
        };
        task_state.jobs.finish(session, outcome).await;
    });

    Json(StartRecordingResponse {
        session_id: session,
        duration_secs: state.record_duration.as_secs(),
        started_at,
    })
    .into_response()
}

#[derive(Deserialize)]
struct StatusQuery {
    session: Option<SessionId>,
    wait_ms: Option<u64>,
}

/// GET /recording_status
async fn recording_status(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let Some(session) = query.session else {
        return error_json(StatusCode::BAD_REQUEST, "Missing session parameter");
    };

    let mut recording = match state.jobs.watch_recording(session).await {
        Ok(rx) => rx,
        Err(e) => return error_json(StatusCode::NOT_FOUND, e),
    };

    let wait = Duration::from_millis(query.wait_ms.unwrap_or(0)).min(MAX_STATUS_WAIT);
    if *recording.borrow() && !wait.is_zero() {
        // Either outcome answers with the current flag
        let _ = tokio::time::timeout(wait, recording.wait_for(|is_recording| !is_recording)).await;
    }

    let is_recording = *recording.borrow();
    Json(RecordingStatusResponse { is_recording }).into_response()
}

#[derive(Deserialize)]
struct AnalyzeQuery {
    session: Option<SessionId>,
}

/// GET /analyze_video
async fn analyze_video(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<AnalyzeQuery>,
) -> (StatusCode, Json<AnalyzeResponse>) {
    let Some(session) = query.session else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AnalyzeResponse::failure("Missing session parameter")),
        );
    };

    let clip = match state.jobs.clip(session).await {
        Ok(clip) => clip,
        Err(e) => {
            let status = match e {
                JobError::NotFound => StatusCode::NOT_FOUND,
                JobError::StillRecording | JobError::Busy => StatusCode::CONFLICT,
                JobError::CaptureFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!("Cannot analyze recording {}: {}", session, e);
            return (status, Json(AnalyzeResponse::failure(e.to_string())));
        }
    };

    match state.backend.analyze(&clip).await {
        Ok(analysis) => {
            if let Some(video_id) = analysis.video_id.as_ref().filter(|_| analysis.success) {
                tracing::info!(
                    "Recording {} analyzed as {:?} (video {})",
                    session,
                    analysis.status,
                    video_id
                );
                state.jobs.set_video_id(session, video_id.clone()).await;
            } else {
                tracing::warn!("Analysis of {} failed: {:?}", session, analysis.message);
            }
            (StatusCode::OK, Json(analysis))
        }
        Err(e) => {
            tracing::error!("Analysis of {} failed: {}", session, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(AnalyzeResponse::failure(e.to_string())),
            )
        }
    }
}

/// GET /get_analyzed_video/{video_id}
async fn get_analyzed_video(
    State(state): State<Arc<RelayState>>,
    Path(video_id): Path<String>,
) -> Response {
    if !state.jobs.has_video(&video_id).await {
        return error_json(StatusCode::NOT_FOUND, "Unknown video");
    }

    match state.backend.fetch_processed(&video_id).await {
        Ok(video) => {
            let content_type = video
                .content_type
                .unwrap_or_else(|| "video/mp4".to_string());
            ([(header::CONTENT_TYPE, content_type)], video.body).into_response()
        }
        Err(BackendError::Status(code)) => {
            tracing::warn!("Processed video {} unavailable: HTTP {}", video_id, code);
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY);
            error_json(status, format!("Processed video unavailable (HTTP {})", code))
        }
        Err(e) => {
            tracing::error!("Failed to fetch processed video {}: {}", video_id, e);
            error_json(StatusCode::BAD_GATEWAY, e)
        }
    }
}
