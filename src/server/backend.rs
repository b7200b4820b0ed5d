use crate::protocol::AnalyzeResponse;
use async_trait::async_trait;
use axum::body::Body;
use futures::TryStreamExt;
use reqwest::{Client, header, multipart};
use std::path::Path;
use thiserror::Error;

const HANDLE_VIDEO_PATH: &str = "/handle_video";
const HANDLED_VIDEO_PATH: &str = "/get_handled_video";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to read clip: {0}")]
    Clip(#[from] std::io::Error),

    #[error("Analysis service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Analysis service answered with HTTP {0}")]
    Status(u16),
}

/// A processed video on its way back to the client
pub struct ProcessedVideo {
    pub content_type: Option<String>,
    pub body: Body,
}

/// The downstream service that judges a clip and renders the processed video
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, clip: &Path) -> Result<AnalyzeResponse, BackendError>;

    async fn fetch_processed(&self, video_id: &str) -> Result<ProcessedVideo, BackendError>;
}

pub struct HttpAnalysisBackend {
    client: Client,
    base_url: String,
}

impl HttpAnalysisBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisBackend {
    async fn analyze(&self, clip: &Path) -> Result<AnalyzeResponse, BackendError> {
        let bytes = tokio::fs::read(clip).await?;
        let file_name = clip
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.mp4".to_string());

        tracing::info!("Uploading {} ({} bytes) for analysis", file_name, bytes.len());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = multipart::Form::new().part("video", part);

        let response = self
            .client
            .post(format!("{}{}", self.base_url, HANDLE_VIDEO_PATH))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        match response.json::<AnalyzeResponse>().await {
            Ok(analysis) => Ok(analysis),
            Err(_) if !status.is_success() => Err(BackendError::Status(status.as_u16())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_processed(&self, video_id: &str) -> Result<ProcessedVideo, BackendError> {
        let response = self
            .client
            .get(format!("{}{}/{}", self.base_url, HANDLED_VIDEO_PATH, video_id))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ProcessedVideo {
            content_type,
            body: Body::from_stream(response.bytes_stream().inspect_err(|e| {
                tracing::warn!("Processed video stream broke off: {}", e);
            })),
        })
    }
}
