//! Client side of the relay server contract
//!
//! The workflow only ever talks to the relay through [`RelayApi`], so tests
//! can stand in a scripted relay without any HTTP.

use crate::error::RelayError;
use crate::messages::RecordingSession;
use crate::protocol::{
    ANALYZE_VIDEO_PATH, ANALYZED_VIDEO_PATH, AnalyzeResponse, RECORDING_STATUS_PATH,
    RecordingStatusResponse, START_RECORDING_PATH, SessionId, StartRecordingResponse,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Ask the relay to start a fixed-duration capture
    async fn start_recording(&self) -> Result<RecordingSession, RelayError>;

    /// Whether the relay is still recording `session`
    ///
    /// With `wait` set, the relay may hold the request until the recording
    /// finishes or `wait` elapses.
    async fn recording_status(
        &self,
        session: SessionId,
        wait: Option<Duration>,
    ) -> Result<bool, RelayError>;

    /// Forward the clip of `session` to the analysis service
    async fn analyze_video(&self, session: SessionId) -> Result<AnalyzeResponse, RelayError>;

    /// Confirm the processed video for `video_id` can be retrieved
    async fn fetch_analyzed_video(&self, video_id: &str) -> Result<(), RelayError>;

    /// Playable reference to the processed video
    fn artifact_url(&self, video_id: &str) -> String;
}

/// HTTP client for the relay server
#[derive(Clone)]
pub struct HttpRelay {
    client: Client,
    base_url: String,
}

impl HttpRelay {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("json"))
        .unwrap_or(false)
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string()
}

async fn status_error(response: Response) -> RelayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    RelayError::Status { status, body }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, RelayError> {
    if !is_json(&response) {
        return Err(RelayError::NotJson(content_type(&response)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| RelayError::Decode(e.to_string()))
}

#[async_trait]
impl RelayApi for HttpRelay {
    async fn start_recording(&self) -> Result<RecordingSession, RelayError> {
        let response = self.client.get(self.url(START_RECORDING_PATH)).send().await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(RelayError::Conflict);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let accepted: StartRecordingResponse = decode_json(response).await?;
        tracing::debug!("Relay accepted recording {}", accepted.session_id);
        Ok(accepted.into())
    }

    async fn recording_status(
        &self,
        session: SessionId,
        wait: Option<Duration>,
    ) -> Result<bool, RelayError> {
        let mut request = self
            .client
            .get(self.url(RECORDING_STATUS_PATH))
            .query(&[("session", session.to_string())])
            .timeout(wait.unwrap_or_default() + STATUS_REQUEST_TIMEOUT);

        if let Some(wait) = wait {
            request = request.query(&[("wait_ms", wait.as_millis().to_string())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let status: RecordingStatusResponse = decode_json(response).await?;
        Ok(status.is_recording)
    }

    async fn analyze_video(&self, session: SessionId) -> Result<AnalyzeResponse, RelayError> {
        let response = self
            .client
            .get(self.url(ANALYZE_VIDEO_PATH))
            .query(&[("session", session.to_string())])
            .send()
            .await?;

        // Failures still carry a JSON body with the server's message
        if !response.status().is_success() && !is_json(&response) {
            return Err(status_error(response).await);
        }

        decode_json(response).await
    }

    async fn fetch_analyzed_video(&self, video_id: &str) -> Result<(), RelayError> {
        let response = self.client.get(self.artifact_url(video_id)).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        // Availability is all we need; the body is streamed by the player later
        drop(response);
        Ok(())
    }

    fn artifact_url(&self, video_id: &str) -> String {
        format!("{}{}/{}", self.base_url, ANALYZED_VIDEO_PATH, video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_url_joins_base_and_video_id() {
        let relay = HttpRelay::new("http://relay.local:3001/");
        assert_eq!(
            relay.artifact_url("v1"),
            "http://relay.local:3001/get_analyzed_video/v1"
        );
    }
}
