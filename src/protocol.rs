//! Wire types shared by the relay client and the relay server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const START_RECORDING_PATH: &str = "/start_recording";
pub const RECORDING_STATUS_PATH: &str = "/recording_status";
pub const ANALYZE_VIDEO_PATH: &str = "/analyze_video";
pub const ANALYZED_VIDEO_PATH: &str = "/get_analyzed_video";

/// Status reported by the analysis service when a person is in danger
pub const DANGER_STATUS: &str = "InDanger";

/// Identifies one recording job on the relay
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// Reply to `GET /start_recording`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StartRecordingResponse {
    pub session_id: SessionId,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
}

/// Reply to `GET /recording_status`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingStatusResponse {
    #[serde(rename = "isRecording")]
    pub is_recording: bool,
}

/// Reply to `GET /analyze_video`, also the downstream `handle_video` contract
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalyzeResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_uses_camel_case_field() {
        let status: RecordingStatusResponse =
            serde_json::from_str(r#"{"isRecording": false}"#).unwrap();
        assert!(!status.is_recording);
        assert_eq!(
            serde_json::to_string(&RecordingStatusResponse { is_recording: true }).unwrap(),
            r#"{"isRecording":true}"#
        );
    }

    #[test]
    fn test_analyze_response_tolerates_missing_fields() {
        let response: AnalyzeResponse =
            serde_json::from_str(r#"{"success": true, "video_id": "v1", "status": "InDanger"}"#)
                .unwrap();
        assert!(response.success);
        assert_eq!(response.video_id.as_deref(), Some("v1"));
        assert_eq!(response.duration, None);
        assert_eq!(response.message, None);

        let failure: AnalyzeResponse =
            serde_json::from_str(r#"{"success": false, "message": "x"}"#).unwrap();
        assert_eq!(failure, AnalyzeResponse::failure("x"));
    }

    #[test]
    fn test_session_id_parses_its_display_form() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-session".parse::<SessionId>().is_err());
    }
}
