use serde::Serialize;
use thiserror::Error;

/// Failures that end a workflow run in `WorkflowState::Failed`
///
/// Every remote-call failure is translated into one of these at the boundary
/// of the component that issued the call, so nothing propagates to the UI as
/// an unhandled error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum WorkflowError {
    #[error("Could not start recording: {0}")]
    RecordingStartFailed(String),

    #[error("A recording is already in progress")]
    RecordingConflict,

    #[error("Recording did not report completion after {0} status checks")]
    RecordingTimedOut(u32),

    #[error("{0}")]
    AnalysisFailed(String),

    #[error("Analysis did not answer within {0} seconds")]
    AnalysisTimedOut(u64),

    #[error("Processed video is unavailable: {0}")]
    ArtifactUnavailable(String),
}

impl WorkflowError {
    /// Message shown when the analysis service fails without explaining why
    pub const GENERIC_ANALYSIS_MESSAGE: &'static str = "Video analysis failed. Please try again.";

    /// Whether `analyze` may be retried from this failure without a new recording
    pub fn is_analysis_phase(&self) -> bool {
        matches!(
            self,
            WorkflowError::AnalysisFailed(_)
                | WorkflowError::AnalysisTimedOut(_)
                | WorkflowError::ArtifactUnavailable(_)
        )
    }

    /// Analysis failure carrying the server message, or the generic one if absent
    pub fn analysis_failed(message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| Self::GENERIC_ANALYSIS_MESSAGE.to_string());
        WorkflowError::AnalysisFailed(message)
    }
}

/// Errors talking to the relay server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Relay unreachable: {0}")]
    Transport(String),

    #[error("Relay answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Relay is already recording")]
    Conflict,

    #[error("Expected a JSON response, got content type {0:?}")]
    NotJson(String),

    #[error("Malformed relay response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RelayError::Decode(e.to_string())
        } else {
            RelayError::Transport(e.to_string())
        }
    }
}

impl From<RelayError> for WorkflowError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Conflict => WorkflowError::RecordingConflict,
            other => WorkflowError::RecordingStartFailed(other.to_string()),
        }
    }
}
