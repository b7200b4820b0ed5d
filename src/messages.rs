use crate::error::WorkflowError;
use crate::protocol::{DANGER_STATUS, SessionId, StartRecordingResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder shown instead of the live camera while the relay records
pub const BLANK_FEED: &str = "about:blank";

/// Commands for the workflow coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowCommand {
    Record,
    Analyze,
    Reset,
}

/// Workflow phase (observable via watch channel)
///
/// Exactly one phase is active at a time and only coordinator transitions
/// replace it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    CountingDown { seconds_remaining: u32 },
    Recording,
    AwaitingAnalysis,
    Analyzing { progress_percent: u8 },
    Result {
        verdict: Verdict,
        artifact_ref: Option<String>,
    },
    Failed { reason: WorkflowError },
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "Idle",
            WorkflowState::CountingDown { .. } => "Counting down",
            WorkflowState::Recording => "Recording",
            WorkflowState::AwaitingAnalysis => "Awaiting analysis",
            WorkflowState::Analyzing { .. } => "Analyzing",
            WorkflowState::Result { .. } => "Result",
            WorkflowState::Failed { .. } => "Failed",
        }
    }

    /// `Result` and `Failed` end a run; only a reset leaves them
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Result { .. } | WorkflowState::Failed { .. })
    }

    /// Progress indicator value for this phase
    ///
    /// A result is only reached after the analysis service answered, so it
    /// always reads as complete.
    pub fn progress_percent(&self) -> u8 {
        match self {
            WorkflowState::Analyzing { progress_percent } => *progress_percent,
            WorkflowState::Result { .. } => 100,
            _ => 0,
        }
    }

    /// Camera feed the UI should display in this phase
    pub fn camera_feed<'a>(&self, live_feed: &'a str) -> &'a str {
        match self {
            WorkflowState::CountingDown { .. } | WorkflowState::Recording => BLANK_FEED,
            _ => live_feed,
        }
    }
}

/// Everything a presentation layer needs to render the workflow
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub result: Option<AnalysisResult>,
    pub camera_feed: String,
    pub progress_percent: u8,
}

impl WorkflowSnapshot {
    pub fn new(state: WorkflowState, result: Option<AnalysisResult>, live_feed: &str) -> Self {
        Self {
            camera_feed: state.camera_feed(live_feed).to_string(),
            progress_percent: state.progress_percent(),
            state,
            result,
        }
    }
}

/// Binary classification derived from the analysis service's status field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    InDanger,
    Safe,
}

impl Verdict {
    /// Only the literal `InDanger` status means danger; anything else is safe
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some(DANGER_STATUS) => Verdict::InDanger,
            _ => Verdict::Safe,
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }
}

/// Outcome of a successful analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub video_id: String,
    pub verdict: Verdict,
    pub duration_seconds: Option<f64>,
    pub artifact_url: Option<String>,
}

/// A recording job accepted by the relay
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub expected_duration_seconds: u64,
}

impl From<StartRecordingResponse> for RecordingSession {
    fn from(response: StartRecordingResponse) -> Self {
        Self {
            session_id: response.session_id,
            started_at: response.started_at,
            expected_duration_seconds: response.duration_secs,
        }
    }
}

/// Attempt bookkeeping for one polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingContext {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollingContext {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            interval,
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// How a polling loop ended (cancellation produces no outcome at all)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The relay reported `isRecording: false`
    Completed { attempts: u32 },
    /// The attempt budget ran out without a positive answer
    Exhausted { attempts: u32 },
}

/// Internal events fed back into the coordinator by its timers and requests
#[derive(Debug)]
pub(crate) enum WorkflowEvent {
    CountdownTick { seconds_remaining: u32 },
    RecordingStarted(RecordingSession),
    RecordingStartFailed(WorkflowError),
    RecordingFinished(PollOutcome),
    AnalysisProgress(u8),
    AnalysisFinished(Result<AnalysisResult, WorkflowError>),
}

/// An event stamped with the run generation that produced it
#[derive(Debug)]
pub(crate) struct TaggedEvent {
    pub generation: u64,
    pub event: WorkflowEvent,
}
