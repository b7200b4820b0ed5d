use super::{TaskSlot, emit};
use crate::config::AnalysisConfig;
use crate::error::WorkflowError;
use crate::history::{HistoricEvent, HistoryStore};
use crate::messages::{AnalysisResult, TaggedEvent, Verdict, WorkflowEvent};
use crate::protocol::SessionId;
use crate::relay::RelayApi;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

/// Synthetic progress shown while the analysis request is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRamp {
    step: u8,
    ceiling: u8,
}

impl ProgressRamp {
    pub fn new(step: u8, ceiling: u8) -> Self {
        Self {
            step,
            ceiling: ceiling.min(99),
        }
    }

    /// Next displayed percentage; never decreases and never reaches 100
    pub fn next(&self, current: u8) -> u8 {
        current.saturating_add(self.step).min(self.ceiling).max(current)
    }
}

/// Requests analysis of a finished recording and records the outcome
pub struct AnalysisRequester {
    inner: Arc<Inner>,
    task: TaskSlot,
}

struct Inner {
    relay: Arc<dyn RelayApi>,
    history: Arc<dyn HistoryStore>,
    ramp: ProgressRamp,
    tick: Duration,
    timeout: Duration,
    require_artifact: bool,
}

impl AnalysisRequester {
    pub fn new(
        relay: Arc<dyn RelayApi>,
        history: Arc<dyn HistoryStore>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay,
                history,
                ramp: ProgressRamp::new(config.progress_step, config.progress_ceiling),
                tick: config.progress_tick(),
                timeout: config.timeout(),
                require_artifact: config.require_artifact,
            }),
            task: TaskSlot::default(),
        }
    }

    /// Analyze `session` in the background while ramping the progress indicator
    pub(crate) fn start(
        &mut self,
        session: SessionId,
        generation: u64,
        events: mpsc::Sender<TaggedEvent>,
    ) {
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            // The ramp only ever stops because the request finished first
            let outcome = tokio::select! {
                outcome = inner.analyze(session) => outcome,
                never = inner.run_ramp(&events, generation) => match never {},
            };
            emit(&events, generation, WorkflowEvent::AnalysisFinished(outcome)).await;
        });

        self.task.replace(task);
    }

    /// Analyze `session` in the current task, without progress reporting
    pub async fn analyze(&self, session: SessionId) -> Result<AnalysisResult, WorkflowError> {
        self.inner.analyze(session).await
    }

    pub fn cancel(&mut self) {
        if self.task.clear() {
            tracing::debug!("Analysis cancelled");
        }
    }
}

impl Inner {
    async fn run_ramp(&self, events: &mpsc::Sender<TaggedEvent>, generation: u64) -> Infallible {
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        let mut percent = 0;

        loop {
            ticker.tick().await;
            let next = self.ramp.next(percent);
            if next != percent {
                percent = next;
                emit(events, generation, WorkflowEvent::AnalysisProgress(percent)).await;
            }
        }
    }

    async fn analyze(&self, session: SessionId) -> Result<AnalysisResult, WorkflowError> {
        tracing::info!("Requesting analysis of recording {}", session);

        let result = tokio::time::timeout(self.timeout, self.request_analysis(session))
            .await
            .map_err(|_| {
                tracing::error!("Analysis timed out after {:?}", self.timeout);
                WorkflowError::AnalysisTimedOut(self.timeout.as_secs())
            })??;

        self.record_outcome(result.verdict).await;

        tracing::info!(
            "Analysis complete: video {} judged {:?}",
            result.video_id,
            result.verdict
        );
        Ok(result)
    }

    async fn request_analysis(&self, session: SessionId) -> Result<AnalysisResult, WorkflowError> {
        let response = self.relay.analyze_video(session).await.map_err(|e| {
            tracing::error!("Analysis request failed: {}", e);
            WorkflowError::analysis_failed(None)
        })?;

        if !response.success {
            tracing::warn!("Analysis service reported failure: {:?}", response.message);
            return Err(WorkflowError::analysis_failed(response.message));
        }

        let video_id = response
            .video_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WorkflowError::analysis_failed(None))?;

        let verdict = Verdict::from_status(response.status.as_deref());

        let artifact_url = match self.relay.fetch_analyzed_video(&video_id).await {
            Ok(()) => Some(self.relay.artifact_url(&video_id)),
            Err(e) if self.require_artifact => {
                tracing::error!("Processed video {} unavailable: {}", video_id, e);
                return Err(WorkflowError::ArtifactUnavailable(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(
                    "Processed video {} unavailable, continuing without it: {}",
                    video_id,
                    e
                );
                None
            }
        };

        Ok(AnalysisResult {
            video_id,
            verdict,
            duration_seconds: response.duration,
            artifact_url,
        })
    }

    /// Store the outcome in the alert history; failures are logged, never returned
    async fn record_outcome(&self, verdict: Verdict) {
        let reading = match self.history.fetch_latest_sensor_reading().await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!("Failed to read latest sensor values: {}", e);
                None
            }
        };

        let event = HistoricEvent::now(verdict, reading.as_ref());
        if let Err(e) = self.history.record_historic_event(event).await {
            tracing::warn!("Failed to record historic event: {}", e);
        }
    }
}
