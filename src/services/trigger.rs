use super::{TaskSlot, emit};
use crate::error::WorkflowError;
use crate::messages::{RecordingSession, TaggedEvent, WorkflowEvent};
use crate::relay::RelayApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Starts the remote recording after a local countdown
///
/// The start request is issued exactly once, when the countdown reaches zero.
pub struct RecordingTrigger {
    relay: Arc<dyn RelayApi>,
    countdown: TaskSlot,
}

impl RecordingTrigger {
    pub fn new(relay: Arc<dyn RelayApi>) -> Self {
        Self {
            relay,
            countdown: TaskSlot::default(),
        }
    }

    /// Count down from `duration_secs`, reporting every second, then start recording
    pub(crate) fn start_countdown(
        &mut self,
        duration_secs: u32,
        generation: u64,
        events: mpsc::Sender<TaggedEvent>,
    ) {
        let relay = Arc::clone(&self.relay);

        let task = tokio::spawn(async move {
            let mut remaining = duration_secs;
            let mut ticker = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);

            while remaining > 0 {
                ticker.tick().await;
                remaining -= 1;
                emit(
                    &events,
                    generation,
                    WorkflowEvent::CountdownTick {
                        seconds_remaining: remaining,
                    },
                )
                .await;
            }

            let event = match begin_remote_recording(relay.as_ref()).await {
                Ok(session) => WorkflowEvent::RecordingStarted(session),
                Err(e) => WorkflowEvent::RecordingStartFailed(e),
            };
            emit(&events, generation, event).await;
        });

        self.countdown.replace(task);
    }

    /// Ask the relay to start recording right away
    pub async fn begin_remote_recording(&self) -> Result<RecordingSession, WorkflowError> {
        begin_remote_recording(self.relay.as_ref()).await
    }

    pub fn cancel(&mut self) {
        if self.countdown.clear() {
            tracing::debug!("Countdown cancelled");
        }
    }
}

async fn begin_remote_recording(relay: &dyn RelayApi) -> Result<RecordingSession, WorkflowError> {
    tracing::info!("Requesting remote recording");

    match relay.start_recording().await {
        Ok(session) => {
            tracing::info!(
                "Relay recording {} for {}s",
                session.session_id,
                session.expected_duration_seconds
            );
            Ok(session)
        }
        Err(e) => {
            tracing::error!("Failed to start recording: {}", e);
            Err(e.into())
        }
    }
}
