use super::{TaskSlot, emit};
use crate::config::PollConfig;
use crate::messages::{PollOutcome, PollingContext, TaggedEvent, WorkflowEvent};
use crate::protocol::SessionId;
use crate::relay::RelayApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Polls the relay until a recording finishes
///
/// Queries are issued one at a time on a fixed cadence. A malformed or
/// unreachable answer only costs an attempt; when the budget runs out the
/// loop reports `Exhausted` and leaves the decision to the coordinator.
pub struct StatusPoller {
    relay: Arc<dyn RelayApi>,
    interval: Duration,
    max_attempts: u32,
    long_poll: Option<Duration>,
    task: TaskSlot,
}

impl StatusPoller {
    pub fn new(relay: Arc<dyn RelayApi>, config: &PollConfig) -> Self {
        Self {
            relay,
            interval: config.interval(),
            max_attempts: config.max_attempts,
            long_poll: config.long_poll(),
            task: TaskSlot::default(),
        }
    }

    /// Poll `session` in the background, replacing any loop already running
    pub(crate) fn start(
        &mut self,
        session: SessionId,
        generation: u64,
        events: mpsc::Sender<TaggedEvent>,
    ) {
        // Abort the old loop before the new one can issue a request
        self.cancel();

        let relay = Arc::clone(&self.relay);
        let ctx = PollingContext::new(self.max_attempts, self.interval);
        let long_poll = self.long_poll;

        let task = tokio::spawn(async move {
            let outcome = poll_recording(relay.as_ref(), session, ctx, long_poll).await;
            emit(&events, generation, WorkflowEvent::RecordingFinished(outcome)).await;
        });

        self.task.replace(task);
    }

    /// Poll `session` in the current task until it finishes or the budget runs out
    pub async fn poll_until_done(&self, session: SessionId) -> PollOutcome {
        let ctx = PollingContext::new(self.max_attempts, self.interval);
        poll_recording(self.relay.as_ref(), session, ctx, self.long_poll).await
    }

    /// Stop polling without reporting an outcome
    pub fn cancel(&mut self) {
        if self.task.clear() {
            tracing::debug!("Status polling cancelled");
        }
    }
}

async fn poll_recording(
    relay: &dyn RelayApi,
    session: SessionId,
    mut ctx: PollingContext,
    long_poll: Option<Duration>,
) -> PollOutcome {
    let mut ticker = interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        ctx.record_attempt();

        match relay.recording_status(session, long_poll).await {
            Ok(false) => {
                tracing::info!(
                    "Recording {} finished after {} status checks",
                    session,
                    ctx.attempt_count
                );
                return PollOutcome::Completed {
                    attempts: ctx.attempt_count,
                };
            }
            Ok(true) => {
                tracing::debug!(
                    "Recording {} still running ({}/{})",
                    session,
                    ctx.attempt_count,
                    ctx.max_attempts
                );
            }
            Err(e) => {
                tracing::debug!(
                    "Transient status fault ({}/{}): {}",
                    ctx.attempt_count,
                    ctx.max_attempts,
                    e
                );
            }
        }

        if ctx.is_exhausted() {
            tracing::warn!(
                "Recording {} did not report completion after {} status checks",
                session,
                ctx.attempt_count
            );
            return PollOutcome::Exhausted {
                attempts: ctx.attempt_count,
            };
        }
    }
}
