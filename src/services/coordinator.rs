use super::{AnalysisRequester, RecordingTrigger, StatusPoller};
use crate::config::{Config, ExhaustedPolicy};
use crate::error::WorkflowError;
use crate::history::HistoryStore;
use crate::messages::{
    AnalysisResult, PollOutcome, RecordingSession, TaggedEvent, WorkflowCommand, WorkflowEvent,
    WorkflowSnapshot, WorkflowState,
};
use crate::relay::RelayApi;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const COMMAND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 64;

/// Drives one recording/analysis workflow at a time
///
/// This service:
/// - Owns the single `WorkflowState` and publishes every change
/// - Starts and cancels the countdown, status poller and analysis tasks
/// - Drops events from tasks that belong to a run which was reset
///
/// All commands and task events are handled sequentially in `run`.
pub struct Coordinator {
    cmd_rx: mpsc::Receiver<WorkflowCommand>,
    event_rx: mpsc::Receiver<TaggedEvent>,
    event_tx: mpsc::Sender<TaggedEvent>,
    state_tx: watch::Sender<WorkflowSnapshot>,
    state: WorkflowState,
    result: Option<AnalysisResult>,
    session: Option<RecordingSession>,
    generation: u64,
    countdown_secs: u32,
    live_feed: String,
    on_exhausted: ExhaustedPolicy,
    trigger: RecordingTrigger,
    poller: StatusPoller,
    analyzer: AnalysisRequester,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        relay: Arc<dyn RelayApi>,
        history: Arc<dyn HistoryStore>,
    ) -> (Self, CoordinatorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let state = WorkflowState::Idle;
        let (state_tx, state_rx) = watch::channel(WorkflowSnapshot::new(
            state.clone(),
            None,
            &config.live_feed_url,
        ));

        let coordinator = Self {
            cmd_rx,
            event_rx,
            event_tx,
            state_tx,
            state,
            result: None,
            session: None,
            generation: 0,
            countdown_secs: config.countdown_secs,
            live_feed: config.live_feed_url.clone(),
            on_exhausted: config.poll.on_exhausted,
            trigger: RecordingTrigger::new(Arc::clone(&relay)),
            poller: StatusPoller::new(Arc::clone(&relay), &config.poll),
            analyzer: AnalysisRequester::new(relay, history, &config.analysis),
        };

        (coordinator, CoordinatorHandle::new(cmd_tx, state_rx))
    }

    /// Process commands and task events until every handle is dropped
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                // Always open: the coordinator holds a sender itself
                Some(tagged) = self.event_rx.recv() => {
                    if tagged.generation == self.generation {
                        self.handle_event(tagged.event);
                    } else {
                        tracing::debug!(
                            "Dropping event from run {} (current run {})",
                            tagged.generation,
                            self.generation
                        );
                    }
                }
            }
        }

        self.cancel_tasks();
        tracing::debug!("Workflow coordinator stopped");
    }

    fn handle_command(&mut self, cmd: WorkflowCommand) {
        tracing::debug!("handle_command: {:?} in state {:?}", cmd, self.state);

        match cmd {
            WorkflowCommand::Record => {
                self.reset();
                self.transition(WorkflowState::CountingDown {
                    seconds_remaining: self.countdown_secs,
                });
                self.trigger
                    .start_countdown(self.countdown_secs, self.generation, self.event_tx.clone());
            }

            WorkflowCommand::Analyze => self.start_analysis(),

            WorkflowCommand::Reset => self.reset(),
        }
    }

    fn start_analysis(&mut self) {
        let retryable = match &self.state {
            WorkflowState::AwaitingAnalysis => true,
            WorkflowState::Failed { reason } => reason.is_analysis_phase(),
            _ => false,
        };

        let session = match (&self.session, retryable) {
            (Some(session), true) => session.session_id,
            _ => {
                tracing::warn!("Ignoring analyze request in state {}", self.state.as_str());
                return;
            }
        };

        self.result = None;
        self.transition(WorkflowState::Analyzing {
            progress_percent: 0,
        });
        self.analyzer
            .start(session, self.generation, self.event_tx.clone());
    }

    fn handle_event(&mut self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::CountdownTick { seconds_remaining } => {
                if matches!(self.state, WorkflowState::CountingDown { .. }) {
                    self.transition(WorkflowState::CountingDown { seconds_remaining });
                }
            }

            WorkflowEvent::RecordingStarted(session) => {
                let session_id = session.session_id;
                self.session = Some(session);
                self.transition(WorkflowState::Recording);
                self.poller
                    .start(session_id, self.generation, self.event_tx.clone());
            }

            WorkflowEvent::RecordingStartFailed(reason) => {
                // The UI returns to a clean pre-recording view
                self.reset();
                self.transition(WorkflowState::Failed { reason });
            }

            WorkflowEvent::RecordingFinished(outcome) => self.finish_recording(outcome),

            WorkflowEvent::AnalysisProgress(percent) => {
                if let WorkflowState::Analyzing { progress_percent } = self.state
                    && percent > progress_percent
                    && percent < 100
                {
                    self.transition(WorkflowState::Analyzing {
                        progress_percent: percent,
                    });
                }
            }

            // The published result carries the completed progress value
            WorkflowEvent::AnalysisFinished(Ok(result)) => {
                let state = WorkflowState::Result {
                    verdict: result.verdict,
                    artifact_ref: result.artifact_url.clone(),
                };
                self.result = Some(result);
                self.transition(state);
            }

            WorkflowEvent::AnalysisFinished(Err(reason)) => {
                self.transition(WorkflowState::Failed { reason });
            }
        }
    }

    fn finish_recording(&mut self, outcome: PollOutcome) {
        match (outcome, self.on_exhausted) {
            (PollOutcome::Completed { .. }, _) => {
                self.transition(WorkflowState::AwaitingAnalysis);
            }
            (PollOutcome::Exhausted { attempts }, ExhaustedPolicy::AssumeDone) => {
                tracing::warn!(
                    "Assuming recording is done after {} unanswered status checks",
                    attempts
                );
                self.transition(WorkflowState::AwaitingAnalysis);
            }
            (PollOutcome::Exhausted { attempts }, ExhaustedPolicy::Fail) => {
                self.transition(WorkflowState::Failed {
                    reason: WorkflowError::RecordingTimedOut(attempts),
                });
            }
        }
    }

    /// Return to `Idle`, cancelling every task of the current run
    fn reset(&mut self) {
        self.cancel_tasks();
        self.generation += 1;
        self.session = None;
        self.result = None;
        self.transition(WorkflowState::Idle);
    }

    fn cancel_tasks(&mut self) {
        self.trigger.cancel();
        self.poller.cancel();
        self.analyzer.cancel();
    }

    fn transition(&mut self, state: WorkflowState) {
        if std::mem::discriminant(&state) != std::mem::discriminant(&self.state) {
            tracing::info!("Workflow: {} -> {}", self.state.as_str(), state.as_str());
        } else {
            tracing::debug!("Workflow: {:?}", state);
        }

        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(WorkflowSnapshot::new(
            self.state.clone(),
            self.result.clone(),
            &self.live_feed,
        ));
    }
}

/// Handle for communicating with the Coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<WorkflowCommand>,
    state_rx: watch::Receiver<WorkflowSnapshot>,
}

impl CoordinatorHandle {
    fn new(tx: mpsc::Sender<WorkflowCommand>, state_rx: watch::Receiver<WorkflowSnapshot>) -> Self {
        Self { tx, state_rx }
    }

    pub async fn record(&self) -> Result<()> {
        self.send(WorkflowCommand::Record).await
    }

    pub async fn analyze(&self) -> Result<()> {
        self.send(WorkflowCommand::Analyze).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(WorkflowCommand::Reset).await
    }

    async fn send(&self, cmd: WorkflowCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send {:?} command: {}", e.0, e))
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.state_rx.clone()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Wait until the published snapshot satisfies `pred`
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&WorkflowSnapshot) -> bool,
    ) -> Result<WorkflowSnapshot> {
        let mut rx = self.state_rx.clone();
        let snapshot = rx
            .wait_for(|snapshot| pred(snapshot))
            .await
            .map_err(|e| anyhow::anyhow!("Coordinator stopped: {}", e))?;
        Ok(snapshot.clone())
    }
}
