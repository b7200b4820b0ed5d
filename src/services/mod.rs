pub mod analyzer;
pub mod coordinator;
pub mod poller;
pub mod trigger;

pub use analyzer::{AnalysisRequester, ProgressRamp};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use poller::StatusPoller;
pub use trigger::RecordingTrigger;

use crate::messages::{TaggedEvent, WorkflowEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Holds at most one background task
///
/// Replacing or clearing the slot aborts the task it held, so a component can
/// never leave a second timer running behind the first.
#[derive(Default)]
pub(crate) struct TaskSlot(Option<JoinHandle<()>>);

impl TaskSlot {
    pub fn replace(&mut self, task: JoinHandle<()>) {
        if let Some(old) = self.0.replace(task) {
            old.abort();
        }
    }

    /// Abort the held task; returns whether one was still running
    pub fn clear(&mut self) -> bool {
        match self.0.take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Deliver an event to the coordinator, stamped with the run it belongs to
pub(crate) async fn emit(events: &mpsc::Sender<TaggedEvent>, generation: u64, event: WorkflowEvent) {
    if events.send(TaggedEvent { generation, event }).await.is_err() {
        tracing::debug!("Coordinator gone, dropping workflow event");
    }
}
