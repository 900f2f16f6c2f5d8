//! Streaming run events for live reporters

use serde::Serialize;
use tokio::sync::mpsc;

use crate::attempt::Attempt;
use crate::matrix::WorkItemId;
use crate::report::Summary;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        work_items: usize,
        workers: usize,
    },
    AttemptStarted {
        item: WorkItemId,
        number: u32,
    },
    AttemptFinished {
        item: WorkItemId,
        attempt: Attempt,
        will_retry: bool,
    },
    DeadlineReached,
    RunFinished {
        summary: Summary,
    },
}

pub type EventSender = mpsc::UnboundedSender<RunEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
