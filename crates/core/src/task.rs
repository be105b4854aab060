//! The task abstraction: one asynchronous unit of work with its own
//! lifecycle, observed through immutable snapshot records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Finished,
    Error,
    Canceled,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }
}

/// Immutable snapshot of one task, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u64,
    pub name: String,
    pub percent: u8,
    pub error: Option<String>,
    pub state: TaskState,
}

/// Progress/outcome sink handed to a running task.
///
/// Calls are fire-and-forget: they enqueue commands on the task service and
/// never block. Reports against a task that has already reached a terminal
/// state (or been removed) are discarded by the service.
pub trait StateSink: Send + Sync {
    fn progress(&self, percent: u8);
    fn finish(&self);
    fn error(&self, message: String);
    fn cancel(&self);
}

#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> u64;

    fn name(&self) -> &str;

    /// Long-running body. Reports progress and, optionally, a terminal
    /// outcome through `sink`; returning `Ok` without a terminal report
    /// counts as finished, and returning `Err` is recorded as an error. A
    /// run interrupted by [`Task::cancel`] reports `sink.cancel()` and
    /// returns `Ok`.
    async fn run(&self, sink: &dyn StateSink) -> anyhow::Result<()>;

    /// Request prompt termination of a run in flight. Idempotent, and safe
    /// to call before `run` starts or after it has returned.
    fn cancel(&self);
}
