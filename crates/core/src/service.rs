//! Task orchestration: a single command loop owns every task record and
//! publishes ordered snapshots to subscribers.
//!
//! All mutation flows through the loop as commands, processed strictly in
//! arrival order; workers, cleanup timers and callers are pure command
//! senders. Task executions run on a semaphore-bounded pool and report back
//! through the same command queue, so no state is ever shared mutably.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TasksConfig;
use crate::task::{StateSink, Task, TaskInfo, TaskState};

enum Command {
    Submit(Arc<dyn Task>),
    Remove(u64),
    Clear,
    UpdatePercent(u64, u8),
    UpdateState {
        id: u64,
        state: TaskState,
        error: Option<String>,
        /// Answered with the record's resulting state, or `Canceled` when
        /// the record no longer exists. Used only by the Running handshake.
        ack: Option<oneshot::Sender<TaskState>>,
    },
    Shutdown,
}

/// Serialized authority over all task records.
pub struct TaskService {
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Vec<TaskInfo>>,
    closed: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskService {
    /// Spawn the command loop and worker pool. Must be called from within a
    /// tokio runtime.
    pub fn new(config: &TasksConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Vec::new());
        let ctx = LoopCtx {
            tx: tx.clone(),
            snapshot: snapshot_tx,
            slots: Arc::new(Semaphore::new(config.concurrency.max(1))),
            clean_up_delay: config.clean_up_delay(),
        };
        let loop_handle = tokio::spawn(command_loop(rx, ctx));

        Self {
            tx,
            snapshot,
            closed: AtomicBool::new(false),
            loop_handle: Mutex::new(Some(loop_handle)),
        }
    }

    /// Admit a task. Its record enters `Pending` immediately; execution is
    /// dispatched to the worker pool without blocking the caller.
    ///
    /// # Panics
    ///
    /// Panics if the service has been shut down.
    pub fn submit(&self, task: Arc<dyn Task>) {
        self.send(Command::Submit(task));
    }

    /// Cancel (best-effort) and remove the task with `id`. Unknown ids are
    /// a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the service has been shut down.
    pub fn remove(&self, id: u64) {
        self.send(Command::Remove(id));
    }

    /// Remove every task currently in a terminal state.
    ///
    /// # Panics
    ///
    /// Panics if the service has been shut down.
    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    /// Live view of the ordered task list. The receiver always holds the
    /// latest snapshot and is notified on every change (latest-wins).
    pub fn subscribe(&self) -> watch::Receiver<Vec<TaskInfo>> {
        self.snapshot.clone()
    }

    /// Stop the command loop after draining commands already enqueued.
    /// Running executions are not interrupted; their late reports are
    /// dropped. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    fn send(&self, command: Command) {
        if self.closed.load(Ordering::SeqCst) || self.tx.send(command).is_err() {
            panic!("task service is closed");
        }
    }
}

struct LoopCtx {
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Sender<Vec<TaskInfo>>,
    slots: Arc<Semaphore>,
    clean_up_delay: Duration,
}

async fn command_loop(mut rx: mpsc::UnboundedReceiver<Command>, ctx: LoopCtx) {
    let mut records: Vec<TaskInfo> = Vec::new();
    let mut handles: HashMap<u64, Arc<dyn Task>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Shutdown => break,

            Command::Submit(task) => {
                let id = task.id();
                info!(task_id = id, name = task.name(), "task submitted");
                records.push(TaskInfo {
                    id,
                    name: task.name().to_string(),
                    percent: 0,
                    error: None,
                    state: TaskState::Pending,
                });
                handles.insert(id, Arc::clone(&task));
                publish(&ctx.snapshot, &records);
                tokio::spawn(dispatch(task, ctx.tx.clone(), Arc::clone(&ctx.slots)));
            }

            Command::Remove(id) => {
                if let Some(task) = handles.remove(&id) {
                    // Cancellation is best-effort; a misbehaving cancel must
                    // not take down the command loop.
                    let cancel = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        task.cancel();
                    }));
                    if cancel.is_err() {
                        warn!(task_id = id, "task cancel panicked");
                    }
                }
                let before = records.len();
                records.retain(|record| record.id != id);
                if records.len() != before {
                    debug!(task_id = id, "task removed");
                    publish(&ctx.snapshot, &records);
                }
            }

            Command::Clear => {
                let before = records.len();
                records.retain(|record| !record.state.is_completed());
                if records.len() != before {
                    debug!(cleared = before - records.len(), "completed tasks cleared");
                    publish(&ctx.snapshot, &records);
                }
            }

            Command::UpdatePercent(id, percent) => {
                if let Some(record) = records.iter_mut().find(|record| record.id == id) {
                    // Progress is only meaningful while the task runs; late
                    // reports after a terminal transition are dropped.
                    if record.state == TaskState::Running {
                        record.percent = percent.min(100);
                        publish(&ctx.snapshot, &records);
                    }
                }
            }

            Command::UpdateState {
                id,
                state,
                error,
                ack,
            } => {
                let outcome = records
                    .iter_mut()
                    .find(|record| record.id == id)
                    .map(|record| (apply_transition(record, state, error), record.state));

                if let Some(ack) = ack {
                    // A missing record means the task was removed before its
                    // worker confirmed Running; tell the dispatcher to abort.
                    let _ = ack.send(match outcome {
                        Some((_, current)) => current,
                        None => TaskState::Canceled,
                    });
                }

                if let Some((true, current)) = outcome {
                    publish(&ctx.snapshot, &records);
                    if current.is_completed() {
                        handles.remove(&id);
                        info!(task_id = id, state = ?current, "task completed");
                        schedule_clean_up(&ctx, id);
                    }
                }
            }
        }
    }

    debug!("task service command loop stopped");
}

/// Apply one edge of the task state machine. Any edge outside the defined
/// set leaves the record unchanged and returns `false`.
fn apply_transition(record: &mut TaskInfo, next: TaskState, error: Option<String>) -> bool {
    match (record.state, next) {
        (TaskState::Pending, TaskState::Running) => {
            record.state = TaskState::Running;
        }
        (TaskState::Pending, TaskState::Canceled) | (TaskState::Running, TaskState::Canceled) => {
            record.state = TaskState::Canceled;
        }
        (TaskState::Running, TaskState::Finished) => {
            record.state = TaskState::Finished;
            record.percent = 100;
            record.error = None;
        }
        (TaskState::Running, TaskState::Error) => {
            record.state = TaskState::Error;
            record.error = error;
        }
        _ => return false,
    }
    true
}

fn publish(snapshot: &watch::Sender<Vec<TaskInfo>>, records: &[TaskInfo]) {
    let _ = snapshot.send(records.to_vec());
}

fn schedule_clean_up(ctx: &LoopCtx, id: u64) {
    let tx = ctx.tx.clone();
    let delay = ctx.clean_up_delay;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // An explicit remove/clear in the meantime makes this a no-op.
        let _ = tx.send(Command::Remove(id));
    });
}

/// One dispatched execution: queue for a slot, handshake into Running, then
/// supervise the task body. Runs the body on its own spawned task so that a
/// panic is caught as a `JoinError` and recorded, never crashing the loop.
async fn dispatch(task: Arc<dyn Task>, tx: mpsc::UnboundedSender<Command>, slots: Arc<Semaphore>) {
    let id = task.id();
    let Ok(_permit) = slots.acquire_owned().await else {
        return;
    };

    let (ack_tx, ack_rx) = oneshot::channel();
    let handshake = Command::UpdateState {
        id,
        state: TaskState::Running,
        error: None,
        ack: Some(ack_tx),
    };
    if tx.send(handshake).is_err() {
        return;
    }
    match ack_rx.await {
        Ok(TaskState::Running) => {}
        _ => {
            debug!(task_id = id, "task gone before start, dispatch aborted");
            return;
        }
    }

    let sink = Arc::new(CommandSink { id, tx: tx.clone() });
    let body = {
        let task = Arc::clone(&task);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move { task.run(sink.as_ref() as &dyn StateSink).await })
    };

    match body.await {
        // Duplicate terminal reports are no-ops in the state machine, so an
        // unconditional finish after a clean return is safe.
        Ok(Ok(())) => sink.finish(),
        Ok(Err(err)) => {
            warn!(task_id = id, error = %format!("{err:#}"), "task failed");
            sink.error(format!("{err:#}"));
        }
        Err(join_err) if join_err.is_panic() => {
            error!(task_id = id, "task panicked");
            sink.error("task panicked".to_string());
        }
        // Aborted join: the runtime is tearing down.
        Err(_) => sink.cancel(),
    }
}

/// Sink that forwards a task's reports into the command queue. Sends are
/// best-effort; during shutdown they are silently dropped.
struct CommandSink {
    id: u64,
    tx: mpsc::UnboundedSender<Command>,
}

impl StateSink for CommandSink {
    fn progress(&self, percent: u8) {
        let _ = self.tx.send(Command::UpdatePercent(self.id, percent));
    }

    fn finish(&self) {
        let _ = self.tx.send(Command::UpdateState {
            id: self.id,
            state: TaskState::Finished,
            error: None,
            ack: None,
        });
    }

    fn error(&self, message: String) {
        let _ = self.tx.send(Command::UpdateState {
            id: self.id,
            state: TaskState::Error,
            error: Some(message),
            ack: None,
        });
    }

    fn cancel(&self) {
        let _ = self.tx.send(Command::UpdateState {
            id: self.id,
            state: TaskState::Canceled,
            error: None,
            ack: None,
        });
    }
}
