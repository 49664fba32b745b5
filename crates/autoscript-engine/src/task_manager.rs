//! Task manager
//!
//! Starts function bodies as tokio tasks and enforces the uniqueness policy
//! of each function's slot. A slot is keyed by the `task_unique`/`task_queue`
//! group name, so functions sharing a group share one slot. Functions with
//! no uniqueness decorator get no slot and run with unlimited concurrency.
//!
//! Every running task is tracked with its join handle and cancellation token
//! so contexts can be torn down and the engine shut down cleanly.

use autoscript_core::Context;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::error::FunctionError;
use crate::function::{Bindings, Invocation};
use crate::host::ScriptHost;
use crate::spec::{FunctionSpec, UniquePolicy};

pub type TaskId = u64;

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed,
    Failed(FunctionError),
    Cancelled,
}

/// Handle to a started task's completion
#[derive(Debug)]
pub struct TaskTicket {
    id: TaskId,
    done: oneshot::Receiver<TaskOutcome>,
}

impl TaskTicket {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn wait(self) -> TaskOutcome {
        self.done.await.unwrap_or(TaskOutcome::Cancelled)
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Started(TaskTicket),
    /// The uniqueness policy rejected the request
    Discarded,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }

    pub fn ticket(self) -> Option<TaskTicket> {
        match self {
            StartOutcome::Started(ticket) => Some(ticket),
            StartOutcome::Discarded => None,
        }
    }
}

struct Slot {
    task_id: TaskId,
    token: CancellationToken,
    context: String,
    policy: UniquePolicy,
}

struct Inflight {
    context: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Tasks {
    next_id: TaskId,
    slots: HashMap<String, Slot>,
    inflight: HashMap<TaskId, Inflight>,
}

pub struct TaskManager {
    host: ScriptHost,
    tasks: Arc<Mutex<Tasks>>,
    root: CancellationToken,
    idle: Arc<Notify>,
}

impl TaskManager {
    pub fn new(host: ScriptHost) -> Self {
        Self {
            host,
            tasks: Arc::new(Mutex::new(Tasks::default())),
            root: CancellationToken::new(),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Start `spec`'s body with `kwargs` bound to its parameters
    ///
    /// Never suspends, so callers may hold their own locks across it.
    /// Called outside a tokio runtime it logs an error and discards the
    /// request.
    #[instrument(skip_all, fields(function = %spec.qualified()))]
    pub fn start(&self, spec: &Arc<FunctionSpec>, kwargs: Bindings, cause: &Context) -> StartOutcome {
        let qualified = spec.qualified();
        let Ok(runtime) = Handle::try_current() else {
            error!("{}: no tokio runtime to run the task on; not started", qualified);
            return StartOutcome::Discarded;
        };
        let group = spec.unique.as_ref().map(|_| spec.group());
        let mut tasks = self.tasks.lock();

        if let (Some(unique), Some(group)) = (&spec.unique, &group) {
            if let Some(slot) = tasks.slots.get(group) {
                match unique.policy {
                    UniquePolicy::Queue | UniquePolicy::Kill { kill_me: true } => {
                        debug!(group = %group, "Task already running in group; discarding new request");
                        return StartOutcome::Discarded;
                    }
                    UniquePolicy::Kill { kill_me: false } => {
                        debug!(group = %group, task_id = slot.task_id, "Cancelling running task in group");
                        slot.token.cancel();
                    }
                }
            }
        }

        tasks.next_id += 1;
        let id = tasks.next_id;
        let token = self.root.child_token();

        if let (Some(unique), Some(group)) = (&spec.unique, &group) {
            tasks.slots.insert(
                group.clone(),
                Slot {
                    task_id: id,
                    token: token.clone(),
                    context: spec.context.clone(),
                    policy: unique.policy,
                },
            );
        }

        let invocation = Invocation {
            function: qualified.clone(),
            kwargs: spec.function.bind(&kwargs),
            globals: spec.globals.clone(),
            host: self.host.clone(),
            context: cause.child(),
            cancel: token.clone(),
        };
        let body = (spec.function.body)(invocation);
        let (done_tx, done_rx) = oneshot::channel();

        debug!(task_id = id, "Starting task");
        let handle = runtime.spawn(run_task(RunningTask {
            id,
            qualified,
            group,
            token: token.clone(),
            tasks: self.tasks.clone(),
            idle: self.idle.clone(),
            done: done_tx,
        }, body));

        tasks.inflight.insert(
            id,
            Inflight {
                context: spec.context.clone(),
                token,
                handle: Some(handle),
            },
        );

        StartOutcome::Started(TaskTicket { id, done: done_rx })
    }

    /// Number of tasks still running, optionally for one context
    pub fn running(&self, context: Option<&str>) -> usize {
        self.tasks
            .lock()
            .inflight
            .values()
            .filter(|t| context.map_or(true, |c| t.context == c))
            .count()
    }

    pub fn is_group_busy(&self, group: &str) -> bool {
        self.tasks.lock().slots.contains_key(group)
    }

    /// Wait until no task (of `context`, if given) is running
    pub async fn wait_idle(&self, context: Option<&str>) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.running(context) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drop a context's slots, cancelling tasks held under a kill policy
    #[instrument(skip(self))]
    pub fn release_context(&self, context: &str) {
        let mut tasks = self.tasks.lock();
        let mut cancelled = 0;
        tasks.slots.retain(|_, slot| {
            if slot.context != context {
                return true;
            }
            if matches!(slot.policy, UniquePolicy::Kill { .. }) {
                slot.token.cancel();
                cancelled += 1;
            }
            false
        });
        debug!(cancelled, "Released context task slots");
    }

    /// Cancel every task and wait for all of them to finish
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks
                .inflight
                .values_mut()
                .filter_map(|t| {
                    t.token.cancel();
                    t.handle.take()
                })
                .collect()
        };
        debug!(count = handles.len(), "Waiting for tasks to stop");
        for handle in handles {
            let _ = handle.await;
        }
    }
}

struct RunningTask {
    id: TaskId,
    qualified: String,
    group: Option<String>,
    token: CancellationToken,
    tasks: Arc<Mutex<Tasks>>,
    idle: Arc<Notify>,
    done: oneshot::Sender<TaskOutcome>,
}

async fn run_task(task: RunningTask, body: crate::function::FunctionFuture) {
    let outcome = tokio::select! {
        biased;
        _ = task.token.cancelled() => TaskOutcome::Cancelled,
        result = AssertUnwindSafe(body).catch_unwind() => match result {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(err)) => TaskOutcome::Failed(err),
            Err(panic) => TaskOutcome::Failed(FunctionError::Panic(panic_message(panic.as_ref()))),
        },
    };

    match &outcome {
        TaskOutcome::Completed => debug!(task_id = task.id, function = %task.qualified, "Task completed"),
        TaskOutcome::Cancelled => debug!(task_id = task.id, function = %task.qualified, "Task cancelled"),
        TaskOutcome::Failed(err) => error!("Exception in <{}>: {}", task.qualified, err),
    }

    {
        let mut tasks = task.tasks.lock();
        if let Some(group) = &task.group {
            if tasks.slots.get(group).map(|s| s.task_id) == Some(task.id) {
                tasks.slots.remove(group);
            }
        }
        tasks.inflight.remove(&task.id);
    }
    task.idle.notify_waiters();
    let _ = task.done.send(outcome);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
