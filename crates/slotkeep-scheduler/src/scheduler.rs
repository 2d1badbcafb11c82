use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slotkeep_types::SlotName;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::TaskContext;
use crate::error::SchedulerError;
use crate::handle::TaskHandle;
use crate::types::{Completion, SlotState, SlotStateChange, TaskId, TaskKind, TaskUpdate};

/// Scheduler tuning.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Tasks for distinct slots that may run at once.
    pub workers: usize,
    /// Capacity of the slot-state broadcast channel.
    pub state_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            state_channel_capacity: 256,
        }
    }
}

/// Counts reported by [`TaskScheduler::shutdown`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks running or queued when shutdown began.
    pub in_flight: usize,
    /// Tasks that finished on their own within the grace period.
    pub finished_in_grace: usize,
    /// Queued tasks removed after the grace period.
    pub cancelled_queued: usize,
    /// Running tasks signalled after the grace period.
    pub cancelled_running: usize,
}

enum Launch {
    Run,
    Abort,
}

struct Pending {
    id: TaskId,
    kind: TaskKind,
    token: CancellationToken,
    launch: Box<dyn FnOnce(Launch) + Send>,
}

#[derive(Default)]
struct SlotQueue {
    state: SlotState,
    running: Option<TaskId>,
    queue: VecDeque<Pending>,
}

pub(crate) struct Shared {
    slots: Mutex<HashMap<SlotName, SlotQueue>>,
    workers: Arc<Semaphore>,
    active: watch::Sender<usize>,
    states: broadcast::Sender<SlotStateChange>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    root: CancellationToken,
}

impl Shared {
    fn publish(&self, slot: &SlotName, task: TaskId, state: SlotState) {
        let _ = self.states.send(SlotStateChange {
            slot: slot.clone(),
            task,
            state,
        });
    }

    fn task_finished(&self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Remove a task that has not started yet. Returns whether it was found.
    pub(crate) fn cancel_queued(&self, slot: &SlotName, id: TaskId) -> bool {
        let pending = {
            let mut slots = self.slots.lock().expect("scheduler lock poisoned");
            let Some(entry) = slots.get_mut(slot) else {
                return false;
            };
            let Some(pos) = entry.queue.iter().position(|p| p.id == id) else {
                return false;
            };
            entry.queue.remove(pos)
        };
        match pending {
            Some(pending) => {
                debug!(slot = %slot, task = %id, "queued task cancelled");
                pending.token.cancel();
                (pending.launch)(Launch::Abort);
                true
            }
            None => false,
        }
    }

    /// Move the slot to `Cancelling` if `id` is its running task.
    pub(crate) fn mark_cancelling(&self, slot: &SlotName, id: TaskId) -> bool {
        let marked = {
            let mut slots = self.slots.lock().expect("scheduler lock poisoned");
            match slots.get_mut(slot) {
                Some(entry) if entry.running == Some(id) => {
                    entry.state = SlotState::Cancelling;
                    true
                }
                _ => false,
            }
        };
        if marked {
            debug!(slot = %slot, task = %id, "running task cancellation requested");
            self.publish(slot, id, SlotState::Cancelling);
        }
        marked
    }

    /// Mark `id` started, or park it behind the running task.
    fn enqueue(&self, slot: &SlotName, pending: Pending) -> Option<Pending> {
        let mut slots = self.slots.lock().expect("scheduler lock poisoned");
        let entry = slots.entry(slot.clone()).or_default();
        if entry.running.is_none() {
            entry.running = Some(pending.id);
            entry.state = pending.kind.active_state();
            Some(pending)
        } else {
            entry.queue.push_back(pending);
            None
        }
    }

    /// Release the slot held by `id` and hand it to the next queued task.
    fn advance(&self, slot: &SlotName, id: TaskId) -> Option<Pending> {
        let mut slots = self.slots.lock().expect("scheduler lock poisoned");
        let entry = slots.get_mut(slot)?;
        if entry.running != Some(id) {
            return None;
        }
        match entry.queue.pop_front() {
            Some(next) => {
                entry.running = Some(next.id);
                entry.state = next.kind.active_state();
                Some(next)
            }
            None => {
                slots.remove(slot);
                None
            }
        }
    }
}

/// Runs slot-bound jobs with per-slot single-flight and a bounded worker pool.
///
/// Cloning is cheap; clones share the same queues and pool.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (active, _) = watch::channel(0usize);
        let (states, _) = broadcast::channel(config.state_channel_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(config.workers.max(1))),
                active,
                states,
                next_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Submit a job for `slot`.
    ///
    /// The job receives a [`TaskContext`]; it should call
    /// [`checkpoint`](TaskContext::checkpoint) between steps. A job that
    /// returns an error after cancellation was requested completes as
    /// [`Completion::Cancelled`]; a job that panics completes as
    /// [`Completion::Failed`] with [`SchedulerError::Panicked`].
    pub fn submit<T, E, F, Fut>(&self, slot: SlotName, kind: TaskKind, job: F) -> TaskHandle<T, E>
    where
        T: Send + 'static,
        E: From<SchedulerError> + Send + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let token = self.shared.root.child_token();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let handle = TaskHandle::new(
            id,
            slot.clone(),
            kind,
            token.clone(),
            updates_rx,
            updates_tx.clone(),
            done_rx,
            self.shared.clone(),
        );

        if self.shared.shutting_down.load(Ordering::SeqCst) {
            warn!(slot = %slot, task = %id, kind = %kind, "submit rejected during shutdown");
            let _ = done_tx.send(Completion::Failed(E::from(SchedulerError::ShuttingDown)));
            return handle;
        }

        self.shared.active.send_modify(|n| *n += 1);
        debug!(slot = %slot, task = %id, kind = %kind, "task submitted");

        let shared = self.shared.clone();
        let run_slot = slot.clone();
        let run_token = token.clone();
        let launch: Box<dyn FnOnce(Launch) + Send> = Box::new(move |mode| match mode {
            Launch::Run => {
                tokio::spawn(run_task(shared, run_slot, id, kind, run_token, updates_tx, done_tx, job));
            }
            Launch::Abort => {
                let _ = done_tx.send(Completion::Cancelled);
                shared.task_finished();
            }
        });

        let pending = Pending {
            id,
            kind,
            token,
            launch,
        };
        if let Some(pending) = self.shared.enqueue(&slot, pending) {
            (pending.launch)(Launch::Run);
        } else {
            debug!(slot = %slot, task = %id, "slot busy, task queued");
        }
        handle
    }

    pub fn slot_state(&self, slot: &SlotName) -> SlotState {
        let slots = self.shared.slots.lock().expect("scheduler lock poisoned");
        slots.get(slot).map(|q| q.state).unwrap_or_default()
    }

    /// Tasks waiting behind the running one for `slot`.
    pub fn queued(&self, slot: &SlotName) -> usize {
        let slots = self.shared.slots.lock().expect("scheduler lock poisoned");
        slots.get(slot).map(|q| q.queue.len()).unwrap_or(0)
    }

    /// Tasks running or queued across all slots.
    pub fn in_flight(&self) -> usize {
        *self.shared.active.borrow()
    }

    /// Subscribe to slot state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SlotStateChange> {
        self.shared.states.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop accepting work, wait up to `grace` for in-flight tasks, then
    /// cancel whatever remains.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let in_flight = self.in_flight();
        info!(in_flight, grace_ms = grace.as_millis() as u64, "scheduler shutting down");

        let mut active = self.shared.active.subscribe();
        let drained = tokio::time::timeout(grace, active.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if drained {
            return ShutdownReport {
                in_flight,
                finished_in_grace: in_flight,
                ..Default::default()
            };
        }

        let remaining = self.in_flight();
        let pending: Vec<(SlotName, Pending)> = {
            let mut slots = self.shared.slots.lock().expect("scheduler lock poisoned");
            slots
                .iter_mut()
                .flat_map(|(slot, q)| q.queue.drain(..).map(|p| (slot.clone(), p)).collect::<Vec<_>>())
                .collect()
        };
        let cancelled_queued = pending.len();
        for (slot, p) in pending {
            debug!(slot = %slot, task = %p.id, "queued task cancelled by shutdown");
            p.token.cancel();
            (p.launch)(Launch::Abort);
        }
        self.shared.root.cancel();
        let cancelled_running = remaining.saturating_sub(cancelled_queued);

        if tokio::time::timeout(grace, active.wait_for(|n| *n == 0)).await.is_err() {
            warn!(still_running = self.in_flight(), "tasks ignored cancellation past the grace period");
        }

        let report = ShutdownReport {
            in_flight,
            finished_in_grace: in_flight.saturating_sub(remaining),
            cancelled_queued,
            cancelled_running,
        };
        info!(?report, "scheduler stopped");
        report
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("in_flight", &self.in_flight())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task<T, E, F, Fut>(
    shared: Arc<Shared>,
    slot: SlotName,
    id: TaskId,
    kind: TaskKind,
    token: CancellationToken,
    updates: mpsc::UnboundedSender<TaskUpdate>,
    done: oneshot::Sender<Completion<T, E>>,
    job: F,
) where
    T: Send + 'static,
    E: From<SchedulerError> + Send + 'static,
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = shared.workers.clone().acquire_owned() => permit.ok(),
    };

    let completion = match permit {
        None => Completion::Cancelled,
        Some(permit) => {
            let state = kind.active_state();
            shared.publish(&slot, id, state);
            let _ = updates.send(TaskUpdate::State(state));
            debug!(slot = %slot, task = %id, kind = %kind, "task started");

            let held = Arc::new(Mutex::new(Some(permit)));
            let ctx = TaskContext::new(
                id,
                slot.clone(),
                token.clone(),
                updates.clone(),
                shared.workers.clone(),
                held.clone(),
            );
            let joined = tokio::spawn(job(ctx)).await;
            drop(held.lock().expect("permit lock poisoned").take());

            match joined {
                Ok(Ok(value)) => Completion::Success(value),
                Ok(Err(_)) if token.is_cancelled() => Completion::Cancelled,
                Ok(Err(err)) => Completion::Failed(err),
                Err(join) => {
                    let reason = panic_message(join);
                    warn!(slot = %slot, task = %id, reason = %reason, "task panicked");
                    Completion::Failed(E::from(SchedulerError::Panicked(reason)))
                }
            }
        }
    };

    match &completion {
        Completion::Success(_) => debug!(slot = %slot, task = %id, "task succeeded"),
        Completion::Cancelled => info!(slot = %slot, task = %id, kind = %kind, "task cancelled"),
        Completion::Failed(_) => {
            info!(slot = %slot, task = %id, kind = %kind, "task failed");
            shared.publish(&slot, id, SlotState::Error);
            let _ = updates.send(TaskUpdate::State(SlotState::Error));
        }
    }

    let next = shared.advance(&slot, id);
    if next.is_none() {
        shared.publish(&slot, id, SlotState::Idle);
    }
    let _ = updates.send(TaskUpdate::State(SlotState::Idle));
    let _ = done.send(completion);
    shared.task_finished();

    if let Some(next) = next {
        (next.launch)(Launch::Run);
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
