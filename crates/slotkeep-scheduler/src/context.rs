use std::future::Future;
use std::sync::{Arc, Mutex};

use slotkeep_types::SlotName;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use tracing::debug;

use crate::error::SchedulerError;
use crate::types::{Progress, TaskId, TaskUpdate};

/// Handed to every job: cancellation checks and progress reporting.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    slot: SlotName,
    token: CancellationToken,
    updates: mpsc::UnboundedSender<TaskUpdate>,
    last_fraction: Arc<Mutex<f32>>,
    workers: Arc<Semaphore>,
    permit: Arc<Mutex<Option<OwnedSemaphorePermit>>>,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        slot: SlotName,
        token: CancellationToken,
        updates: mpsc::UnboundedSender<TaskUpdate>,
        workers: Arc<Semaphore>,
        permit: Arc<Mutex<Option<OwnedSemaphorePermit>>>,
    ) -> Self {
        Self {
            id,
            slot,
            token,
            updates,
            last_fraction: Arc::new(Mutex::new(0.0)),
            workers,
            permit,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn slot(&self) -> &SlotName {
        &self.slot
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`SchedulerError::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), SchedulerError> {
        if self.token.is_cancelled() {
            Err(SchedulerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Use with `tokio::select!`
    /// around waits that are not chunked.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` with the task's worker slot handed back to the pool.
    ///
    /// The slot stays reserved for this task, so later work on the same
    /// slot still waits. The worker is taken again before returning, unless
    /// the task is cancelled first; the job should `checkpoint` afterwards.
    pub async fn suspend<F: Future>(&self, fut: F) -> F::Output {
        let released = self.permit.lock().expect("permit lock poisoned").take();
        let held = released.is_some();
        drop(released);
        if held {
            debug!(slot = %self.slot, task = %self.id, "worker released while suspended");
        }

        let output = fut.await;

        if held {
            let permit = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                permit = self.workers.clone().acquire_owned() => permit.ok(),
            };
            *self.permit.lock().expect("permit lock poisoned") = permit;
        }
        output
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Report progress. `fraction` is clamped to `[0, 1]` and never moves
    /// backwards.
    pub fn report(&self, fraction: f32, phase: impl Into<String>) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let fraction = {
            let mut last = self.last_fraction.lock().expect("progress lock poisoned");
            *last = last.max(fraction);
            *last
        };
        let _ = self.updates.send(TaskUpdate::Progress(Progress {
            fraction,
            phase: phase.into(),
        }));
    }

    /// Last reported fraction.
    pub fn fraction(&self) -> f32 {
        *self.last_fraction.lock().expect("progress lock poisoned")
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (TaskContext, mpsc::UnboundedReceiver<TaskUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = Arc::new(Semaphore::new(1));
        let ctx = TaskContext::new(
            TaskId(1),
            SlotName::new("s").unwrap(),
            CancellationToken::new(),
            tx,
            workers.clone(),
            Arc::new(Mutex::new(None)),
        );
        (ctx, rx)
    }

    fn holding_worker() -> (TaskContext, Arc<Semaphore>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let workers = Arc::new(Semaphore::new(1));
        let permit = workers.clone().try_acquire_owned().unwrap();
        let ctx = TaskContext::new(
            TaskId(2),
            SlotName::new("s").unwrap(),
            CancellationToken::new(),
            tx,
            workers.clone(),
            Arc::new(Mutex::new(Some(permit))),
        );
        (ctx, workers)
    }

    fn fractions(rx: &mut mpsc::UnboundedReceiver<TaskUpdate>) -> Vec<f32> {
        let mut out = Vec::new();
        while let Ok(TaskUpdate::Progress(p)) = rx.try_recv() {
            out.push(p.fraction);
        }
        out
    }

    #[test]
    fn progress_is_clamped_and_monotonic() {
        let (ctx, mut rx) = context();
        ctx.report(0.5, "encode");
        ctx.report(0.25, "encode");
        ctx.report(7.0, "write");
        ctx.report(-1.0, "write");
        assert_eq!(fractions(&mut rx), vec![0.5, 0.5, 1.0, 1.0]);
        assert_eq!(ctx.fraction(), 1.0);
    }

    #[test]
    fn checkpoint_follows_token() {
        let (ctx, _rx) = context();
        assert!(ctx.checkpoint().is_ok());
        ctx.token().cancel();
        assert_eq!(ctx.checkpoint(), Err(SchedulerError::Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn suspend_lends_the_worker_back() {
        let (ctx, workers) = holding_worker();
        assert_eq!(workers.available_permits(), 0);
        let seen = ctx.suspend(async { workers.available_permits() }).await;
        assert_eq!(seen, 1);
        assert_eq!(workers.available_permits(), 0);
    }

    #[tokio::test]
    async fn cancelled_suspend_does_not_wait_for_a_worker() {
        let (ctx, workers) = holding_worker();
        let suspended = ctx.suspend(async {
            let other = workers.clone().try_acquire_owned().unwrap();
            ctx.token().cancel();
            other
        });
        let other = tokio::time::timeout(std::time::Duration::from_secs(5), suspended)
            .await
            .expect("cancelled task must not queue for a worker");
        assert!(ctx.checkpoint().is_err());
        assert_eq!(workers.available_permits(), 0);
        drop(other);
        assert_eq!(workers.available_permits(), 1);
    }
}
