use std::sync::Arc;

use slotkeep_types::SlotName;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::scheduler::Shared;
use crate::types::{Completion, SlotState, TaskId, TaskKind, TaskUpdate};

/// Caller's end of a submitted task.
///
/// Updates queue up on the handle until the caller drains them, either by
/// polling ([`poll_updates`](Self::poll_updates)) or by awaiting
/// ([`next_update`](Self::next_update), [`wait_with`](Self::wait_with)).
/// The caller decides which context observes them.
pub struct TaskHandle<T, E> {
    id: TaskId,
    slot: SlotName,
    kind: TaskKind,
    token: CancellationToken,
    updates: mpsc::UnboundedReceiver<TaskUpdate>,
    updates_tx: mpsc::UnboundedSender<TaskUpdate>,
    done: oneshot::Receiver<Completion<T, E>>,
    finished: Option<Completion<T, E>>,
    shared: Arc<Shared>,
}

impl<T, E> TaskHandle<T, E> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TaskId,
        slot: SlotName,
        kind: TaskKind,
        token: CancellationToken,
        updates: mpsc::UnboundedReceiver<TaskUpdate>,
        updates_tx: mpsc::UnboundedSender<TaskUpdate>,
        done: oneshot::Receiver<Completion<T, E>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            slot,
            kind,
            token,
            updates,
            updates_tx,
            done,
            finished: None,
            shared,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn slot(&self) -> &SlotName {
        &self.slot
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Request cancellation. A queued task is removed and completes with
    /// [`Completion::Cancelled`] right away; a running task is signalled and
    /// stops at its next checkpoint.
    pub fn cancel(&self) {
        if self.shared.cancel_queued(&self.slot, self.id) {
            return;
        }
        if !self.token.is_cancelled() {
            self.token.cancel();
            if self.shared.mark_cancelling(&self.slot, self.id) {
                let _ = self.updates_tx.send(TaskUpdate::State(SlotState::Cancelling));
            }
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drain updates without blocking.
    pub fn poll_updates(&mut self) -> Vec<TaskUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            out.push(update);
        }
        out
    }

    /// Next update, or `None` once the task has finished and every update
    /// has been delivered.
    pub async fn next_update(&mut self) -> Option<TaskUpdate> {
        if let Ok(update) = self.updates.try_recv() {
            return Some(update);
        }
        if self.finished.is_some() {
            return None;
        }
        tokio::select! {
            biased;
            update = self.updates.recv() => update,
            done = &mut self.done => {
                self.finished = Some(done.unwrap_or(Completion::Cancelled));
                self.updates.try_recv().ok()
            }
        }
    }

    /// The completion if the task has finished. Non-blocking.
    pub fn try_completion(&mut self) -> Option<Completion<T, E>> {
        if let Some(done) = self.finished.take() {
            return Some(done);
        }
        match self.done.try_recv() {
            Ok(done) => Some(done),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Completion::Cancelled),
        }
    }

    /// Wait for completion, discarding updates.
    pub async fn wait(self) -> Completion<T, E> {
        self.wait_with(|_| {}).await
    }

    /// Wait for completion, handing every update to `on_update` first.
    pub async fn wait_with(mut self, mut on_update: impl FnMut(TaskUpdate)) -> Completion<T, E> {
        loop {
            if self.finished.is_some() {
                while let Ok(update) = self.updates.try_recv() {
                    on_update(update);
                }
                return self.finished.take().unwrap_or(Completion::Cancelled);
            }
            tokio::select! {
                biased;
                Some(update) = self.updates.recv() => on_update(update),
                done = &mut self.done => {
                    self.finished = Some(done.unwrap_or(Completion::Cancelled));
                }
            }
        }
    }
}

impl<T, E> std::fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("kind", &self.kind)
            .field("cancel_requested", &self.token.is_cancelled())
            .finish()
    }
}
