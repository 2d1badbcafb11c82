use std::fmt;

use slotkeep_types::SlotName;

/// Per-slot lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SlotState {
    #[default]
    Idle,
    Saving,
    Loading,
    Syncing,
    Deleting,
    /// Cancellation was requested for the running task.
    Cancelling,
    /// The last task failed; the slot returns to `Idle` right after.
    Error,
}

impl SlotState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle | Self::Error)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Loading => "loading",
            Self::Syncing => "syncing",
            Self::Deleting => "deleting",
            Self::Cancelling => "cancelling",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What a task does; decides the slot state while it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Save,
    Load,
    Sync,
    Delete,
}

impl TaskKind {
    pub fn active_state(&self) -> SlotState {
        match self {
            Self::Save => SlotState::Saving,
            Self::Load => SlotState::Loading,
            Self::Sync => SlotState::Syncing,
            Self::Delete => SlotState::Deleting,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Save => "save",
            Self::Load => "load",
            Self::Sync => "sync",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Scheduler-unique task identifier, increasing in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Terminal outcome of a task. Every task produces exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion<T, E> {
    Success(T),
    Failed(E),
    Cancelled,
}

impl<T, E> Completion<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Collapse into a `Result`, mapping cancellation through `cancelled`.
    pub fn into_result(self, cancelled: impl FnOnce() -> E) -> Result<T, E> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failed(e) => Err(e),
            Self::Cancelled => Err(cancelled()),
        }
    }
}

/// A progress report: fraction in `[0, 1]` and the current phase.
#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    pub fraction: f32,
    pub phase: String,
}

/// Non-terminal update delivered through a task handle.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskUpdate {
    State(SlotState),
    Progress(Progress),
}

/// Slot state transition, broadcast to scheduler subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotStateChange {
    pub slot: SlotName,
    pub task: TaskId,
    pub state: SlotState,
}
