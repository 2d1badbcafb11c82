//! Async task scheduler for Slotkeep.
//!
//! Every save, load, sync or delete runs as a task bound to one slot:
//!
//! - **Single-flight:** at most one task per slot runs at a time; later tasks
//!   for a busy slot wait in FIFO order. Distinct slots run in parallel up to
//!   the worker pool size.
//! - **Progress:** jobs report a monotonic fraction in `[0, 1]` plus a phase
//!   label through their [`TaskContext`]. Updates are queued on the
//!   [`TaskHandle`] and delivered wherever the caller drains it.
//! - **Cancellation:** cooperative. Jobs call [`TaskContext::checkpoint`]
//!   between steps; a queued task is removed immediately.
//! - **Completion:** every task ends with exactly one [`Completion`].

pub mod context;
pub mod error;
pub mod handle;
pub mod scheduler;
pub mod types;

pub use context::TaskContext;
pub use error::SchedulerError;
pub use handle::TaskHandle;
pub use scheduler::{SchedulerConfig, ShutdownReport, TaskScheduler};
pub use types::{Completion, Progress, SlotState, SlotStateChange, TaskId, TaskKind, TaskUpdate};
