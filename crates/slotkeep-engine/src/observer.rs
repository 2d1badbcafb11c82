use slotkeep_scheduler::TaskContext;
use slotkeep_store::TransferObserver;

/// Maps a storage transfer onto a slice `[start, start + span]` of the
/// task's overall progress.
pub(crate) struct PhaseObserver<'a> {
    ctx: &'a TaskContext,
    start: f32,
    span: f32,
    phase: &'static str,
}

impl<'a> PhaseObserver<'a> {
    pub(crate) fn new(ctx: &'a TaskContext, start: f32, span: f32, phase: &'static str) -> Self {
        Self {
            ctx,
            start,
            span,
            phase,
        }
    }

    /// Codec checkpoint callback over the same slice.
    pub(crate) fn checkpoint(&self, done: usize, total: usize) -> bool {
        self.ctx.report(self.at(done as u64, total as u64), self.phase);
        !self.ctx.is_cancelled()
    }

    pub(crate) fn begin(&self) {
        self.ctx.report(self.start, self.phase);
    }

    fn at(&self, done: u64, total: u64) -> f32 {
        let fraction = if total == 0 { 1.0 } else { done as f32 / total as f32 };
        self.start + self.span * fraction.clamp(0.0, 1.0)
    }
}

impl TransferObserver for PhaseObserver<'_> {
    fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    fn on_progress(&self, done: u64, total: u64) {
        self.ctx.report(self.at(done, total), self.phase);
    }
}
