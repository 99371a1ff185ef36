use crate::pipeline::{RunStatus, Stage};

/// One progress observation: `(stage, stage_count, processed, total, message)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub stage_index: usize,
    pub stage_count: usize,
    pub processed: usize,
    pub total: usize,
    pub message: String,
}

/// Trait for reporting detection progress.
///
/// The pipeline calls these from its worker thread at stage boundaries and at
/// fixed checkpoints inside a stage, never per item.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_stage_start(&self, _stage: Stage, _total: usize) {}
    fn on_progress(&self, _update: &ProgressUpdate) {}
    fn on_stage_complete(&self, _stage: Stage, _duration_secs: f64) {}
    fn on_run_complete(&self, _status: RunStatus) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Adapts a plain callback into a reporter that only receives `on_progress`.
pub struct FnReporter<F> {
    callback: F,
}

impl<F> FnReporter<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for FnReporter<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        (self.callback)(update)
    }
}
