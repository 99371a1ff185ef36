use dupe_sieve_core::{ProgressReporter, ProgressUpdate, RunStatus, Stage};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Spinner for the directory scan, which has no known total.
pub fn scan_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_chars(TICK_CHARS));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// One progress bar per pipeline stage.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.slot();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.slot().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_stage_start(&self, stage: Stage, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} [{}/{}] {:<18} [{{bar:30.cyan/dim}}] {{pos}}/{{len}}",
            stage.index() + 1,
            Stage::COUNT,
            stage.name()
        );
        if let Ok(style) = ProgressStyle::with_template(&template) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICK_CHARS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        if let Some(pb) = self.slot().as_ref() {
            if pb.length() != Some(update.total as u64) {
                pb.set_length(update.total as u64);
            }
            pb.set_position(update.processed as u64);
        }
    }

    fn on_stage_complete(&self, stage: Stage, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m {} complete in {:.2}s",
            stage.name(),
            duration_secs
        );
    }

    fn on_run_complete(&self, status: RunStatus) {
        self.finish_bar();
        if status != RunStatus::Completed {
            eprintln!("  \x1b[31m✗\x1b[0m Detection ended: {:?}", status);
        }
    }
}
