use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;

use super::{CancelToken, DetectionOutcome, DetectionPipeline, RunStats, RunStatus};
use crate::delivery::ResultSink;
use crate::error::Error;
use crate::model::FileRecord;
use crate::progress::{ProgressReporter, SilentReporter};

/// A detection run bound to its inputs, ready to move onto a worker thread.
pub struct DetectionJob {
    pipeline: DetectionPipeline,
    records: Vec<FileRecord>,
    sink: Arc<dyn ResultSink>,
    reporter: Arc<dyn ProgressReporter>,
}

impl DetectionJob {
    pub fn new(
        pipeline: DetectionPipeline,
        records: Vec<FileRecord>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            pipeline,
            records,
            sink,
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Start the run on its own thread. A panic inside the run is caught and
    /// turned into a failed outcome.
    pub fn spawn(self) -> Result<JobHandle, Error> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("dupe-sieve-detect".to_string())
            .spawn(move || {
                let DetectionJob {
                    pipeline,
                    records,
                    sink,
                    reporter,
                } = self;
                let run = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.run(records, sink.as_ref(), reporter.as_ref(), &token)
                }));
                run.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!("Detection worker panicked: {}", message);
                    reporter.on_run_complete(RunStatus::Failed);
                    DetectionOutcome::failed(message, RunStats::default())
                })
            })?;
        Ok(JobHandle { cancel, handle })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}

/// Handle to a running job.
pub struct JobHandle {
    cancel: CancelToken,
    handle: JoinHandle<DetectionOutcome>,
}

impl JobHandle {
    /// Ask the run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run and return its outcome.
    pub fn join(self) -> DetectionOutcome {
        self.handle.join().unwrap_or_else(|payload| {
            DetectionOutcome::failed(panic_message(payload.as_ref()), RunStats::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::delivery::{ResultStore, StageCommit};
    use chrono::{TimeZone, Utc};

    struct PanickingSink;

    impl ResultSink for PanickingSink {
        fn commit(&self, _commit: StageCommit) -> Result<(), Error> {
            panic!("sink exploded");
        }
    }

    fn records() -> Vec<FileRecord> {
        let mtime = Utc.timestamp_opt(0, 0).unwrap();
        vec![
            FileRecord::new(1, "lib/Novel 1-10.txt", 100, mtime).with_strong_hash("h"),
            FileRecord::new(2, "copy/Novel 1-10.txt", 100, mtime).with_strong_hash("h"),
        ]
    }

    #[test]
    fn test_job_completes_on_worker_thread() {
        let store = Arc::new(ResultStore::default());
        let pipeline = DetectionPipeline::new(DetectorConfig::default());
        let handle = DetectionJob::new(pipeline, records(), store.clone()).spawn().unwrap();
        let outcome = handle.join();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(store.snapshot().unwrap().group_count(), 1);
    }

    #[test]
    fn test_panic_becomes_failed_outcome() {
        let pipeline = DetectionPipeline::new(DetectorConfig::default());
        let outcome = DetectionJob::new(pipeline, records(), Arc::new(PanickingSink))
            .spawn()
            .unwrap()
            .join();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("sink exploded"));
    }
}
