//! Stage orchestration for a detection run.
//!
//! Five stages run in order, each consuming the previous stage's context by
//! value: FileMapping, FilenameParsing, Blocking, RelationDetection and
//! GroupCreation. A stage hands its writes to the sink as one `StageCommit`
//! once it has finished, so a cancelled or failed run leaves exactly the
//! completed stages' batches behind.

mod job;

pub use job::{DetectionJob, JobHandle};

use ahash::AHashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::DetectorConfig;
use crate::delivery::{ResultSink, StageCommit};
use crate::detect::{
    index_entries, member_roles, BlockingOutcome, BlockingService, Entry, GroupBuilder,
    RelationDetector,
};
use crate::error::Error;
use crate::model::{CandidateEdge, DuplicateGroup, FileId, FileRecord, ResultRow};
use crate::parser::{FilenameParser, ParseResult};
use crate::progress::{ProgressReporter, ProgressUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    FileMapping,
    FilenameParsing,
    Blocking,
    RelationDetection,
    GroupCreation,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::FileMapping,
        Stage::FilenameParsing,
        Stage::Blocking,
        Stage::RelationDetection,
        Stage::GroupCreation,
    ];

    pub const COUNT: usize = Stage::ALL.len();

    /// Zero-based position in the run.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::FileMapping => "file mapping",
            Stage::FilenameParsing => "filename parsing",
            Stage::Blocking => "blocking",
            Stage::RelationDetection => "relation detection",
            Stage::GroupCreation => "group creation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Shared cancellation flag, polled by the pipeline at checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which relation kinds a run looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRequest {
    pub enable_exact: bool,
    pub enable_containment: bool,
    pub enable_version: bool,
}

impl Default for DetectionRequest {
    fn default() -> Self {
        Self {
            enable_exact: true,
            enable_containment: true,
            enable_version: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub files: usize,
    pub blocks: usize,
    pub split_blocks: usize,
    pub catch_all_overflow: usize,
    pub content_blocks: usize,
    pub comparisons: usize,
    pub edges: usize,
    pub groups: usize,
    pub bytes_savable: i64,
    pub stages_completed: usize,
    pub timings: Vec<StageTiming>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub status: RunStatus,
    pub groups: Vec<DuplicateGroup>,
    pub edges: Vec<CandidateEdge>,
    /// Diagnostic for a failed run.
    pub error: Option<String>,
    pub stats: RunStats,
}

impl DetectionOutcome {
    pub fn failed(message: impl Into<String>, stats: RunStats) -> Self {
        Self {
            status: RunStatus::Failed,
            groups: Vec::new(),
            edges: Vec::new(),
            error: Some(message.into()),
            stats,
        }
    }

    /// Only a completed run holds the full result set.
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[derive(Debug)]
enum StageError {
    Cancelled,
    Failed(Error),
}

impl From<Error> for StageError {
    fn from(err: Error) -> Self {
        StageError::Failed(err)
    }
}

type StageResult<T> = Result<T, StageError>;

/// Progress, cancellation and timing bookkeeping shared by all stages.
struct StageRunner<'r> {
    reporter: &'r dyn ProgressReporter,
    cancel: &'r CancelToken,
    stats: RunStats,
}

impl StageRunner<'_> {
    fn check_cancel(&self) -> StageResult<()> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn begin(&self, stage: Stage, total: usize) -> StageResult<Instant> {
        self.check_cancel()?;
        info!("Stage {}/{}: {} ({} items)", stage.index() + 1, Stage::COUNT, stage.name(), total);
        self.reporter.on_stage_start(stage, total);
        self.report(stage, 0, total, format!("{} started", stage.name()));
        Ok(Instant::now())
    }

    fn report(&self, stage: Stage, processed: usize, total: usize, message: String) {
        self.reporter.on_progress(&ProgressUpdate {
            stage,
            stage_index: stage.index(),
            stage_count: Stage::COUNT,
            processed,
            total,
            message,
        });
    }

    fn checkpoint(&self, stage: Stage, processed: usize, total: usize) -> StageResult<()> {
        self.report(stage, processed, total, format!("{} {}/{}", stage.name(), processed, total));
        self.check_cancel()
    }

    fn finish(&mut self, stage: Stage, started: Instant, total: usize) {
        let seconds = started.elapsed().as_secs_f64();
        self.report(stage, total, total, format!("{} done", stage.name()));
        self.stats.stages_completed += 1;
        self.stats.timings.push(StageTiming { stage, seconds });
        self.reporter.on_stage_complete(stage, seconds);
        info!("Stage {} completed in {:.2}s", stage.name(), seconds);
    }
}

struct ParsedFiles {
    records: Vec<FileRecord>,
    parses: Vec<ParseResult>,
}

impl ParsedFiles {
    fn entries(&self) -> Vec<Entry<'_>> {
        self.records
            .iter()
            .zip(&self.parses)
            .map(|(record, parse)| Entry::new(record, parse))
            .collect()
    }
}

struct BlockedFiles {
    parsed: ParsedFiles,
    blocking: BlockingOutcome,
}

struct DetectedEdges {
    parsed: ParsedFiles,
    edges: Vec<CandidateEdge>,
}

/// Runs the five detection stages against a result sink.
#[derive(Debug, Clone)]
pub struct DetectionPipeline {
    config: DetectorConfig,
    request: DetectionRequest,
    parser: FilenameParser,
}

impl DetectionPipeline {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            request: DetectionRequest::default(),
            parser: FilenameParser::new(),
        }
    }

    pub fn with_request(mut self, request: DetectionRequest) -> Self {
        self.request = request;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn stage_commit(&self) -> StageCommit {
        StageCommit::new(self.config.commit_batch_size)
    }

    /// Run every stage. Never panics on bad input and never returns an error:
    /// failures and cancellation are reported through the outcome status.
    pub fn run(
        &self,
        records: Vec<FileRecord>,
        sink: &dyn ResultSink,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> DetectionOutcome {
        let started = Instant::now();
        let mut runner = StageRunner {
            reporter,
            cancel,
            stats: RunStats::default(),
        };

        let result = self.run_stages(records, sink, &mut runner);
        let stats = runner.stats;
        let outcome = match result {
            Ok((groups, edges)) => {
                info!(
                    "Detection completed in {:.2}s: {} files, {} edges, {} groups, {} bytes",
                    started.elapsed().as_secs_f64(),
                    stats.files,
                    stats.edges,
                    stats.groups,
                    stats.bytes_savable
                );
                DetectionOutcome {
                    status: RunStatus::Completed,
                    groups,
                    edges,
                    error: None,
                    stats,
                }
            }
            Err(StageError::Cancelled) => {
                info!(
                    "Detection cancelled after {} of {} stages",
                    stats.stages_completed,
                    Stage::COUNT
                );
                DetectionOutcome {
                    status: RunStatus::Cancelled,
                    groups: Vec::new(),
                    edges: Vec::new(),
                    error: None,
                    stats,
                }
            }
            Err(StageError::Failed(err)) => {
                error!("Detection failed: {}", err);
                DetectionOutcome::failed(err.to_string(), stats)
            }
        };
        reporter.on_run_complete(outcome.status);
        outcome
    }

    fn run_stages(
        &self,
        records: Vec<FileRecord>,
        sink: &dyn ResultSink,
        runner: &mut StageRunner<'_>,
    ) -> StageResult<(Vec<DuplicateGroup>, Vec<CandidateEdge>)> {
        let mapped = self.map_files(records, sink, runner)?;
        let parsed = self.parse_filenames(mapped, sink, runner)?;
        let blocked = self.block(parsed, runner)?;
        let detected = self.detect_relations(blocked, runner)?;
        self.create_groups(detected, sink, runner)
    }

    fn map_files(
        &self,
        mut records: Vec<FileRecord>,
        sink: &dyn ResultSink,
        runner: &mut StageRunner<'_>,
    ) -> StageResult<Vec<FileRecord>> {
        let stage = Stage::FileMapping;
        let total = records.len();
        let started = runner.begin(stage, total)?;

        let mut seen = AHashSet::with_capacity(total);
        let interval = self.config.checkpoint_every();
        for (n, record) in records.iter().enumerate() {
            if !seen.insert(record.id) {
                return Err(Error::DuplicateFileId(record.id).into());
            }
            if record.path.is_empty() {
                return Err(Error::InvalidRecord {
                    id: record.id,
                    reason: "empty path".to_string(),
                }
                .into());
            }
            if record.size < 0 {
                return Err(Error::InvalidRecord {
                    id: record.id,
                    reason: format!("negative size {}", record.size),
                }
                .into());
            }
            if (n + 1) % interval == 0 {
                runner.checkpoint(stage, n + 1, total)?;
            }
        }
        records.sort_unstable_by_key(|record| record.id);

        let rows: Vec<ResultRow> = records.iter().map(ResultRow::from_record).collect();
        sink.commit(self.stage_commit().add_rows(rows))?;

        runner.stats.files = total;
        runner.finish(stage, started, total);
        Ok(records)
    }

    fn parse_filenames(
        &self,
        records: Vec<FileRecord>,
        sink: &dyn ResultSink,
        runner: &mut StageRunner<'_>,
    ) -> StageResult<ParsedFiles> {
        let stage = Stage::FilenameParsing;
        let total = records.len();
        let started = runner.begin(stage, total)?;

        let interval = self.config.checkpoint_every();
        let mut parses = Vec::with_capacity(total);
        for chunk in records.chunks(interval) {
            let parsed: Vec<ParseResult> = chunk
                .par_iter()
                .map(|record| self.parser.parse(&record.path))
                .collect();
            parses.extend(parsed);
            runner.checkpoint(stage, parses.len(), total)?;
        }
        let fallbacks = parses.iter().filter(|p| p.segments.is_empty()).count();
        debug!("Parsed {} names, {} without numeric segments", total, fallbacks);

        let rows: Vec<ResultRow> = records
            .iter()
            .zip(&parses)
            .map(|(record, parse)| ResultRow::from_record(record).with_parse(parse))
            .collect();
        sink.commit(self.stage_commit().update_rows(rows))?;

        runner.finish(stage, started, total);
        Ok(ParsedFiles { records, parses })
    }

    fn block(
        &self,
        parsed: ParsedFiles,
        runner: &mut StageRunner<'_>,
    ) -> StageResult<BlockedFiles> {
        let stage = Stage::Blocking;
        let total = parsed.records.len();
        let started = runner.begin(stage, total)?;

        let blocking = BlockingService::new(&self.config).block(&parsed.entries());
        runner.check_cancel()?;

        let stats = &blocking.stats;
        runner.stats.blocks = stats.blocks;
        runner.stats.split_blocks = stats.split_blocks;
        runner.stats.catch_all_overflow = stats.catch_all_overflow;
        runner.stats.content_blocks = stats.content_blocks;
        runner.stats.comparisons = stats.comparisons;

        runner.finish(stage, started, total);
        Ok(BlockedFiles { parsed, blocking })
    }

    fn detect_relations(
        &self,
        blocked: BlockedFiles,
        runner: &mut StageRunner<'_>,
    ) -> StageResult<DetectedEdges> {
        let stage = Stage::RelationDetection;
        let BlockedFiles { parsed, blocking } = blocked;
        let total = blocking.stats.comparisons;
        let started = runner.begin(stage, total)?;

        let detector = RelationDetector::new(&self.config, &self.request);
        let entries = parsed.entries();
        let index = index_entries(&entries);
        let compare = |pairs: &[(FileId, FileId)]| -> Vec<CandidateEdge> {
            pairs
                .par_iter()
                .filter_map(|&(a, b)| detector.compare(index.get(&a)?, index.get(&b)?))
                .collect()
        };

        // Pairs from small blocks are pooled so every checkpoint covers
        // `interval` comparisons, however the blocks are sized.
        let interval = self.config.checkpoint_every();
        let mut edges = Vec::new();
        let mut pending: Vec<(FileId, FileId)> = Vec::with_capacity(interval);
        let mut processed = 0;
        for block in &blocking.blocks {
            for pair in blocking.comparison_pairs(block) {
                pending.push(pair);
                if pending.len() == interval {
                    edges.extend(compare(&pending[..]));
                    processed += pending.len();
                    pending.clear();
                    runner.checkpoint(stage, processed, total)?;
                }
            }
        }
        if !pending.is_empty() {
            edges.extend(compare(&pending[..]));
            processed += pending.len();
            runner.checkpoint(stage, processed, total)?;
        }
        debug!(
            "{} edges from {} comparisons in {} blocks",
            edges.len(),
            processed,
            blocking.blocks.len()
        );

        runner.stats.edges = edges.len();
        runner.finish(stage, started, total);
        Ok(DetectedEdges { parsed, edges })
    }

    fn create_groups(
        &self,
        detected: DetectedEdges,
        sink: &dyn ResultSink,
        runner: &mut StageRunner<'_>,
    ) -> StageResult<(Vec<DuplicateGroup>, Vec<CandidateEdge>)> {
        let stage = Stage::GroupCreation;
        let DetectedEdges { parsed, edges } = detected;
        let total = edges.len();
        let started = runner.begin(stage, total)?;

        let entries = parsed.entries();
        let index = index_entries(&entries);
        let groups = GroupBuilder::new().build(&edges, &index)?;
        runner.check_cancel()?;

        let roles = member_roles(&edges);
        let mut rows = Vec::new();
        for group in &groups {
            for &id in group.member_ids() {
                if let (Some(entry), Some(&role)) = (index.get(&id), roles.get(&id)) {
                    rows.push(
                        ResultRow::from_record(entry.record)
                            .with_parse(entry.parse)
                            .with_membership(group, Some(role)),
                    );
                }
            }
        }

        sink.commit(self.stage_commit().set_groups(groups.clone()).update_rows(rows))?;

        runner.stats.groups = groups.len();
        runner.stats.bytes_savable = groups.iter().map(DuplicateGroup::bytes_savable).sum();
        runner.finish(stage, started, total);
        Ok((groups, edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ResultStore;
    use crate::progress::SilentReporter;
    use chrono::{TimeZone, Utc};

    fn record(id: i64, name: &str, size: i64) -> FileRecord {
        FileRecord::new(id, name, size, Utc.timestamp_opt(1_000, 0).unwrap())
    }

    #[test]
    fn test_duplicate_ids_fail_the_run() {
        let store = ResultStore::default();
        let outcome = DetectionPipeline::new(DetectorConfig::default()).run(
            vec![record(1, "a.txt", 1), record(1, "b.txt", 1)],
            &store,
            &SilentReporter,
            &CancelToken::new(),
        );
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("more than once"));
        assert_eq!(store.snapshot().unwrap().row_count(), 0);
    }

    #[test]
    fn test_cancel_before_start() {
        let store = ResultStore::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = DetectionPipeline::new(DetectorConfig::default()).run(
            vec![record(1, "Novel 1-10.txt", 1)],
            &store,
            &SilentReporter,
            &cancel,
        );
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.stats.stages_completed, 0);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_empty_input_completes() {
        let store = ResultStore::default();
        let outcome = DetectionPipeline::new(DetectorConfig::default()).run(
            Vec::new(),
            &store,
            &SilentReporter,
            &CancelToken::new(),
        );
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.stats.stages_completed, Stage::COUNT);
        assert!(outcome.groups.is_empty());
    }
}
