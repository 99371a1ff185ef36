pub mod config;
pub mod delivery;
pub mod detect;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod progress;

pub use config::{AppConfig, DetectorConfig};
pub use delivery::{
    BatchPolicy, DeliveryBatcher, DeliveryEvent, DeliverySink, ResultRouter, ResultSink,
    ResultStore, SinkBatch, StageCommit, StoreSnapshot,
};
pub use detect::{Block, BlockingService, GroupBuilder, RelationDetector};
pub use error::Error;
pub use model::{
    CandidateEdge, DuplicateGroup, Evidence, EvidenceKind, FileId, FileRecord, GroupStatus,
    GroupType, MemberRole, Relation, ResultRow,
};
pub use parser::{FilenameParser, ParseResult, Tag};
pub use pipeline::{
    CancelToken, DetectionJob, DetectionOutcome, DetectionPipeline, DetectionRequest, JobHandle,
    RunStats, RunStatus, Stage,
};
pub use progress::{FnReporter, ProgressReporter, ProgressUpdate, SilentReporter};
