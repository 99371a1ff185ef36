//! Candidate blocking, pairwise relation detection and grouping.

mod blocking;
mod group;
mod policy;
mod relation;

pub use blocking::{Block, BlockKey, BlockingOutcome, BlockingService, BlockingStats};
pub use group::{member_roles, GroupBuilder};
pub use policy::{decide, Criterion, Decision, IdFallback};
pub use relation::{RelationDetector, Strategy};

use ahash::AHashMap;

use crate::model::{FileId, FileRecord};
use crate::parser::ParseResult;

/// A record paired with its parse result. Cheap to copy.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub record: &'a FileRecord,
    pub parse: &'a ParseResult,
}

impl<'a> Entry<'a> {
    pub fn new(record: &'a FileRecord, parse: &'a ParseResult) -> Self {
        Self { record, parse }
    }

    pub fn id(&self) -> FileId {
        self.record.id
    }
}

pub type EntryIndex<'a> = AHashMap<FileId, Entry<'a>>;

pub fn index_entries<'a>(entries: &[Entry<'a>]) -> EntryIndex<'a> {
    entries.iter().map(|entry| (entry.id(), *entry)).collect()
}
