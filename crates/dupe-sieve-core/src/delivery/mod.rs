//! Result delivery: the authoritative store, the batching layer that streams
//! its mutations to a consumer, and the router that feeds both.

mod batcher;
mod router;
mod store;

pub use batcher::{BatchPolicy, BatcherStats, DeliveryBatcher, FnSink};
pub use router::ResultRouter;
pub use store::{ResultStore, StoreSnapshot};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::model::{DuplicateGroup, ResultRow};

/// One store mutation inside a stage commit.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkBatch {
    /// Insert new rows; every id must be unused.
    AddRows(Vec<ResultRow>),
    /// Replace existing rows by id; unknown ids are dropped.
    UpdateRows(Vec<ResultRow>),
    /// Replace the whole group set; members must be stored.
    SetGroups(Vec<DuplicateGroup>),
}

impl SinkBatch {
    pub fn len(&self) -> usize {
        match self {
            SinkBatch::AddRows(rows) | SinkBatch::UpdateRows(rows) => rows.len(),
            SinkBatch::SetGroups(groups) => groups.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything one finished stage writes, split into row batches of at most
/// `batch_size`. A sink applies a commit entirely or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCommit {
    batch_size: usize,
    batches: Vec<SinkBatch>,
}

impl StageCommit {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batches: Vec::new(),
        }
    }

    pub fn add_rows(self, rows: Vec<ResultRow>) -> Self {
        self.push_rows(rows, SinkBatch::AddRows)
    }

    pub fn update_rows(self, rows: Vec<ResultRow>) -> Self {
        self.push_rows(rows, SinkBatch::UpdateRows)
    }

    pub fn set_groups(mut self, groups: Vec<DuplicateGroup>) -> Self {
        self.batches.push(SinkBatch::SetGroups(groups));
        self
    }

    fn push_rows(mut self, rows: Vec<ResultRow>, wrap: fn(Vec<ResultRow>) -> SinkBatch) -> Self {
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            self.batches.push(wrap(rows.by_ref().take(self.batch_size).collect()));
        }
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batches(&self) -> &[SinkBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<SinkBatch> {
        self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Where the pipeline commits finished stages.
pub trait ResultSink: Send + Sync {
    /// Apply every batch of `commit` in order, atomically: on error nothing
    /// from the commit is visible.
    fn commit(&self, commit: StageCommit) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryEvent {
    RowsAppended {
        rows: Vec<ResultRow>,
    },
    RowsUpdated {
        rows: Vec<ResultRow>,
    },
    /// `reset` marks the first chunk of a new group set; the consumer drops
    /// the groups it held before applying it.
    GroupsSet {
        groups: Vec<DuplicateGroup>,
        reset: bool,
    },
}

impl DeliveryEvent {
    pub fn len(&self) -> usize {
        match self {
            DeliveryEvent::RowsAppended { rows } | DeliveryEvent::RowsUpdated { rows } => {
                rows.len()
            }
            DeliveryEvent::GroupsSet { groups, .. } => groups.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer end of the batcher. Called from the timer thread or from the
/// thread running `shutdown`, never under a queue lock.
pub trait DeliverySink: Send + Sync + 'static {
    fn deliver(&self, event: DeliveryEvent);
}

impl DeliverySink for crossbeam_channel::Sender<DeliveryEvent> {
    fn deliver(&self, event: DeliveryEvent) {
        if self.send(event).is_err() {
            debug!("Delivery receiver dropped; event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileRecord, GroupType, MemberRole};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_event_wire_names() {
        let group =
            DuplicateGroup::new(3, vec![4, 5], 5, GroupType::Containment, 0.9, 12, 1).unwrap();
        let event = DeliveryEvent::GroupsSet {
            groups: vec![group],
            reset: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "GROUPS_SET");
        assert_eq!(value["groups"][0]["group_type"], "CONTAINMENT");
        assert_eq!(serde_json::to_value(MemberRole::Contained).unwrap(), "CONTAINED");

        let back: DeliveryEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_stage_commit_bounds_row_batches() {
        let mtime = Utc.timestamp_opt(0, 0).unwrap();
        let rows: Vec<ResultRow> = (1..=25)
            .map(|id| FileRecord::new(id, format!("f{}.txt", id), 1, mtime))
            .map(|record| ResultRow::from_record(&record))
            .collect();
        let commit = StageCommit::new(10)
            .set_groups(Vec::new())
            .update_rows(rows)
            .add_rows(Vec::new());

        let sizes: Vec<usize> = commit.batches().iter().map(SinkBatch::len).collect();
        assert_eq!(sizes, vec![0, 10, 10, 5]);
        assert!(matches!(commit.batches()[0], SinkBatch::SetGroups(_)));
        assert!(commit.batches()[1..]
            .iter()
            .all(|batch| matches!(batch, SinkBatch::UpdateRows(_))));
        assert_eq!(StageCommit::new(0).batch_size(), 1);
    }
}
