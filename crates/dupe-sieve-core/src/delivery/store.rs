use ahash::AHashSet;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

use super::{ResultSink, SinkBatch, StageCommit};
use crate::error::Error;
use crate::model::{DuplicateGroup, FileId, GroupId, ResultRow};

const LOCK_RETRY_PAUSE: Duration = Duration::from_micros(200);

#[derive(Debug, Clone, Default)]
struct StoreState {
    rows: BTreeMap<FileId, ResultRow>,
    groups: BTreeMap<GroupId, Arc<DuplicateGroup>>,
    revision: u64,
}

/// A consistent, immutable view of the store at one revision.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    state: Arc<StoreState>,
}

impl StoreSnapshot {
    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    pub fn row_count(&self) -> usize {
        self.state.rows.len()
    }

    pub fn row(&self, id: FileId) -> Option<&ResultRow> {
        self.state.rows.get(&id)
    }

    /// Rows in ascending id order.
    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.state.rows.values()
    }

    pub fn group_count(&self) -> usize {
        self.state.groups.len()
    }

    pub fn group(&self, id: GroupId) -> Option<&DuplicateGroup> {
        self.state.groups.get(&id).map(Arc::as_ref)
    }

    /// Groups in ascending group id order.
    pub fn groups(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.state.groups.values().map(Arc::as_ref)
    }
}

/// Single-writer, thread-safe map of per-file results and groups.
///
/// Writers mutate a private copy when a snapshot is still held (copy on
/// write), so readers never observe a half-applied batch. Each batch is
/// validated in full before anything is applied.
#[derive(Debug)]
pub struct ResultStore {
    state: Mutex<Arc<StoreState>>,
    lock_timeout: Duration,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ResultStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(Arc::new(StoreState::default())),
            lock_timeout,
        }
    }

    /// Acquire the state lock, giving up after `lock_timeout`.
    fn lock(&self) -> Result<MutexGuard<'_, Arc<StoreState>>, Error> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match self.state.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(Error::StorePoisoned),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(Error::StoreContention(self.lock_timeout));
                    }
                    thread::sleep(LOCK_RETRY_PAUSE);
                }
            }
        }
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, Error> {
        let guard = self.lock()?;
        Ok(StoreSnapshot {
            state: Arc::clone(&guard),
        })
    }

    pub fn revision(&self) -> Result<u64, Error> {
        Ok(self.lock()?.revision)
    }

    pub fn add_rows(&self, rows: Vec<ResultRow>) -> Result<(), Error> {
        self.apply(vec![SinkBatch::AddRows(rows)]).map(|_| ())
    }

    /// Replace stored rows by id and return the rows that were applied.
    /// Rows with unknown ids are dropped.
    pub fn update_rows(&self, rows: Vec<ResultRow>) -> Result<Vec<ResultRow>, Error> {
        let applied = self.apply(vec![SinkBatch::UpdateRows(rows)])?;
        Ok(applied
            .into_iter()
            .flat_map(|batch| match batch {
                SinkBatch::UpdateRows(rows) => rows,
                _ => Vec::new(),
            })
            .collect())
    }

    /// Replace every group. Members must already be stored.
    pub fn set_groups(&self, groups: Vec<DuplicateGroup>) -> Result<(), Error> {
        self.apply(vec![SinkBatch::SetGroups(groups)]).map(|_| ())
    }

    /// Apply a whole stage commit under one lock and one revision. Returns
    /// the batches as applied, with update batches cut down to stored ids.
    pub fn commit(&self, commit: StageCommit) -> Result<StageCommit, Error> {
        let batch_size = commit.batch_size();
        let batches = self.apply(commit.into_batches())?;
        Ok(StageCommit {
            batch_size,
            batches,
        })
    }

    fn apply(&self, batches: Vec<SinkBatch>) -> Result<Vec<SinkBatch>, Error> {
        let (revision, applied) = {
            let mut guard = self.lock()?;
            validate(&guard, &batches)?;
            let mut applied = Vec::with_capacity(batches.len());
            let mut changed = false;
            let state = Arc::make_mut(&mut *guard);
            for batch in batches {
                match batch {
                    SinkBatch::AddRows(rows) => {
                        changed |= !rows.is_empty();
                        for row in &rows {
                            state.rows.insert(row.file_id, row.clone());
                        }
                        applied.push(SinkBatch::AddRows(rows));
                    }
                    SinkBatch::UpdateRows(rows) => {
                        let mut kept = Vec::with_capacity(rows.len());
                        for row in rows {
                            if let Some(slot) = state.rows.get_mut(&row.file_id) {
                                *slot = row.clone();
                                kept.push(row);
                            }
                        }
                        changed |= !kept.is_empty();
                        applied.push(SinkBatch::UpdateRows(kept));
                    }
                    SinkBatch::SetGroups(groups) => {
                        changed = true;
                        state.groups = groups
                            .iter()
                            .map(|group| (group.group_id(), Arc::new(group.clone())))
                            .collect();
                        applied.push(SinkBatch::SetGroups(groups));
                    }
                }
            }
            if changed {
                state.revision += 1;
            }
            applied.retain(|batch| matches!(batch, SinkBatch::SetGroups(_)) || !batch.is_empty());
            (state.revision, applied)
        };
        trace!("Store at revision {} after {} batches", revision, applied.len());
        Ok(applied)
    }

    /// Drop all rows and groups ahead of a re-run. The revision keeps counting.
    pub fn clear(&self) -> Result<(), Error> {
        let mut guard = self.lock()?;
        let revision = guard.revision + 1;
        *guard = Arc::new(StoreState {
            revision,
            ..StoreState::default()
        });
        Ok(())
    }
}

/// Check a whole sequence of batches against the current state before any
/// of it is applied. Updates never change which ids exist, so only added
/// ids need tracking.
fn validate(state: &StoreState, batches: &[SinkBatch]) -> Result<(), Error> {
    let mut added = AHashSet::new();
    for batch in batches {
        match batch {
            SinkBatch::AddRows(rows) => {
                for row in rows {
                    if state.rows.contains_key(&row.file_id) || !added.insert(row.file_id) {
                        return Err(Error::DuplicateFileId(row.file_id));
                    }
                }
            }
            SinkBatch::UpdateRows(_) => {}
            SinkBatch::SetGroups(groups) => {
                let missing = groups
                    .iter()
                    .flat_map(|group| group.member_ids())
                    .find(|&&id| !state.rows.contains_key(&id) && !added.contains(&id));
                if let Some(&missing) = missing {
                    return Err(Error::MissingFile(missing));
                }
            }
        }
    }
    Ok(())
}

impl ResultSink for ResultStore {
    fn commit(&self, commit: StageCommit) -> Result<(), Error> {
        ResultStore::commit(self, commit).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileRecord, GroupType};
    use chrono::{TimeZone, Utc};

    fn row(id: FileId) -> ResultRow {
        let mtime = Utc.timestamp_opt(0, 0).unwrap();
        ResultRow::from_record(&FileRecord::new(id, format!("dir/file{}.txt", id), 10, mtime))
    }

    fn titled(id: FileId, title: &str) -> ResultRow {
        let mut row = row(id);
        row.title = Some(title.to_string());
        row
    }

    #[test]
    fn test_add_is_atomic_per_batch() {
        let store = ResultStore::default();
        store.add_rows(vec![row(1), row(2)]).unwrap();
        let err = store.add_rows(vec![row(3), row(2)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateFileId(2)));

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.row_count(), 2);
        assert!(snapshot.row(3).is_none());
        assert_eq!(snapshot.revision(), 1);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let store = ResultStore::default();
        store.add_rows(vec![row(1)]).unwrap();
        let before = store.snapshot().unwrap();

        let mut updated = row(1);
        updated.title = Some("novel".to_string());
        let applied = store.update_rows(vec![updated, row(99)]).unwrap();
        assert_eq!(applied.iter().map(|r| r.file_id).collect::<Vec<_>>(), vec![1]);

        assert_eq!(before.row(1).unwrap().title, None);
        let after = store.snapshot().unwrap();
        assert_eq!(after.row(1).unwrap().title.as_deref(), Some("novel"));
        assert!(after.revision() > before.revision());
    }

    #[test]
    fn test_groups_must_reference_stored_rows() {
        let store = ResultStore::default();
        store.add_rows(vec![row(1), row(2)]).unwrap();
        let good = DuplicateGroup::new(1, vec![1, 2], 1, GroupType::Exact, 1.0, 10, 1).unwrap();
        let bad = DuplicateGroup::new(2, vec![1, 5], 1, GroupType::Exact, 1.0, 10, 1).unwrap();

        assert!(matches!(
            store.set_groups(vec![good.clone(), bad]),
            Err(Error::MissingFile(5))
        ));
        assert_eq!(store.snapshot().unwrap().group_count(), 0);

        store.set_groups(vec![good]).unwrap();
        assert_eq!(store.snapshot().unwrap().group(1).unwrap().canonical_id(), 1);

        store.clear().unwrap();
        let cleared = store.snapshot().unwrap();
        assert_eq!((cleared.row_count(), cleared.group_count()), (0, 0));
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let store = ResultStore::default();
        store.add_rows(vec![row(1), row(2)]).unwrap();
        let revision = store.revision().unwrap();

        let orphan = DuplicateGroup::new(1, vec![1, 9], 1, GroupType::Exact, 1.0, 10, 1).unwrap();
        let commit = StageCommit::new(1)
            .add_rows(vec![row(3)])
            .update_rows(vec![titled(1, "novel"), titled(2, "novel")])
            .set_groups(vec![orphan]);
        assert!(matches!(store.commit(commit), Err(Error::MissingFile(9))));

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.revision(), revision);
        assert_eq!(snapshot.row_count(), 2);
        assert!(snapshot.rows().all(|r| r.title.is_none()));
        assert_eq!(snapshot.group_count(), 0);
    }

    #[test]
    fn test_commit_applies_in_order_under_one_revision() {
        let store = ResultStore::default();
        store.add_rows(vec![row(1)]).unwrap();

        let group = DuplicateGroup::new(1, vec![1, 2], 2, GroupType::Exact, 1.0, 10, 1).unwrap();
        let commit = StageCommit::new(2)
            .add_rows(vec![row(2)])
            .update_rows(vec![titled(1, "a"), titled(7, "ghost"), titled(2, "b")])
            .set_groups(vec![group]);
        let applied = store.commit(commit).unwrap();

        let updated: Vec<FileId> = applied
            .batches()
            .iter()
            .flat_map(|batch| match batch {
                SinkBatch::UpdateRows(rows) => rows.iter().map(|r| r.file_id).collect(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(updated, vec![1, 2]);
        assert_eq!(applied.batches().len(), 4);

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.revision(), 2);
        assert_eq!(snapshot.row(2).unwrap().title.as_deref(), Some("b"));
        assert_eq!(snapshot.group(1).unwrap().canonical_id(), 2);
    }

    #[test]
    fn test_lock_timeout_reports_contention() {
        let store = ResultStore::new(Duration::from_millis(20));
        let _held = store.state.lock().unwrap();
        assert!(matches!(store.snapshot(), Err(Error::StoreContention(_))));
    }
}
