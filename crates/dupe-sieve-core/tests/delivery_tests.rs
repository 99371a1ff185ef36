use chrono::{TimeZone, Utc};
use crossbeam_channel::unbounded;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dupe_sieve_core::{
    BatchPolicy, CancelToken, DeliveryBatcher, DeliveryEvent, DetectionJob, DetectionPipeline,
    DetectorConfig, FileId, FileRecord, ResultRouter, ResultRow, ResultStore, RunStatus,
};

fn row(id: FileId) -> ResultRow {
    let mtime = Utc.timestamp_opt(0, 0).unwrap();
    let record = FileRecord::new(id, format!("/lib/book{}.txt", id), 1, mtime);
    ResultRow::from_record(&record)
}

fn appended_ids(events: &[DeliveryEvent]) -> Vec<FileId> {
    events
        .iter()
        .filter_map(|event| match event {
            DeliveryEvent::RowsAppended { rows } => Some(rows.iter().map(|r| r.file_id)),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn test_concurrent_adds_land_exactly_once() {
    let store = Arc::new(ResultStore::default());
    let workers: Vec<_> = (0..8)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for chunk in 0..10 {
                    let base = w * 1_000 + chunk * 10;
                    store.add_rows((base..base + 10).map(row).collect()).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.row_count(), 800);
    assert_eq!(snapshot.revision(), 80);
    let ids: Vec<FileId> = snapshot.rows().map(|r| r.file_id).collect();
    let unique: BTreeSet<FileId> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn test_timer_batcher_delivers_every_item_once() {
    let (tx, rx) = unbounded();
    let policy = BatchPolicy {
        max_append_chunk: 7,
        flush_interval: Duration::from_millis(2),
        ..BatchPolicy::default()
    };
    let batcher = Arc::new(DeliveryBatcher::new(policy, tx).unwrap());

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || {
                for n in 0..250 {
                    batcher.enqueue_appends(vec![row(p * 1_000 + n)]).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    batcher.shutdown();

    let events: Vec<DeliveryEvent> = rx.try_iter().collect();
    assert!(events.iter().all(|event| event.len() <= 7 && !event.is_empty()));
    let ids = appended_ids(&events);
    assert_eq!(ids.len(), 1_000);
    assert_eq!(ids.iter().copied().collect::<BTreeSet<_>>().len(), 1_000);
    assert!(batcher.enqueue_appends(vec![row(5_000)]).is_err());
}

#[test]
fn test_routed_run_streams_rows_before_groups() {
    let (tx, rx) = unbounded();
    let config = DetectorConfig::default();
    let store = Arc::new(ResultStore::new(config.store_lock_timeout()));
    let batcher = Arc::new(DeliveryBatcher::new(config.batch_policy(), tx).unwrap());
    let router = Arc::new(ResultRouter::new(Arc::clone(&store), Arc::clone(&batcher)));

    let mtime = Utc.timestamp_opt(100, 0).unwrap();
    let records = vec![
        FileRecord::new(1, "/a/Novel 1-114.txt", 114, mtime),
        FileRecord::new(2, "/a/Novel 1-158.txt", 158, mtime),
        FileRecord::new(3, "/b/Other.txt", 9, mtime),
    ];
    let handle = DetectionJob::new(DetectionPipeline::new(config), records, router)
        .spawn()
        .unwrap();
    let outcome = handle.join();
    assert_eq!(outcome.status, RunStatus::Completed);
    batcher.shutdown();

    let events: Vec<DeliveryEvent> = rx.try_iter().collect();
    let first_group = events
        .iter()
        .position(|e| matches!(e, DeliveryEvent::GroupsSet { .. }))
        .unwrap();
    let last_append = events
        .iter()
        .rposition(|e| matches!(e, DeliveryEvent::RowsAppended { .. }))
        .unwrap();
    assert!(last_append < first_group);
    assert_eq!(appended_ids(&events), vec![1, 2, 3]);

    let delivered: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeliveryEvent::GroupsSet { groups, .. } => Some(groups.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].canonical_id(), 2);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.group_count(), 1);
    for group in snapshot.groups() {
        assert!(group.member_ids().iter().all(|&id| snapshot.row(id).is_some()));
    }
}

#[test]
fn test_cancelled_job_leaves_no_groups() {
    let store = Arc::new(ResultStore::default());
    let records = (1..=50)
        .map(|id| {
            let mtime = Utc.timestamp_opt(0, 0).unwrap();
            FileRecord::new(id, format!("/lib/Novel 1-{}.txt", id), id, mtime)
        })
        .collect();
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = DetectionPipeline::new(DetectorConfig::default()).run(
        records,
        store.as_ref(),
        &dupe_sieve_core::SilentReporter,
        &cancel,
    );
    assert_eq!(outcome.status, RunStatus::Cancelled);
    let snapshot = store.snapshot().unwrap();
    assert_eq!((snapshot.row_count(), snapshot.group_count()), (0, 0));
}
