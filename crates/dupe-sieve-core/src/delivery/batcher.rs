use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{DeliveryEvent, DeliverySink, SinkBatch, StageCommit};
use crate::error::Error;
use crate::model::{DuplicateGroup, ResultRow};

/// Chunk limits and flush cadence of the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_append_chunk: usize,
    pub max_update_chunk: usize,
    pub max_group_chunk: usize,
    pub flush_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_append_chunk: 1000,
            max_update_chunk: 500,
            max_group_chunk: 500,
            flush_interval: Duration::from_millis(16),
        }
    }
}

/// Adapts a closure into a `DeliverySink`.
pub struct FnSink<F>(pub F);

impl<F> DeliverySink for FnSink<F>
where
    F: Fn(DeliveryEvent) + Send + Sync + 'static,
{
    fn deliver(&self, event: DeliveryEvent) {
        (self.0)(event)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub rows_appended: u64,
    pub rows_updated: u64,
    pub groups_delivered: u64,
    pub events: u64,
    pub ticks: u64,
}

#[derive(Default)]
struct Counters {
    rows_appended: AtomicU64,
    rows_updated: AtomicU64,
    groups_delivered: AtomicU64,
    events: AtomicU64,
    ticks: AtomicU64,
}

enum GroupEntry {
    /// Opens a replacement group set.
    SetStart,
    Group(DuplicateGroup),
}

#[derive(Default)]
struct Queues {
    appends: VecDeque<ResultRow>,
    updates: VecDeque<ResultRow>,
    groups: VecDeque<GroupEntry>,
    closed: bool,
}

impl Queues {
    fn is_empty(&self) -> bool {
        self.appends.is_empty() && self.updates.is_empty() && self.groups.is_empty()
    }

    fn take_appends(&mut self, max: usize) -> Option<DeliveryEvent> {
        let n = self.appends.len().min(max);
        (n > 0).then(|| DeliveryEvent::RowsAppended {
            rows: self.appends.drain(..n).collect(),
        })
    }

    fn take_updates(&mut self, max: usize) -> Option<DeliveryEvent> {
        let n = self.updates.len().min(max);
        (n > 0).then(|| DeliveryEvent::RowsUpdated {
            rows: self.updates.drain(..n).collect(),
        })
    }

    /// A chunk never spans two group sets.
    fn take_groups(&mut self, max: usize) -> Option<DeliveryEvent> {
        let reset = matches!(self.groups.front()?, GroupEntry::SetStart);
        if reset {
            self.groups.pop_front();
        }
        let mut groups = Vec::new();
        while groups.len() < max {
            match self.groups.front() {
                Some(GroupEntry::Group(_)) => {
                    if let Some(GroupEntry::Group(group)) = self.groups.pop_front() {
                        groups.push(group);
                    }
                }
                _ => break,
            }
        }
        Some(DeliveryEvent::GroupsSet { groups, reset })
    }
}

struct Shared {
    queues: Mutex<Queues>,
    wake: Condvar,
    /// Serializes flushes so chunks reach the sink in queue order.
    flush_lock: Mutex<()>,
    policy: BatchPolicy,
    sink: Box<dyn DeliverySink>,
    counters: Counters,
}

fn relock<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn queues(&self) -> MutexGuard<'_, Queues> {
        relock(self.queues.lock())
    }

    fn deliver(&self, event: DeliveryEvent) {
        let n = event.len() as u64;
        let counter = match &event {
            DeliveryEvent::RowsAppended { .. } => &self.counters.rows_appended,
            DeliveryEvent::RowsUpdated { .. } => &self.counters.rows_updated,
            DeliveryEvent::GroupsSet { .. } => &self.counters.groups_delivered,
        };
        counter.fetch_add(n, Ordering::Relaxed);
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        self.sink.deliver(event);
    }

    /// One timer tick: at most one chunk per queue. Updates wait while
    /// appends are queued, and groups wait until both are drained, so ticks
    /// deliver in the same stream order as `drain`.
    fn tick(&self) {
        let _flush = relock(self.flush_lock.lock());
        let events = {
            let mut queues = self.queues();
            let mut events = Vec::with_capacity(3);
            events.extend(queues.take_appends(self.policy.max_append_chunk));
            if queues.appends.is_empty() {
                events.extend(queues.take_updates(self.policy.max_update_chunk));
                if queues.updates.is_empty() {
                    events.extend(queues.take_groups(self.policy.max_group_chunk));
                }
            }
            events
        };
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        for event in events {
            self.deliver(event);
        }
    }

    /// Deliver everything still queued: appends first, then updates, then groups.
    fn drain(&self) {
        let _flush = relock(self.flush_lock.lock());
        loop {
            let event = {
                let mut queues = self.queues();
                queues
                    .take_appends(self.policy.max_append_chunk)
                    .or_else(|| queues.take_updates(self.policy.max_update_chunk))
                    .or_else(|| queues.take_groups(self.policy.max_group_chunk))
            };
            match event {
                Some(event) => self.deliver(event),
                None => break,
            }
        }
    }

    fn run_timer(&self) {
        let interval = self.policy.flush_interval;
        let mut queues = self.queues();
        loop {
            if queues.closed {
                return;
            }
            if queues.is_empty() {
                queues = relock(self.wake.wait(queues));
                continue;
            }

            // Something is queued: flush once the interval has elapsed.
            let deadline = Instant::now() + interval;
            while !queues.closed {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                queues = match self.wake.wait_timeout(queues, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            if queues.closed {
                return;
            }
            drop(queues);
            self.tick();
            queues = self.queues();
        }
    }
}

/// Coalesces high-frequency store mutations into bounded, rate-limited
/// deliveries.
///
/// Each stream (appends, updates, groups) is delivered FIFO. Across streams,
/// queued appends go out before any update and queued updates before any
/// group chunk. A timer thread flushes every `flush_interval` while anything is queued and
/// parks when the queues are empty. `shutdown` stops the timer and delivers
/// whatever is left, so every enqueued item reaches the sink exactly once.
pub struct DeliveryBatcher {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryBatcher {
    pub fn new(policy: BatchPolicy, sink: impl DeliverySink) -> Result<Self, Error> {
        let batcher = Self::manual(policy, sink);
        let shared = Arc::clone(&batcher.shared);
        let handle = thread::Builder::new()
            .name("dupe-sieve-delivery".to_string())
            .spawn(move || shared.run_timer())?;
        *relock(batcher.timer.lock()) = Some(handle);
        Ok(batcher)
    }

    /// A batcher without a timer thread; flushing happens only through
    /// `tick`, `flush` and `shutdown`.
    pub fn manual(policy: BatchPolicy, sink: impl DeliverySink) -> Self {
        let policy = BatchPolicy {
            max_append_chunk: policy.max_append_chunk.max(1),
            max_update_chunk: policy.max_update_chunk.max(1),
            max_group_chunk: policy.max_group_chunk.max(1),
            flush_interval: policy.flush_interval,
        };
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(Queues::default()),
                wake: Condvar::new(),
                flush_lock: Mutex::new(()),
                policy,
                sink: Box::new(sink),
                counters: Counters::default(),
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.shared.policy
    }

    fn enqueue(&self, push: impl FnOnce(&mut Queues)) -> Result<(), Error> {
        let mut queues = self.shared.queues();
        if queues.closed {
            return Err(Error::BatcherClosed);
        }
        let was_empty = queues.is_empty();
        push(&mut queues);
        drop(queues);
        if was_empty {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    pub fn enqueue_appends(&self, rows: Vec<ResultRow>) -> Result<(), Error> {
        self.enqueue(|queues| queues.appends.extend(rows))
    }

    pub fn enqueue_updates(&self, rows: Vec<ResultRow>) -> Result<(), Error> {
        self.enqueue(|queues| queues.updates.extend(rows))
    }

    /// Queue every batch of an applied stage commit in one step, so a timer
    /// tick never sees half of it.
    pub fn enqueue_commit(&self, commit: StageCommit) -> Result<(), Error> {
        self.enqueue(|queues| {
            for batch in commit.into_batches() {
                match batch {
                    SinkBatch::AddRows(rows) => queues.appends.extend(rows),
                    SinkBatch::UpdateRows(rows) => queues.updates.extend(rows),
                    SinkBatch::SetGroups(groups) => {
                        queues.groups.push_back(GroupEntry::SetStart);
                        queues.groups.extend(groups.into_iter().map(GroupEntry::Group));
                    }
                }
            }
        })
    }

    /// Queue a complete replacement group set.
    pub fn enqueue_group_set(&self, groups: Vec<DuplicateGroup>) -> Result<(), Error> {
        trace!("Queueing a set of {} groups", groups.len());
        self.enqueue(|queues| {
            queues.groups.push_back(GroupEntry::SetStart);
            queues
                .groups
                .extend(groups.into_iter().map(GroupEntry::Group));
        })
    }

    /// Number of items waiting in all queues.
    pub fn pending(&self) -> usize {
        let queues = self.shared.queues();
        let groups = queues
            .groups
            .iter()
            .filter(|entry| matches!(entry, GroupEntry::Group(_)))
            .count();
        queues.appends.len() + queues.updates.len() + groups
    }

    /// Run one timer tick on the calling thread.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Deliver everything queued so far on the calling thread.
    pub fn flush(&self) {
        self.shared.drain();
    }

    pub fn stats(&self) -> BatcherStats {
        let c = &self.shared.counters;
        BatcherStats {
            rows_appended: c.rows_appended.load(Ordering::Relaxed),
            rows_updated: c.rows_updated.load(Ordering::Relaxed),
            groups_delivered: c.groups_delivered.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
            ticks: c.ticks.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queues().closed
    }

    /// Close the queues, stop the timer and deliver everything left.
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        {
            let mut queues = self.shared.queues();
            queues.closed = true;
        }
        self.shared.wake.notify_all();

        let handle = relock(self.timer.lock()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Delivery timer thread panicked");
            }
        }
        self.shared.drain();
        debug!("Delivery batcher shut down: {:?}", self.stats());
    }
}

impl Drop for DeliveryBatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
