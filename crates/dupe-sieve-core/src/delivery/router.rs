use std::sync::Arc;

use super::{DeliveryBatcher, ResultSink, ResultStore, StageCommit};
use crate::error::Error;

/// Applies every commit to the store first and only then queues what the
/// store actually applied, so a consumer never hears about a row the store
/// does not hold.
#[derive(Clone)]
pub struct ResultRouter {
    store: Arc<ResultStore>,
    batcher: Arc<DeliveryBatcher>,
}

impl ResultRouter {
    pub fn new(store: Arc<ResultStore>, batcher: Arc<DeliveryBatcher>) -> Self {
        Self { store, batcher }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn batcher(&self) -> &Arc<DeliveryBatcher> {
        &self.batcher
    }
}

impl ResultSink for ResultRouter {
    fn commit(&self, commit: StageCommit) -> Result<(), Error> {
        let applied = self.store.commit(commit)?;
        if applied.is_empty() {
            return Ok(());
        }
        self.batcher.enqueue_commit(applied)
    }
}
