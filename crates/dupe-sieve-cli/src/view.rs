use dupe_sieve_core::{DeliveryEvent, DuplicateGroup, FileId, ResultRow};
use std::collections::BTreeMap;
use tracing::trace;

/// Consumer-side copy of the results, rebuilt purely from delivery events.
#[derive(Debug, Default)]
pub struct DeliveredView {
    rows: BTreeMap<FileId, ResultRow>,
    groups: Vec<DuplicateGroup>,
    events: usize,
}

impl DeliveredView {
    pub fn apply(&mut self, event: DeliveryEvent) {
        self.events += 1;
        trace!("Delivery event {} with {} items", self.events, event.len());
        match event {
            DeliveryEvent::RowsAppended { rows } => {
                for row in rows {
                    self.rows.insert(row.file_id, row);
                }
            }
            DeliveryEvent::RowsUpdated { rows } => {
                for row in rows {
                    if let Some(slot) = self.rows.get_mut(&row.file_id) {
                        *slot = row;
                    }
                }
            }
            DeliveryEvent::GroupsSet { groups, reset } => {
                if reset {
                    self.groups.clear();
                }
                self.groups.extend(groups);
            }
        }
    }

    pub fn row(&self, id: FileId) -> Option<&ResultRow> {
        self.rows.get(&id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    pub fn events(&self) -> usize {
        self.events
    }
}
