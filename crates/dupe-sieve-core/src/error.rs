use crate::model::FileId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("File id {0} appears more than once in the input")]
    DuplicateFileId(FileId),

    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: FileId, reason: String },

    #[error("File id {0} is referenced but was never ingested")]
    MissingFile(FileId),

    #[error("Invalid edge {a_id} -> {b_id}: {reason}")]
    InvalidEdge {
        a_id: FileId,
        b_id: FileId,
        reason: String,
    },

    #[error("Invalid group {group_id}: {reason}")]
    InvalidGroup { group_id: u64, reason: String },

    #[error("Result store lock not acquired within {0:?}")]
    StoreContention(Duration),

    #[error("Result store lock poisoned by a panicking writer")]
    StorePoisoned,

    #[error("Delivery batcher is shut down")]
    BatcherClosed,

    #[error("{0}")]
    Other(String),
}
