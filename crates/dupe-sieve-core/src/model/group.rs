use serde::{Deserialize, Serialize};

use super::edge::Relation;
use super::FileId;
use crate::error::Error;

pub type GroupId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    Exact,
    Containment,
    Version,
}

impl From<Relation> for GroupType {
    fn from(relation: Relation) -> Self {
        match relation {
            Relation::Exact => GroupType::Exact,
            Relation::Containment => GroupType::Containment,
            Relation::Version => GroupType::Version,
        }
    }
}

/// Review state. The detector only ever produces `Candidate`; the other
/// states belong to whoever acts on the groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    #[default]
    Candidate,
    Verified,
    Applied,
    Rejected,
}

/// One connected component of the edge graph. Immutable; changes go through
/// `with_status`, which returns a new value. Deserialization goes through
/// `new`, so a decoded group holds the same invariants as a built one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGroup")]
pub struct DuplicateGroup {
    group_id: GroupId,
    member_ids: Vec<FileId>,
    canonical_id: FileId,
    group_type: GroupType,
    confidence: f64,
    status: GroupStatus,
    bytes_savable: i64,
    edge_count: usize,
}

#[derive(Deserialize)]
struct RawGroup {
    group_id: GroupId,
    member_ids: Vec<FileId>,
    canonical_id: FileId,
    group_type: GroupType,
    confidence: f64,
    #[serde(default)]
    status: GroupStatus,
    bytes_savable: i64,
    edge_count: usize,
}

impl TryFrom<RawGroup> for DuplicateGroup {
    type Error = Error;

    fn try_from(raw: RawGroup) -> Result<Self, Error> {
        let group = DuplicateGroup::new(
            raw.group_id,
            raw.member_ids,
            raw.canonical_id,
            raw.group_type,
            raw.confidence,
            raw.bytes_savable,
            raw.edge_count,
        )?;
        Ok(Self {
            status: raw.status,
            ..group
        })
    }
}

impl DuplicateGroup {
    pub fn new(
        group_id: GroupId,
        mut member_ids: Vec<FileId>,
        canonical_id: FileId,
        group_type: GroupType,
        confidence: f64,
        bytes_savable: i64,
        edge_count: usize,
    ) -> Result<Self, Error> {
        member_ids.sort_unstable();
        member_ids.dedup();
        if member_ids.len() < 2 {
            return Err(Error::InvalidGroup {
                group_id,
                reason: format!("needs at least two members, got {}", member_ids.len()),
            });
        }
        if member_ids.binary_search(&canonical_id).is_err() {
            return Err(Error::InvalidGroup {
                group_id,
                reason: format!("canonical file {} is not a member", canonical_id),
            });
        }
        Ok(Self {
            group_id,
            member_ids,
            canonical_id,
            group_type,
            confidence: confidence.clamp(0.0, 1.0),
            status: GroupStatus::Candidate,
            bytes_savable,
            edge_count,
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Sorted ascending.
    pub fn member_ids(&self) -> &[FileId] {
        &self.member_ids
    }

    pub fn contains(&self, file_id: FileId) -> bool {
        self.member_ids.binary_search(&file_id).is_ok()
    }

    pub fn canonical_id(&self) -> FileId {
        self.canonical_id
    }

    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    pub fn bytes_savable(&self) -> i64 {
        self.bytes_savable
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn with_status(&self, status: GroupStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}
