//! The tie-break chain that decides which of two files is the better keeper.
//!
//! VersionStrategy uses it to orient edges (newer side first) and GroupBuilder
//! uses it to pick the canonical member. The two differ only in the last step.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criterion {
    Completion,
    Quality,
    Mtime,
    Size,
    FileId,
}

impl Criterion {
    /// VERSION edge confidence when this criterion decided the newer side.
    pub fn version_confidence(self) -> f64 {
        match self {
            Criterion::Completion => 0.9,
            Criterion::Quality => 0.85,
            Criterion::Mtime => 0.8,
            Criterion::Size => 0.75,
            Criterion::FileId => 0.6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Criterion::Completion => "COMPLETION",
            Criterion::Quality => "QUALITY",
            Criterion::Mtime => "MTIME",
            Criterion::Size => "SIZE",
            Criterion::FileId => "FILE_ID",
        }
    }
}

/// What to do when everything else ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdFallback {
    /// Version ordering: the lower id is the older file.
    HigherIsNewer,
    /// Canonical selection: the lower id is kept.
    LowerIsKept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// `Greater` means `a` is preferred.
    pub ordering: Ordering,
    pub criterion: Criterion,
}

impl Decision {
    pub fn prefers_a(&self) -> bool {
        self.ordering == Ordering::Greater
    }
}

/// Coverage weighted above tag bonuses, so a wider range always wins.
pub fn quality_score(entry: &Entry<'_>) -> u64 {
    let tag_bonus: u64 = entry.parse.tags.iter().map(|tag| tag.quality_bonus()).sum();
    entry.parse.coverage().saturating_mul(8).saturating_add(tag_bonus)
}

pub fn decide(a: &Entry<'_>, b: &Entry<'_>, fallback: IdFallback) -> Decision {
    let chain = [
        (
            Criterion::Completion,
            a.parse.is_complete().cmp(&b.parse.is_complete()),
        ),
        (Criterion::Quality, quality_score(a).cmp(&quality_score(b))),
        (Criterion::Mtime, a.record.mtime.cmp(&b.record.mtime)),
        (Criterion::Size, a.record.size.cmp(&b.record.size)),
    ];
    if let Some((criterion, ordering)) = chain.into_iter().find(|(_, o)| o.is_ne()) {
        return Decision {
            ordering,
            criterion,
        };
    }

    let ordering = match fallback {
        IdFallback::HigherIsNewer => a.id().cmp(&b.id()),
        IdFallback::LowerIsKept => b.id().cmp(&a.id()),
    };
    Decision {
        ordering,
        criterion: Criterion::FileId,
    }
}
