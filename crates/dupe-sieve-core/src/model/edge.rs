use serde::{Deserialize, Serialize};

use super::evidence::{Evidence, EvidenceKind};
use super::FileId;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Exact,
    Containment,
    Version,
}

impl Relation {
    /// Precedence used when a group mixes relation kinds: EXACT > CONTAINMENT > VERSION.
    pub fn strength(self) -> u8 {
        match self {
            Relation::Exact => 3,
            Relation::Containment => 2,
            Relation::Version => 1,
        }
    }
}

/// A pairwise relation hypothesis.
///
/// EXACT edges are undirected and stored with `a_id < b_id`. CONTAINMENT and
/// VERSION edges are directed: `a_id` is the container or the newer file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEdge {
    a_id: FileId,
    b_id: FileId,
    relation: Relation,
    confidence: f64,
    evidence: Vec<Evidence>,
}

impl CandidateEdge {
    pub fn new(
        a_id: FileId,
        b_id: FileId,
        relation: Relation,
        confidence: f64,
        evidence: Vec<Evidence>,
    ) -> Self {
        let (a_id, b_id) = if relation == Relation::Exact && b_id < a_id {
            (b_id, a_id)
        } else {
            (a_id, b_id)
        };
        Self {
            a_id,
            b_id,
            relation,
            confidence: clamp_confidence(confidence),
            evidence,
        }
    }

    pub fn a_id(&self) -> FileId {
        self.a_id
    }

    pub fn b_id(&self) -> FileId {
        self.b_id
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    pub fn evidence_of(&self, kind: EvidenceKind) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.kind == kind)
    }

    /// Unordered pair key, identical for (a, b) and (b, a).
    pub fn pair_key(&self) -> (FileId, FileId) {
        (self.a_id.min(self.b_id), self.a_id.max(self.b_id))
    }

    pub fn with_confidence(&self, confidence: f64) -> Self {
        Self {
            confidence: clamp_confidence(confidence),
            ..self.clone()
        }
    }

    pub fn with_evidence(&self, evidence: Evidence) -> Self {
        let mut next = self.clone();
        next.evidence.push(evidence);
        next
    }

    /// Check the structural invariants. Edges built by the detector always
    /// pass; deserialized ones might not.
    pub fn validate(&self) -> Result<(), Error> {
        if self.a_id == self.b_id {
            return Err(Error::InvalidEdge {
                a_id: self.a_id,
                b_id: self.b_id,
                reason: "an edge must join two distinct files".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidEdge {
                a_id: self.a_id,
                b_id: self.b_id,
                reason: format!("confidence {} outside [0, 1]", self.confidence),
            });
        }
        Ok(())
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
