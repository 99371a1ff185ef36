use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    ExactHash,
    FastFingerprint,
    TitleMatch,
    RangeOverlap,
    TagDelta,
    MtimeDelta,
    SizeDelta,
}

/// Primitive evidence value. Evidence never carries references to records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvidenceValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for EvidenceValue {
    fn from(value: bool) -> Self {
        EvidenceValue::Bool(value)
    }
}

impl From<i64> for EvidenceValue {
    fn from(value: i64) -> Self {
        EvidenceValue::Int(value)
    }
}

impl From<u32> for EvidenceValue {
    fn from(value: u32) -> Self {
        EvidenceValue::Int(i64::from(value))
    }
}

impl From<u64> for EvidenceValue {
    fn from(value: u64) -> Self {
        EvidenceValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for EvidenceValue {
    fn from(value: usize) -> Self {
        EvidenceValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for EvidenceValue {
    fn from(value: f64) -> Self {
        EvidenceValue::Float(value)
    }
}

impl From<&str> for EvidenceValue {
    fn from(value: &str) -> Self {
        EvidenceValue::Text(value.to_string())
    }
}

impl From<String> for EvidenceValue {
    fn from(value: String) -> Self {
        EvidenceValue::Text(value)
    }
}

/// One fact supporting an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub detail: BTreeMap<String, EvidenceValue>,
}

impl Evidence {
    pub fn new(kind: EvidenceKind) -> Self {
        Self {
            kind,
            detail: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<EvidenceValue>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&EvidenceValue> {
        self.detail.get(key)
    }
}
