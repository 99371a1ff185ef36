mod edge;
mod evidence;
mod group;

pub use edge::{CandidateEdge, Relation};
pub use evidence::{Evidence, EvidenceKind, EvidenceValue};
pub use group::{DuplicateGroup, GroupId, GroupStatus, GroupType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::ParseResult;

pub type FileId = i64;

/// A file as handed over by the scanner. Immutable once built; everything
/// downstream refers to it by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub path: String,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    pub extension: String,
    #[serde(default)]
    pub strong_hash: Option<String>,
    #[serde(default)]
    pub fast_fingerprint: Option<u64>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub encoding_confidence: Option<f64>,
}

impl FileRecord {
    /// Build a record, deriving the extension from the file name.
    pub fn new(id: FileId, path: impl Into<String>, size: i64, mtime: DateTime<Utc>) -> Self {
        let path = path.into();
        let extension = extension_of(file_name_of(&path));
        Self {
            id,
            path,
            size,
            mtime,
            extension,
            strong_hash: None,
            fast_fingerprint: None,
            encoding: None,
            encoding_confidence: None,
        }
    }

    pub fn with_strong_hash(mut self, hash: impl Into<String>) -> Self {
        self.strong_hash = Some(hash.into());
        self
    }

    pub fn with_fast_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fast_fingerprint = Some(fingerprint);
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>, confidence: f64) -> Self {
        self.encoding = Some(encoding.into());
        self.encoding_confidence = Some(confidence);
        self
    }

    pub fn file_name(&self) -> &str {
        file_name_of(&self.path)
    }

    /// The last two path components, for display.
    pub fn short_path(&self) -> String {
        let mut parts = self
            .path
            .rsplit(['/', '\\'])
            .filter(|part| !part.is_empty());
        match (parts.next(), parts.next()) {
            (Some(name), Some(parent)) => format!("{}/{}", parent, name),
            (Some(name), None) => name.to_string(),
            _ => self.path.clone(),
        }
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn extension_of(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < file_name.len() => file_name[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// Role a file plays inside its group, derived from the strongest edge it
/// takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Container,
    Contained,
    Newer,
    Older,
    Copy,
}

/// Per-file row held by the result store and delivered to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub file_id: FileId,
    pub short_path: String,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    pub title: Option<String>,
    pub parse_confidence: Option<f64>,
    pub group_id: Option<GroupId>,
    pub group_type: Option<GroupType>,
    pub canonical: bool,
    pub role: Option<MemberRole>,
    pub confidence: Option<f64>,
}

impl ResultRow {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            file_id: record.id,
            short_path: record.short_path(),
            size: record.size,
            mtime: record.mtime,
            title: None,
            parse_confidence: None,
            group_id: None,
            group_type: None,
            canonical: false,
            role: None,
            confidence: None,
        }
    }

    pub fn with_parse(mut self, parse: &ParseResult) -> Self {
        self.title = Some(parse.title.clone());
        self.parse_confidence = Some(parse.confidence);
        self
    }

    pub fn with_membership(mut self, group: &DuplicateGroup, role: Option<MemberRole>) -> Self {
        self.group_id = Some(group.group_id());
        self.group_type = Some(group.group_type());
        self.canonical = group.canonical_id() == self.file_id;
        self.role = role;
        self.confidence = Some(group.confidence());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_extension_is_lowercased_file_suffix() {
        assert_eq!(FileRecord::new(1, "/a/b/Novel 1-10.TXT", 1, ts()).extension, "txt");
        assert_eq!(FileRecord::new(2, "/a/b/README", 1, ts()).extension, "");
        assert_eq!(FileRecord::new(3, "/a/.hidden", 1, ts()).extension, "");
        assert_eq!(FileRecord::new(4, "C:\\x\\y.tar.gz", 1, ts()).extension, "gz");
        assert_eq!(FileRecord::new(5, "/a.dir/file", 1, ts()).extension, "");
    }

    #[test]
    fn test_short_path_keeps_parent_and_name() {
        let record = FileRecord::new(1, "/library/novels/Novel 1-10.txt", 1, ts());
        assert_eq!(record.short_path(), "novels/Novel 1-10.txt");
        assert_eq!(record.file_name(), "Novel 1-10.txt");
        assert_eq!(FileRecord::new(2, "solo.txt", 1, ts()).short_path(), "solo.txt");
    }
}
