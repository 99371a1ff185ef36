//! Filename parsing: title, numeric segments and tags from a file name.
//!
//! Parsing is total. Every name produces a `ParseResult`; names that match no
//! pattern come back as a low-confidence fallback with no segments.

mod patterns;
mod tags;

pub use tags::{extract_tags, is_degenerate, normalize_title, Tag};

use regex::Match;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use patterns::{
    ends_with_label, number, unit_from_token, LOOSE_RANGE, MULTI_SEGMENT, RANGE, SINGLE_PREFIX,
    SINGLE_SUFFIX, TRAILING_NUMBER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentKind {
    Single,
    Range,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Unit {
    Chapter,
    Volume,
    Part,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseMethod {
    Pattern,
    Heuristic,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: u32,
    pub end: u32,
    pub unit: Option<Unit>,
    /// Segment label of multi-segment names, lower-cased ("main", "외전").
    pub label: Option<String>,
}

impl Segment {
    fn new(kind: SegmentKind, a: u32, b: u32, unit: Option<Unit>) -> Self {
        Self {
            kind,
            start: a.min(b),
            end: a.max(b),
            unit,
            label: None,
        }
    }

    /// Number of items covered, both ends inclusive.
    pub fn len(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    pub fn contains(&self, other: &Segment) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Segment) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn same_range(&self, other: &Segment) -> bool {
        self.start == other.start && self.end == other.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub title: String,
    pub segments: Vec<Segment>,
    pub tags: BTreeSet<Tag>,
    pub confidence: f64,
    pub method: ParseMethod,
}

impl ParseResult {
    pub fn primary(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_complete(&self) -> bool {
        self.has_tag(&Tag::Complete)
    }

    /// Total number of items covered by all segments.
    pub fn coverage(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameParser;

impl FilenameParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse the file name of `path`. Directories and the extension are ignored.
    pub fn parse(&self, path: &str) -> ParseResult {
        let stem = stem_of(path);
        parse_range(stem)
            .or_else(|| parse_single(stem))
            .or_else(|| parse_multi(stem))
            .or_else(|| parse_heuristic(stem))
            .unwrap_or_else(|| parse_fallback(stem))
    }
}

fn stem_of(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Text outside of `start..end`, joined by a space, for tag extraction.
fn residual(stem: &str, start: usize, end: usize) -> String {
    format!("{} {}", &stem[..start], &stem[end..])
}

fn build(
    stem: &str,
    title_end: usize,
    rest: &str,
    segments: Vec<Segment>,
    confidence: f64,
    method: ParseMethod,
) -> ParseResult {
    ParseResult {
        title: normalize_title(&stem[..title_end]),
        segments,
        tags: extract_tags(rest),
        confidence,
        method,
    }
}

fn parse_range(stem: &str) -> Option<ParseResult> {
    let mut best: Option<(Match<'_>, Segment)> = None;
    for caps in RANGE.captures_iter(stem) {
        let Some(whole) = caps.get(0) else { continue };
        if ends_with_label(&stem[..whole.start()]) {
            continue;
        }
        let (Some(a), Some(b)) = (number(&caps, 2), number(&caps, 3)) else {
            continue;
        };
        let unit = caps
            .get(1)
            .or_else(|| caps.get(4))
            .and_then(|m| unit_from_token(m.as_str()));
        let segment = Segment::new(SegmentKind::Range, a, b, unit);
        // Longest range wins; the first one wins a tie.
        if best.as_ref().map_or(true, |(_, seg)| segment.len() > seg.len()) {
            best = Some((whole, segment));
        }
    }

    let (whole, segment) = best?;
    let confidence = if segment.unit.is_some() { 0.9 } else { 0.85 };
    let rest = residual(stem, whole.start(), whole.end());
    Some(build(
        stem,
        whole.start(),
        &rest,
        vec![segment],
        confidence,
        ParseMethod::Pattern,
    ))
}

fn parse_single(stem: &str) -> Option<ParseResult> {
    let suffix = SINGLE_SUFFIX.captures(stem).and_then(|caps| {
        let whole = caps.get(0)?;
        let n = number(&caps, 1)?;
        let unit = caps.get(2).and_then(|m| unit_from_token(m.as_str()))?;
        Some((whole, n, unit))
    });
    let prefix = || {
        SINGLE_PREFIX.captures(stem).and_then(|caps| {
            let whole = caps.get(0)?;
            let n = number(&caps, 2)?;
            let unit = caps.get(1).and_then(|m| unit_from_token(m.as_str()))?;
            Some((whole, n, unit))
        })
    };

    let (whole, n, unit) = suffix.or_else(prefix)?;
    let rest = residual(stem, whole.start(), whole.end());
    Some(build(
        stem,
        whole.start(),
        &rest,
        vec![Segment::new(SegmentKind::Single, n, n, Some(unit))],
        0.8,
        ParseMethod::Pattern,
    ))
}

fn parse_multi(stem: &str) -> Option<ParseResult> {
    let mut segments = Vec::new();
    let mut title_end = None;
    let mut rest = String::new();
    let mut cursor = 0;

    for caps in MULTI_SEGMENT.captures_iter(stem) {
        let (Some(whole), Some(a), Some(b)) = (caps.get(0), number(&caps, 2), number(&caps, 3))
        else {
            continue;
        };
        let unit = caps.get(4).and_then(|m| unit_from_token(m.as_str()));
        let mut segment = Segment::new(SegmentKind::Multi, a, b, unit);
        segment.label = caps.get(1).map(|m| m.as_str().to_lowercase());
        segments.push(segment);

        title_end.get_or_insert(whole.start());
        rest.push_str(&stem[cursor..whole.start()]);
        rest.push(' ');
        cursor = whole.end();
    }

    let title_end = title_end?;
    rest.push_str(&stem[cursor..]);
    let confidence = if segments.len() >= 2 { 0.95 } else { 0.8 };
    Some(build(
        stem,
        title_end,
        &rest,
        segments,
        confidence,
        ParseMethod::Pattern,
    ))
}

fn parse_heuristic(stem: &str) -> Option<ParseResult> {
    let glued = LOOSE_RANGE
        .captures_iter(stem)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let (a, b) = (number(&caps, 1)?, number(&caps, 2)?);
            Some((whole, Segment::new(SegmentKind::Range, a, b, None)))
        })
        .fold(None::<(Match<'_>, Segment)>, |best, candidate| match best {
            Some(current) if current.1.len() >= candidate.1.len() => Some(current),
            _ => Some(candidate),
        });
    if let Some((whole, segment)) = glued {
        let rest = residual(stem, whole.start(), whole.end());
        return Some(build(
            stem,
            whole.start(),
            &rest,
            vec![segment],
            0.5,
            ParseMethod::Heuristic,
        ));
    }

    // A bare trailing number, looked for once bracket groups are out of the way.
    let tag_start = stem
        .find(['(', '[', '{', '【', '@'])
        .unwrap_or(stem.len());
    let head = &stem[..tag_start];
    let caps = TRAILING_NUMBER.captures(head)?;
    let whole = caps.get(0)?;
    let n = number(&caps, 1)?;
    if whole.start() == 0 {
        return None;
    }
    let rest = residual(stem, whole.start(), whole.end());
    Some(build(
        stem,
        whole.start(),
        &rest,
        vec![Segment::new(SegmentKind::Single, n, n, None)],
        0.45,
        ParseMethod::Heuristic,
    ))
}

fn parse_fallback(stem: &str) -> ParseResult {
    ParseResult {
        title: normalize_title(stem),
        segments: Vec::new(),
        tags: extract_tags(stem),
        confidence: 0.2,
        method: ParseMethod::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(name: &str) -> ParseResult {
        FilenameParser::new().parse(name)
    }

    #[test]
    fn test_hyphen_range() {
        let result = parse("/books/Novel 1-114.txt");
        assert_eq!(result.title, "novel");
        assert_eq!(result.segments.len(), 1);
        assert_eq!((result.segments[0].start, result.segments[0].end), (1, 114));
        assert_eq!(result.segments[0].kind, SegmentKind::Range);
        assert_eq!(result.segments[0].unit, None);
        assert_eq!(result.method, ParseMethod::Pattern);
        assert_eq!(result.confidence, 0.85);
    }

    #[test]
    fn test_tilde_range_with_unit_and_completion_tag() {
        let result = parse("Novel 1~170화.txt");
        assert_eq!(result.title, "novel");
        assert_eq!(result.segments[0].unit, Some(Unit::Chapter));
        assert_eq!(result.confidence, 0.9);

        let result = parse("Novel 0-59(완).txt");
        assert_eq!((result.segments[0].start, result.segments[0].end), (0, 59));
        assert!(result.is_complete());
    }

    #[test]
    fn test_longest_range_wins() {
        let result = parse("Novel 5-10 1-300 (2-4).txt");
        assert_eq!((result.segments[0].start, result.segments[0].end), (1, 300));
    }

    #[test]
    fn test_single_with_unit() {
        let result = parse("Novel 3권.txt");
        assert_eq!(result.title, "novel");
        assert_eq!(result.segments[0].kind, SegmentKind::Single);
        assert_eq!(result.segments[0].unit, Some(Unit::Volume));
        assert_eq!(result.confidence, 0.8);

        let result = parse("Novel Vol. 3.epub");
        assert_eq!(result.title, "novel");
        assert_eq!(result.segments[0].start, 3);
        assert_eq!(result.segments[0].unit, Some(Unit::Volume));

        let result = parse("Novel ch 12.txt");
        assert_eq!(result.segments[0].unit, Some(Unit::Chapter));
    }

    #[test]
    fn test_multi_segment() {
        let result = parse("Novel main 1-1213, side 1-71.txt");
        assert_eq!(result.title, "novel");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].label.as_deref(), Some("main"));
        assert_eq!((result.segments[1].start, result.segments[1].end), (1, 71));
        assert_eq!(result.confidence, 0.95);

        let result = parse("작품 본편 1-1213 외전 1-71.txt");
        assert_eq!(result.title, "작품");
        assert_eq!(result.segments[1].label.as_deref(), Some("외전"));
        assert!(result.segments.iter().all(|s| s.kind == SegmentKind::Multi));
    }

    #[test]
    fn test_heuristics() {
        let result = parse("Novel1-100.txt");
        assert_eq!(result.title, "novel");
        assert_eq!(result.method, ParseMethod::Heuristic);
        assert_eq!(result.confidence, 0.5);

        let result = parse("Novel 12 (완).txt");
        assert_eq!(result.title, "novel");
        assert_eq!(result.segments[0].start, 12);
        assert_eq!(result.confidence, 0.45);
        assert!(result.is_complete());
    }

    #[test]
    fn test_fallback() {
        let result = parse("Just A Title [HQ] @someone.txt");
        assert_eq!(result.title, "just a title");
        assert!(result.segments.is_empty());
        assert_eq!(result.method, ParseMethod::Fallback);
        assert_eq!(result.confidence, 0.2);
        assert!(result.has_tag(&Tag::Other("hq".to_string())));
        assert!(result.has_tag(&Tag::Source("someone".to_string())));
    }

    #[test]
    fn test_confidence_is_monotonic_in_specificity() {
        let ordered = [
            parse("Novel main 1-10, side 1-5.txt"),
            parse("Novel 1-10화.txt"),
            parse("Novel 1-10.txt"),
            parse("Novel 3권.txt"),
            parse("Novel1-10.txt"),
            parse("Novel 12.txt"),
            parse("Novel.txt"),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].confidence > pair[1].confidence, "{:?}", pair);
        }
    }

    proptest! {
        #[test]
        fn prop_parse_is_total(name in "\\PC{0,60}") {
            let result = parse(&name);
            prop_assert!((0.0..=1.0).contains(&result.confidence));
            for segment in &result.segments {
                prop_assert!(segment.start <= segment.end);
            }
        }

        #[test]
        fn prop_parse_handles_numeric_noise(
            title in "[a-zA-Z가-힣 _]{0,20}",
            a in 0u32..5000,
            b in 0u32..5000,
            sep in "[-~ ]",
        ) {
            let name = format!("{} {}{}{}.txt", title, a, sep, b);
            let result = parse(&name);
            prop_assert!(result.confidence > 0.0);
        }
    }
}
