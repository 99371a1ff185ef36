use std::cmp::Ordering;

use super::policy::{decide, Criterion, IdFallback};
use super::Entry;
use crate::config::DetectorConfig;
use crate::model::{CandidateEdge, Evidence, EvidenceKind, Relation};
use crate::parser::{is_degenerate, Segment, Tag, Unit};
use crate::pipeline::DetectionRequest;

/// The closed set of comparison strategies, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Containment { start_tolerance: u32 },
    Version { start_tolerance: u32 },
}

impl Strategy {
    pub fn relation(&self) -> Relation {
        match self {
            Strategy::Containment { .. } => Relation::Containment,
            Strategy::Version { .. } => Relation::Version,
        }
    }

    pub fn compare(&self, a: &Entry<'_>, b: &Entry<'_>) -> Option<CandidateEdge> {
        match *self {
            Strategy::Containment { start_tolerance } => compare_containment(a, b, start_tolerance),
            Strategy::Version { start_tolerance } => compare_version(a, b, start_tolerance),
        }
    }
}

/// Runs the exact check and then the enabled strategies over one pair.
#[derive(Debug, Clone)]
pub struct RelationDetector {
    enable_exact: bool,
    strategies: Vec<Strategy>,
    min_confidence: f64,
}

impl RelationDetector {
    pub fn new(config: &DetectorConfig, request: &DetectionRequest) -> Self {
        let start_tolerance = config.containment_start_tolerance;
        let mut strategies = Vec::with_capacity(2);
        if request.enable_containment {
            strategies.push(Strategy::Containment { start_tolerance });
        }
        if request.enable_version {
            strategies.push(Strategy::Version { start_tolerance });
        }
        Self {
            enable_exact: request.enable_exact,
            strategies,
            min_confidence: config.min_edge_confidence,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// At most one edge per pair: an exact match wins outright, otherwise the
    /// first strategy that produces a confident enough edge.
    pub fn compare(&self, a: &Entry<'_>, b: &Entry<'_>) -> Option<CandidateEdge> {
        if self.enable_exact {
            if let Some(edge) = exact_match(a, b) {
                return Some(edge);
            }
        }
        self.strategies
            .iter()
            .find_map(|strategy| strategy.compare(a, b))
            .filter(|edge| edge.confidence() >= self.min_confidence)
    }
}

fn exact_match(a: &Entry<'_>, b: &Entry<'_>) -> Option<CandidateEdge> {
    if a.id() == b.id() || a.record.size != b.record.size {
        return None;
    }
    let mut evidence = Vec::with_capacity(2);
    if let (Some(fa), Some(fb)) = (a.record.fast_fingerprint, b.record.fast_fingerprint) {
        if fa != fb {
            return None;
        }
        evidence.push(
            Evidence::new(EvidenceKind::FastFingerprint)
                .with("fingerprint", format!("{:016x}", fa)),
        );
    }
    let (ha, hb) = (a.record.strong_hash.as_deref()?, b.record.strong_hash.as_deref()?);
    if ha != hb {
        return None;
    }
    evidence.insert(
        0,
        Evidence::new(EvidenceKind::ExactHash)
            .with("hash", ha)
            .with("size", a.record.size),
    );
    Some(CandidateEdge::new(a.id(), b.id(), Relation::Exact, 1.0, evidence))
}

/// Shared, non-degenerate title.
fn shared_title<'e>(a: &Entry<'e>, b: &Entry<'e>) -> Option<&'e str> {
    let title = a.parse.title.as_str();
    (title == b.parse.title && !title.is_empty() && !is_degenerate(title)).then_some(title)
}

fn single_segment<'e>(entry: &Entry<'e>) -> Option<&'e Segment> {
    match entry.parse.segments.as_slice() {
        [segment] => Some(segment),
        _ => None,
    }
}

fn comparable(x: &Segment, y: &Segment) -> bool {
    x.unit == y.unit && x.label == y.label
}

/// `Greater` when `a` is the container, `Less` when `b` is.
fn containment_direction(a: &Segment, b: &Segment, start_tolerance: u32) -> Option<Ordering> {
    if !comparable(a, b) || a.same_range(b) {
        return None;
    }
    let direction = if a.contains(b) {
        Ordering::Greater
    } else if b.contains(a) {
        Ordering::Less
    } else {
        return None;
    };
    (a.start.abs_diff(b.start) <= start_tolerance).then_some(direction)
}

fn qualifies_as_containment(a: &Entry<'_>, b: &Entry<'_>, start_tolerance: u32) -> bool {
    match (single_segment(a), single_segment(b)) {
        (Some(sa), Some(sb)) => containment_direction(sa, sb, start_tolerance).is_some(),
        _ => false,
    }
}

fn unit_name(unit: Option<Unit>) -> &'static str {
    match unit {
        Some(Unit::Chapter) => "CHAPTER",
        Some(Unit::Volume) => "VOLUME",
        Some(Unit::Part) => "PART",
        None => "NONE",
    }
}

fn tag_list<'t>(tags: impl Iterator<Item = &'t Tag>) -> String {
    tags.map(Tag::to_string).collect::<Vec<_>>().join(",")
}

fn tag_delta(a: &Entry<'_>, b: &Entry<'_>) -> Option<Evidence> {
    if a.parse.tags == b.parse.tags {
        return None;
    }
    Some(
        Evidence::new(EvidenceKind::TagDelta)
            .with("a_only", tag_list(a.parse.tags.difference(&b.parse.tags)))
            .with("b_only", tag_list(b.parse.tags.difference(&a.parse.tags)))
            .with("a_complete", a.parse.is_complete())
            .with("b_complete", b.parse.is_complete()),
    )
}

fn compare_containment(
    a: &Entry<'_>,
    b: &Entry<'_>,
    start_tolerance: u32,
) -> Option<CandidateEdge> {
    let title = shared_title(a, b)?;
    let (sa, sb) = (single_segment(a)?, single_segment(b)?);
    let direction = containment_direction(sa, sb, start_tolerance)?;

    let (container, contained, outer, inner) = match direction {
        Ordering::Greater => (a, b, sa, sb),
        _ => (b, a, sb, sa),
    };
    let title_similarity = 1.0;
    let coverage = inner.len() as f64 / outer.len() as f64;
    let mut confidence = 0.75 * title_similarity + 0.25 * coverage;
    if outer.start != inner.start {
        confidence -= 0.05;
    }

    let mut evidence = vec![
        Evidence::new(EvidenceKind::TitleMatch)
            .with("title", title)
            .with("similarity", title_similarity),
        Evidence::new(EvidenceKind::RangeOverlap)
            .with("container_start", outer.start)
            .with("container_end", outer.end)
            .with("contained_start", inner.start)
            .with("contained_end", inner.end)
            .with("unit", unit_name(outer.unit))
            .with("coverage", coverage),
    ];
    evidence.extend(tag_delta(container, contained));

    Some(CandidateEdge::new(
        container.id(),
        contained.id(),
        Relation::Containment,
        confidence,
        evidence,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeRelation {
    Absent,
    Equal,
    Overlap,
    Superset,
}

impl RangeRelation {
    fn as_str(self) -> &'static str {
        match self {
            RangeRelation::Absent => "ABSENT",
            RangeRelation::Equal => "EQUAL",
            RangeRelation::Overlap => "OVERLAP",
            RangeRelation::Superset => "SUPERSET",
        }
    }
}

/// Every segment of `small` sits inside a comparable segment of `big`.
fn covers(big: &[Segment], small: &[Segment]) -> bool {
    small
        .iter()
        .all(|s| big.iter().any(|b| comparable(b, s) && b.contains(s)))
}

fn range_relation(a: &[Segment], b: &[Segment]) -> Option<RangeRelation> {
    match (a, b) {
        ([], _) | (_, []) => Some(RangeRelation::Absent),
        ([x], [y]) => {
            if !comparable(x, y) {
                None
            } else if x.same_range(y) {
                Some(RangeRelation::Equal)
            } else if x.overlaps(y) {
                Some(RangeRelation::Overlap)
            } else {
                None
            }
        }
        _ => {
            if a == b {
                Some(RangeRelation::Equal)
            } else if covers(a, b) || covers(b, a) {
                Some(RangeRelation::Superset)
            } else {
                None
            }
        }
    }
}

fn compare_version(a: &Entry<'_>, b: &Entry<'_>, start_tolerance: u32) -> Option<CandidateEdge> {
    let title = shared_title(a, b)?;
    if qualifies_as_containment(a, b, start_tolerance) {
        return None;
    }
    let ranges = range_relation(&a.parse.segments, &b.parse.segments)?;

    let tags_differ = a.parse.tags != b.parse.tags;
    let ranges_differ = a.parse.segments != b.parse.segments;
    if !(tags_differ
        || ranges_differ
        || a.record.mtime != b.record.mtime
        || a.record.size != b.record.size)
    {
        return None;
    }

    let decision = decide(a, b, IdFallback::HigherIsNewer);
    let (newer, older) = if decision.prefers_a() { (a, b) } else { (b, a) };

    let mut confidence = decision.criterion.version_confidence();
    let size_delta = newer.record.size - older.record.size;
    let mut size_evidence = Evidence::new(EvidenceKind::SizeDelta)
        .with("bytes", size_delta)
        .with("decided_by", decision.criterion.as_str());
    if matches!(decision.criterion, Criterion::Completion | Criterion::Quality) && size_delta < 0 {
        confidence -= 0.1;
        size_evidence = size_evidence.with("warning", "newer side is smaller");
    }

    let mut evidence = vec![Evidence::new(EvidenceKind::TitleMatch)
        .with("title", title)
        .with("similarity", 1.0)];
    evidence.push(Evidence::new(EvidenceKind::RangeOverlap).with("relation", ranges.as_str()));
    evidence.extend(tag_delta(newer, older));
    evidence.push(Evidence::new(EvidenceKind::MtimeDelta).with(
        "seconds",
        (newer.record.mtime - older.record.mtime).num_seconds(),
    ));
    evidence.push(size_evidence);

    Some(CandidateEdge::new(
        newer.id(),
        older.id(),
        Relation::Version,
        confidence,
        evidence,
    ))
}
