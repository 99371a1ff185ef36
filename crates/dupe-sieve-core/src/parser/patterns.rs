use regex::{Captures, Regex};

use super::Unit;

const LABELS: &str = r"본편|외전|에필로그|에필|후기|main|side|extra|epilogue";
const SUFFIX_UNITS: &str = r"화|회|장|권|부";
const PREFIX_UNITS: &str = r"chapters|chapter|ch|episode|ep|volume|vol|part|pt";

lazy_static::lazy_static! {
    /// `Novel 1-114`, `Novel 1~170화`, `Novel ch. 1-20`.
    pub static ref RANGE: Regex = Regex::new(&format!(
        r"(?i)(?:^|[\s_\-\[(])(?:({})\.?\s*)?(\d+)\s*[-~～]\s*(\d+)\s*({})?",
        PREFIX_UNITS, SUFFIX_UNITS
    ))
    .unwrap();

    /// `Novel 3권`, `Novel 12화`.
    pub static ref SINGLE_SUFFIX: Regex = Regex::new(&format!(
        r"(?:^|[\s_\-\[(])(\d+)\s*({})",
        SUFFIX_UNITS
    ))
    .unwrap();

    /// `Novel Vol. 3`, `Novel ch 12`.
    pub static ref SINGLE_PREFIX: Regex = Regex::new(&format!(
        r"(?i)(?:^|[\s_\-\[(])({})\.?\s*(\d+)\b",
        PREFIX_UNITS
    ))
    .unwrap();

    /// One labelled segment of `Novel main 1-1213, side 1-71`.
    pub static ref MULTI_SEGMENT: Regex = Regex::new(&format!(
        r"(?i)(?:^|[\s_,\-\[(])({})\s*[:.]?\s*(\d+)\s*[-~～]\s*(\d+)\s*({})?",
        LABELS, SUFFIX_UNITS
    ))
    .unwrap();

    /// A segment label ending the text in front of a range.
    pub static ref LABEL_TAIL: Regex = Regex::new(&format!(
        r"(?i)(?:^|[\s_,\-\[(])({})$",
        LABELS
    ))
    .unwrap();

    /// Any numeric range, even glued to the title (`Novel1-100`).
    pub static ref LOOSE_RANGE: Regex = Regex::new(r"(\d+)\s*[-~～]\s*(\d+)").unwrap();

    pub static ref TRAILING_NUMBER: Regex = Regex::new(r"(?:^|[\s_\-])(\d+)\s*$").unwrap();
}

pub fn unit_from_token(token: &str) -> Option<Unit> {
    match token.to_lowercase().as_str() {
        "화" | "회" | "장" | "ch" | "chapter" | "chapters" | "ep" | "episode" => Some(Unit::Chapter),
        "권" | "vol" | "volume" => Some(Unit::Volume),
        "부" | "part" | "pt" => Some(Unit::Part),
        _ => None,
    }
}

/// Parse capture group `idx` as a number. Overlong digit runs decline the match.
pub fn number(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}

/// True when the text right before a range ends in a segment label, in which
/// case the range belongs to a multi-segment name.
pub fn ends_with_label(prefix: &str) -> bool {
    let trimmed = prefix.trim_end_matches(|c: char| c.is_whitespace() || c == ',' || c == ':');
    LABEL_TAIL.is_match(trimmed)
}
