use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tag {
    Complete,
    Epilogue,
    SideStory,
    Revised,
    /// `@uploader` style attribution.
    Source(String),
    /// Anything else found in brackets, lower-cased.
    Other(String),
}

impl Tag {
    /// Extra weight a tag adds to the quality score used for tie-breaks.
    pub fn quality_bonus(&self) -> u64 {
        match self {
            Tag::Epilogue => 4,
            Tag::SideStory => 2,
            Tag::Revised => 1,
            _ => 0,
        }
    }
}

/// Evidence text: keywords in their wire spelling, sources as `@name`,
/// anything else verbatim.
impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Complete => f.write_str("COMPLETE"),
            Tag::Epilogue => f.write_str("EPILOGUE"),
            Tag::SideStory => f.write_str("SIDE_STORY"),
            Tag::Revised => f.write_str("REVISED"),
            Tag::Source(name) => write!(f, "@{}", name),
            Tag::Other(text) => f.write_str(text),
        }
    }
}

const BARE_KEYWORDS: &str =
    r"완결|완전판|완본|완|完結|完|에필로그|에필|후기|개정판|complete|completed|epilogue|afterword|revised";

lazy_static::lazy_static! {
    static ref BRACKET_GROUP: Regex =
        Regex::new(r"\(([^)]*)\)|\[([^\]]*)\]|\{([^}]*)\}|【([^】]*)】").unwrap();
    static ref SOURCE_TOKEN: Regex = Regex::new(r"@([^\s()\[\]{}]+)").unwrap();
    static ref BARE_KEYWORD: Regex =
        Regex::new(&format!(r"(?i)\b(?:{})\b", BARE_KEYWORDS)).unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Map one tag token to its normalized form. Empty tokens yield nothing.
pub fn classify(token: &str) -> Option<Tag> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Some(source) = token.strip_prefix('@') {
        let source = source.trim();
        return (!source.is_empty()).then(|| Tag::Source(source.to_lowercase()));
    }
    let lower = token.to_lowercase();
    let tag = match lower.as_str() {
        "완" | "완결" | "完" | "完結" | "완전판" | "완본" | "complete" | "completed"
        | "finished" | "end" | "fin" => Tag::Complete,
        "후기" | "에필" | "에필로그" | "epilogue" | "afterword" => Tag::Epilogue,
        "외전" | "side" | "side story" | "sidestory" | "extra" | "extras" | "番外" => {
            Tag::SideStory
        }
        "개정" | "개정판" | "수정" | "수정본" | "revised" | "rev" | "fixed" => Tag::Revised,
        _ => Tag::Other(lower),
    };
    Some(tag)
}

/// Collect tags from the text left over once title and numbers are removed:
/// bracket groups (split on commas), `@source` tokens and bare keywords.
pub fn extract_tags(text: &str) -> BTreeSet<Tag> {
    let mut tags = BTreeSet::new();

    for caps in BRACKET_GROUP.captures_iter(text) {
        let inner = (1..=4)
            .find_map(|idx| caps.get(idx))
            .map(|m| m.as_str())
            .unwrap_or("");
        for token in inner.split([',', '、', '/']) {
            tags.extend(classify(token));
        }
    }

    let outside = BRACKET_GROUP.replace_all(text, " ");
    for caps in SOURCE_TOKEN.captures_iter(&outside) {
        if let Some(name) = caps.get(1) {
            tags.insert(Tag::Source(name.as_str().to_lowercase()));
        }
    }
    let outside = SOURCE_TOKEN.replace_all(&outside, " ");
    for m in BARE_KEYWORD.find_iter(&outside) {
        tags.extend(classify(m.as_str()));
    }

    tags
}

/// Title normalization: underscores become spaces, bracket groups, `@tokens`
/// and bare completion/epilogue keywords go, trailing separators are trimmed,
/// whitespace is collapsed and the result lower-cased.
pub fn normalize_title(raw: &str) -> String {
    let text = raw.replace('_', " ");
    let text = BRACKET_GROUP.replace_all(&text, " ");
    let text = SOURCE_TOKEN.replace_all(&text, " ");
    let text = BARE_KEYWORD.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim_start()
        .trim_end_matches(|c: char| c.is_whitespace() || "-~.,:;_|+&".contains(c))
        .to_lowercase()
}

/// A title with nothing alphanumeric in it cannot anchor a block.
pub fn is_degenerate(title: &str) -> bool {
    !title.chars().any(char::is_alphanumeric)
}
