use std::fmt::{self, Display, Formatter};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

const QUERY_FENCE_TAGS: &[&str] = &["sql", "sqlite", "postgresql", "postgres"];
const RETRIEVAL_KEYWORD: &str = "select";
const CONTINUATION_KEYWORDS: &[&str] = &[
    "from", "where", "group", "having", "order", "limit", "join", "inner", "left", "right",
    "full", "cross", "on", "and", "or", "union", "offset",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CandidateQuery(String);

impl CandidateQuery {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for CandidateQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("no usable query produced")]
    NoQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    FencedBlock,
    UntaggedFence,
    LineScan,
}

impl ExtractionStrategy {
    pub const ORDERED: [Self; 3] = [Self::FencedBlock, Self::UntaggedFence, Self::LineScan];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FencedBlock => "fenced_block",
            Self::UntaggedFence => "untagged_fence",
            Self::LineScan => "line_scan",
        }
    }

    #[must_use]
    pub fn apply(self, raw: &str) -> Option<CandidateQuery> {
        let candidate = |text: &str| CandidateQuery::new(text.trim());
        match self {
            Self::FencedBlock => fenced_blocks(raw)
                .find_map(|(tag, body)| {
                    let tagged = QUERY_FENCE_TAGS
                        .iter()
                        .any(|known| tag.eq_ignore_ascii_case(known));
                    (tagged && !body.is_empty()).then_some(body)
                })
                .map(candidate),
            Self::UntaggedFence => fenced_blocks(raw)
                .find_map(|(tag, body)| {
                    (tag.is_empty() && starts_with_word(body, RETRIEVAL_KEYWORD)).then_some(body)
                })
                .map(candidate),
            Self::LineScan => scan_lines(raw).as_deref().map(candidate),
        }
    }
}

pub fn extract(raw: &str) -> Result<CandidateQuery, ExtractionError> {
    extract_with_strategy(raw).map(|(_, candidate)| candidate)
}

pub fn extract_with_strategy(
    raw: &str,
) -> Result<(ExtractionStrategy, CandidateQuery), ExtractionError> {
    ExtractionStrategy::ORDERED
        .into_iter()
        .find_map(|strategy| strategy.apply(raw).map(|candidate| (strategy, candidate)))
        .ok_or(ExtractionError::NoQuery)
}

#[must_use]
pub fn fence(candidate: &CandidateQuery) -> String {
    format!("```sql\n{}\n```", candidate.as_str())
}

fn fence_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+\-]*)[^\n]*\n(.*?)```")
            .expect("fence regex should compile")
    })
}

fn fenced_blocks(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    fence_regex().captures_iter(raw).filter_map(|captures| {
        let tag = captures.get(1)?.as_str();
        let body = captures.get(2)?.as_str().trim();
        Some((tag, body))
    })
}

fn starts_with_word(text: &str, word: &str) -> bool {
    let Some(head) = text.get(..word.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(word)
        && !text[word.len()..]
            .chars()
            .next()
            .is_some_and(|next| next.is_ascii_alphanumeric() || next == '_')
}

fn is_continuation(line: &str) -> bool {
    CONTINUATION_KEYWORDS
        .iter()
        .any(|keyword| starts_with_word(line, keyword))
}

fn scan_lines(raw: &str) -> Option<String> {
    let mut lines = raw.lines().map(str::trim);
    let first = lines.find(|line| starts_with_word(line, RETRIEVAL_KEYWORD))?;

    let mut statement = vec![first];
    if first.ends_with(';') {
        return Some(statement.join("\n"));
    }

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let open_list = statement
            .last()
            .is_some_and(|previous| previous.ends_with(',') || previous.ends_with('('));
        if !(open_list || is_continuation(line)) {
            break;
        }
        statement.push(line);
        if line.ends_with(';') {
            break;
        }
    }

    Some(statement.join("\n"))
}
