use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::extract::CandidateQuery;

pub const DEFAULT_MAX_QUERY_CHARS: usize = 10_000;

/// Rejected when present as a whole word, in any case, anywhere in the
/// normalized text (string literals included).
pub const BLACKLISTED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "REPLACE", "TRUNCATE", "DROP", "CREATE",
    "ALTER", "RENAME", "GRANT", "REVOKE", "EXEC", "EXECUTE", "CALL", "DO", "DECLARE", "PREPARE",
    "DEALLOCATE", "COPY", "VACUUM", "ANALYZE", "REINDEX", "ATTACH", "DETACH", "PRAGMA", "BEGIN",
    "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "LOCK", "SET", "RESET", "LISTEN", "NOTIFY",
    "CURSOR", "PROCEDURE", "FUNCTION", "TRIGGER", "INDEX", "DATABASE", "SCHEMA", "TABLE",
    "SEQUENCE", "CONSTRAINT", "ROLE", "USER", "INTO",
];

/// Rejected when present as a case-insensitive substring, word boundary or
/// not. `dblink_audit` is rejected while `droplet` passes the keyword gate.
pub const DANGEROUS_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "sleep(",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "pg_reload_conf",
    "dblink",
    "copy_to",
    "load_extension",
    "readfile",
    "writefile",
    "fts3_tokenizer",
    "xp_cmdshell",
    "sp_executesql",
    "benchmark(",
    "waitfor",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    NonEmpty,
    SingleStatement,
    RetrievalOnly,
    KeywordBlacklist,
    DangerousFunction,
    LengthBound,
}

impl Gate {
    pub const ORDERED: [Self; 6] = [
        Self::NonEmpty,
        Self::SingleStatement,
        Self::RetrievalOnly,
        Self::KeywordBlacklist,
        Self::DangerousFunction,
        Self::LengthBound,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonEmpty => "non_empty",
            Self::SingleStatement => "single_statement",
            Self::RetrievalOnly => "retrieval_only",
            Self::KeywordBlacklist => "keyword_blacklist",
            Self::DangerousFunction => "dangerous_function",
            Self::LengthBound => "length_bound",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::NonEmpty => "query is empty",
            Self::SingleStatement => "exactly one statement is allowed",
            Self::RetrievalOnly => "only SELECT statements are allowed",
            Self::KeywordBlacklist => "query contains a forbidden keyword",
            Self::DangerousFunction => "query calls a forbidden function",
            Self::LengthBound => "query is too long",
        }
    }
}

impl Display for Gate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub accepted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Gate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationVerdict {
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn rejected(gate: Gate, detail: Option<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(gate),
            detail,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match (self.reason, self.detail.as_deref()) {
            (None, _) => "query accepted".to_string(),
            (Some(gate), Some(detail)) => format!("{}: {detail}", gate.message()),
            (Some(gate), None) => gate.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryValidator {
    max_query_chars: usize,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUERY_CHARS)
    }
}

impl QueryValidator {
    #[must_use]
    pub fn new(max_query_chars: usize) -> Self {
        Self { max_query_chars }
    }

    #[must_use]
    pub fn validate(&self, candidate: &CandidateQuery) -> ValidationVerdict {
        let normalized = normalize(candidate.as_str());

        for gate in Gate::ORDERED {
            let rejection = match gate {
                Gate::NonEmpty => normalized.is_empty().then_some(None),
                Gate::SingleStatement => {
                    let statements = statement_count(&normalized);
                    (statements > 1).then(|| Some(format!("{statements} statements")))
                }
                Gate::RetrievalOnly => (!starts_with_select(&normalized))
                    .then(|| Some(leading_word(&normalized).to_string())),
                Gate::KeywordBlacklist => {
                    first_blacklisted_keyword(&normalized).map(|keyword| Some(keyword.to_string()))
                }
                Gate::DangerousFunction => {
                    first_dangerous_function(&normalized).map(|function| Some(function.to_string()))
                }
                Gate::LengthBound => {
                    let length = normalized.chars().count();
                    (length > self.max_query_chars)
                        .then(|| Some(format!("{length} > {} characters", self.max_query_chars)))
                }
            };

            if let Some(detail) = rejection {
                return ValidationVerdict::rejected(gate, detail);
            }
        }

        ValidationVerdict::accepted()
    }
}

#[must_use]
pub fn normalize(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            stripped.push(ch);
            if ch == open {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                stripped.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                stripped.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for skipped in chars.by_ref() {
                    if previous == '*' && skipped == '/' {
                        break;
                    }
                    previous = skipped;
                }
                stripped.push(' ');
            }
            _ => stripped.push(ch),
        }
    }

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn statement_count(normalized: &str) -> usize {
    normalized
        .split(';')
        .filter(|segment| !segment.trim().is_empty())
        .count()
}

fn words(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .filter(|token| !token.is_empty())
}

fn leading_word(normalized: &str) -> &str {
    words(normalized).next().unwrap_or("")
}

fn starts_with_select(normalized: &str) -> bool {
    normalized
        .split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case("select"))
}

fn first_blacklisted_keyword(normalized: &str) -> Option<&'static str> {
    words(normalized).find_map(|token| {
        BLACKLISTED_KEYWORDS
            .iter()
            .find(|keyword| token.eq_ignore_ascii_case(keyword))
            .copied()
    })
}

fn first_dangerous_function(normalized: &str) -> Option<&'static str> {
    let lowered = normalized.to_ascii_lowercase();
    DANGEROUS_FUNCTIONS
        .iter()
        .find(|function| lowered.contains(*function))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::{Gate, QueryValidator, ValidationVerdict, normalize};
    use crate::extract::CandidateQuery;

    fn verdict(sql: &str) -> ValidationVerdict {
        QueryValidator::default().validate(&CandidateQuery::new(sql))
    }

    fn gate(sql: &str) -> Option<Gate> {
        verdict(sql).reason
    }

    #[test]
    fn allows_select_with_optional_trailing_semicolon() {
        assert!(verdict("SELECT 1").accepted);
        assert!(verdict("select 1 ; ").accepted);
        assert!(verdict("SELECT datetime('now')").accepted);
    }

    #[test]
    fn normalization_strips_comments_but_not_quoted_text() {
        assert_eq!(
            normalize("SELECT 1 -- trailing\n/* block\ncomment */ FROM   t"),
            "SELECT 1 FROM t"
        );
        assert_eq!(normalize("SELECT '--not a comment'"), "SELECT '--not a comment'");
        assert_eq!(normalize("SELECT 1 /* unterminated"), "SELECT 1");
    }

    #[test]
    fn rejects_empty_and_comment_only_text() {
        assert_eq!(gate("   "), Some(Gate::NonEmpty));
        assert_eq!(gate("-- just a note"), Some(Gate::NonEmpty));
    }

    #[test]
    fn multiple_statements_are_rejected_even_when_each_is_fine() {
        assert_eq!(
            gate("SELECT * FROM users; SELECT * FROM orders;"),
            Some(Gate::SingleStatement)
        );
        assert_eq!(gate("SELECT 1;;"), None);
    }

    #[test]
    fn only_select_is_retrieval() {
        assert_eq!(gate("DROP TABLE users;"), Some(Gate::RetrievalOnly));
        assert_eq!(gate("WITH x AS (SELECT 1) SELECT * FROM x"), Some(Gate::RetrievalOnly));
        assert_eq!(gate("selectivity"), Some(Gate::RetrievalOnly));
        let rejected = verdict("EXPLAIN SELECT 1");
        assert_eq!(rejected.detail.as_deref(), Some("EXPLAIN"));
    }

    #[test]
    fn blacklisted_keywords_match_whole_words_in_any_case() {
        for sql in [
            "SELECT * FROM t WHERE x = 1 UNION SELECT * FROM t INTO outfile",
            "select 1 where 'a' = 'drop'",
            "SELECT name FROM users WHERE note = 'please Delete me'",
            "SELECT pragma FROM t",
        ] {
            assert_eq!(gate(sql), Some(Gate::KeywordBlacklist), "sql: {sql}");
        }

        let rejected = verdict("SELECT 1 FROM t WHERE UpDaTe = 1");
        assert_eq!(rejected.detail.as_deref(), Some("UPDATE"));
    }

    #[test]
    fn keyword_gate_ignores_embedded_words() {
        assert!(verdict("SELECT droplet, updated_at, created FROM t").accepted);
    }

    #[test]
    fn dangerous_functions_match_as_substrings() {
        assert_eq!(gate("SELECT pg_sleep(10)"), Some(Gate::DangerousFunction));
        assert_eq!(gate("SELECT SLEEP(5)"), Some(Gate::DangerousFunction));
        assert_eq!(
            gate("SELECT readfile('/etc/passwd')"),
            Some(Gate::DangerousFunction)
        );
    }

    #[test]
    fn substring_matching_differs_from_keyword_matching() {
        // `droplet` passes the whole-word keyword gate while `dblink_audit`
        // fails the substring function gate.
        assert!(verdict("SELECT droplet FROM t").accepted);
        assert_eq!(
            gate("SELECT * FROM dblink_audit"),
            Some(Gate::DangerousFunction)
        );
    }

    #[test]
    fn length_is_measured_after_normalization() {
        let validator = QueryValidator::new(20);
        let padded = format!("SELECT 1 {} FROM t", " ".repeat(100));
        assert!(validator.validate(&CandidateQuery::new(padded)).accepted);

        let long = CandidateQuery::new("SELECT aaaaaaaaaaaaaaaaaaaa FROM t");
        let rejected = validator.validate(&long);
        assert_eq!(rejected.reason, Some(Gate::LengthBound));
        assert!(rejected.message().contains("too long"));
    }

    #[test]
    fn gates_run_in_order() {
        // Also blacklisted and too long, but the statement gate runs first.
        let validator = QueryValidator::new(5);
        let verdict = validator.validate(&CandidateQuery::new("DELETE FROM t; DROP TABLE t"));
        assert_eq!(verdict.reason, Some(Gate::SingleStatement));
    }
}
