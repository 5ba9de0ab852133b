use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Value, json};

use super::ScopeMapping;
use crate::extract::{CandidateQuery, ExtractionStrategy};
use crate::utils::time::now_utc;
use crate::validate::ValidationVerdict;

pub const QUERY_ENVELOPE_SCHEMA_VERSION: &str = "sqlscope.envelope.v2";

pub type QueryEnvelopeMeta = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    DefaultScope,
    SchemaDegraded,
}

impl WarningCode {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::DefaultScope => {
                "identity has no usable scope mapping; the default scope was used"
            }
            Self::SchemaDegraded => {
                "live catalog was unreadable; the prompt used stored descriptions only"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEnvelopeWarning {
    pub code: WarningCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEnvelopeError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTrace {
    pub candidate: CandidateQuery,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionStrategy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
}

impl QueryTrace {
    #[must_use]
    pub fn new(candidate: CandidateQuery) -> Self {
        Self {
            candidate,
            extraction: None,
            verdict: None,
        }
    }

    #[must_use]
    pub fn extracted_by(mut self, strategy: Option<ExtractionStrategy>) -> Self {
        self.extraction = strategy;
        self
    }

    #[must_use]
    pub fn with_verdict(mut self, verdict: ValidationVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEnvelope {
    pub ok: bool,
    pub command: String,
    pub generated_at_utc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeMapping>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryTrace>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub meta: QueryEnvelopeMeta,
    pub warnings: Vec<QueryEnvelopeWarning>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryEnvelopeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Rejected,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct QueryEnvelopeCommandFailure {
    envelope: QueryEnvelope,
    class: FailureClass,
}

impl QueryEnvelopeCommandFailure {
    #[must_use]
    pub fn new(envelope: QueryEnvelope) -> Self {
        Self {
            envelope,
            class: FailureClass::Runtime,
        }
    }

    #[must_use]
    pub fn rejected(envelope: QueryEnvelope) -> Self {
        Self {
            envelope,
            class: FailureClass::Rejected,
        }
    }

    #[must_use]
    pub fn envelope(&self) -> &QueryEnvelope {
        &self.envelope
    }

    #[must_use]
    pub fn class(&self) -> FailureClass {
        self.class
    }
}

impl Display for QueryEnvelopeCommandFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.envelope) {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => f.write_str("query envelope serialization failure"),
        }
    }
}

impl std::error::Error for QueryEnvelopeCommandFailure {}

impl QueryEnvelope {
    #[must_use]
    pub fn ok(command: impl Into<String>, data: Value) -> Self {
        Self::base(command, true).with_data(data)
    }

    #[must_use]
    pub fn error(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::base(command, false);
        envelope.error = Some(QueryEnvelopeError {
            code: code.into(),
            message: message.into(),
        });
        envelope
    }

    fn base(command: impl Into<String>, ok: bool) -> Self {
        let mut meta = QueryEnvelopeMeta::new();
        meta.insert(
            "schema_version".to_string(),
            json!(QUERY_ENVELOPE_SCHEMA_VERSION),
        );

        Self {
            ok,
            command: command.into(),
            generated_at_utc: now_utc(),
            scope: None,
            query: None,
            data: None,
            meta,
            warnings: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: ScopeMapping) -> Self {
        self.scope = Some(scope);
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: QueryTrace) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_warning(mut self, code: WarningCode) -> Self {
        if self.warnings.iter().all(|warning| warning.code != code) {
            self.warnings.push(QueryEnvelopeWarning {
                code,
                message: code.message().to_string(),
            });
        }
        self
    }

    pub fn to_json_line(&self) -> anyhow::Result<String> {
        serde_json::to_string(self)
            .map_err(|error| anyhow::anyhow!("failed to encode envelope: {error}"))
    }
}
