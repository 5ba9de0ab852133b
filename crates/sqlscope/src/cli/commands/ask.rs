use std::sync::Arc;

use anyhow::{Error, Result};
use clap::Args;
use serde_json::json;

use super::{emit, load_settings};
use crate::config::RuntimePaths;
use crate::generation::{FixedResponseBackend, GenerationBackend, OpenAiBackend};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure, QueryTrace, WarningCode};
use crate::pipeline::{Engine, PipelineError};

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[arg(value_name = "REQUEST")]
    pub request: String,

    #[arg(long, value_name = "ID")]
    pub identity: Option<String>,

    #[arg(
        long,
        value_name = "LANG",
        help = "Response language; defaults to the identity's stored preference."
    )]
    pub language: Option<String>,

    #[arg(
        long,
        value_name = "TEXT",
        help = "Use this text as the generation response instead of calling the backend."
    )]
    pub response: Option<String>,
}

pub fn run(args: &AskArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let settings = load_settings(runtime_paths)?;
    let backend: Arc<dyn GenerationBackend> = match &args.response {
        Some(text) => Arc::new(FixedResponseBackend::new(text.clone())),
        None => Arc::new(OpenAiBackend::new(&settings.generation, settings.api_key())?),
    };
    let engine = Engine::open(&settings, backend)?;

    let answer = engine
        .ask(
            args.identity.as_deref(),
            &args.request,
            args.language.as_deref(),
        )
        .map_err(failure)?;

    let mut envelope = QueryEnvelope::ok(
        "ask",
        json!({
            "columns": answer.result.columns,
            "rows": answer.result.rows,
        }),
    )
    .with_scope(answer.scope.clone())
    .with_query(QueryTrace::new(answer.candidate.clone()).extracted_by(Some(answer.extraction)))
    .with_meta("language", json!(answer.language))
    .with_meta("row_count", json!(answer.result.row_count))
    .with_meta("truncated", json!(answer.result.truncated))
    .with_meta("query_seconds", json!(answer.result.elapsed_seconds))
    .with_meta("elapsed_seconds", json!(answer.elapsed_seconds));

    if answer.scope.is_default() {
        envelope = envelope.with_warning(WarningCode::DefaultScope);
    }
    if answer.degraded_schema {
        envelope = envelope.with_warning(WarningCode::SchemaDegraded);
    }

    emit(&envelope)
}

fn failure(error: PipelineError) -> Error {
    let mut envelope = QueryEnvelope::error("ask", error.code(), error.to_string());
    if let PipelineError::Rejected { candidate, verdict } = &error {
        let trace = QueryTrace::new(candidate.clone()).with_verdict(verdict.clone());
        envelope = envelope.with_query(trace);
    }
    if error.is_rejection() {
        Error::new(QueryEnvelopeCommandFailure::rejected(envelope))
    } else {
        Error::new(QueryEnvelopeCommandFailure::new(envelope))
    }
}
