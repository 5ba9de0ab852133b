use anyhow::{Error, Result};
use clap::Args;
use serde_json::json;

use super::emit;
use crate::extract::{CandidateQuery, ExtractionError, extract_with_strategy};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure, QueryTrace};
use crate::validate::{DEFAULT_MAX_QUERY_CHARS, QueryValidator};

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    #[arg(value_name = "QUERY")]
    pub query: String,

    #[arg(
        long,
        default_value_t = false,
        help = "Treat the input as a raw generation response and extract the query first."
    )]
    pub extract: bool,

    #[arg(long, default_value_t = DEFAULT_MAX_QUERY_CHARS)]
    pub max_query_chars: usize,
}

pub fn run(args: &ValidateArgs) -> Result<()> {
    let (candidate, strategy) = if args.extract {
        match extract_with_strategy(&args.query) {
            Ok((strategy, candidate)) => (candidate, Some(strategy)),
            Err(error @ ExtractionError::NoQuery) => {
                let envelope = QueryEnvelope::error("validate", "no_query", error.to_string());
                return Err(Error::new(QueryEnvelopeCommandFailure::rejected(envelope)));
            }
        }
    } else {
        (CandidateQuery::new(args.query.trim()), None)
    };

    let verdict = QueryValidator::new(args.max_query_chars).validate(&candidate);
    let accepted = verdict.accepted;
    let message = verdict.message();
    let trace = QueryTrace::new(candidate)
        .extracted_by(strategy)
        .with_verdict(verdict);
    if !accepted {
        let envelope =
            QueryEnvelope::error("validate", "query_rejected", message).with_query(trace);
        return Err(Error::new(QueryEnvelopeCommandFailure::rejected(envelope)));
    }

    emit(&QueryEnvelope::ok("validate", json!({ "accepted": true })).with_query(trace))
}
