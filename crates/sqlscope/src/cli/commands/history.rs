use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::{emit, load_settings};
use crate::config::RuntimePaths;
use crate::models::QueryEnvelope;
use crate::sqlite::AppStore;
use crate::utils::time::parse_timestamp_to_unix_ms;

#[derive(Debug, Clone, Args)]
pub struct HistoryArgs {
    #[arg(long, value_name = "ID")]
    pub identity: String,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    #[arg(
        long,
        value_name = "TIMESTAMP",
        help = "Only outcomes recorded at or after this RFC 3339 timestamp."
    )]
    pub since: Option<String>,
}

pub fn run(args: &HistoryArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let settings = load_settings(runtime_paths)?;
    let since_ms = args
        .since
        .as_deref()
        .map(parse_timestamp_to_unix_ms)
        .transpose()
        .context("invalid --since value")?;

    let store = AppStore::open(&settings.app_store)?;
    let outcomes = store
        .recent_outcomes(&args.identity, args.limit)?
        .into_iter()
        .filter(|outcome| {
            since_ms.is_none_or(|since| {
                parse_timestamp_to_unix_ms(&outcome.recorded_at_utc)
                    .is_ok_and(|recorded| recorded >= since)
            })
        })
        .collect::<Vec<_>>();

    emit(
        &QueryEnvelope::ok("history", json!({ "outcomes": outcomes }))
            .with_meta("identity", json!(args.identity))
            .with_meta("count", json!(outcomes.len()))
            .with_meta("limit", json!(args.limit)),
    )
}
