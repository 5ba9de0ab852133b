use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{emit, load_settings};
use crate::access::AccessResolver;
use crate::config::RuntimePaths;
use crate::introspect::SchemaIntrospector;
use crate::models::{ObjectType, QueryEnvelope};
use crate::prompt::build_prompt;
use crate::sqlite::{AppStore, ConnectionPools};

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    #[arg(long, value_name = "ID")]
    pub identity: Option<String>,

    #[arg(
        long,
        value_name = "REQUEST",
        help = "Also render the prompt this identity would send for REQUEST."
    )]
    pub prompt_for: Option<String>,
}

pub fn run(args: &SchemaArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let settings = load_settings(runtime_paths)?;
    let store = Arc::new(AppStore::open(&settings.app_store)?);
    let pools = Arc::new(ConnectionPools::from_settings(&settings));
    let resolver = AccessResolver::new(store.clone(), &settings);
    let introspector = SchemaIntrospector::new(pools, store, settings.include_views);

    let identity = args.identity.as_deref();
    let scope = resolver.resolve(identity);
    let descriptor = introspector.introspect(&scope, Instant::now() + settings.request_timeout());

    let mut envelope = QueryEnvelope::ok(
        "schema",
        json!({
            "scope": scope,
            "objects": descriptor.objects.values().collect::<Vec<_>>(),
        }),
    )
    .with_meta("tables", json!(descriptor.count_of(ObjectType::Table)))
    .with_meta("views", json!(descriptor.count_of(ObjectType::View)))
    .with_meta("degraded", json!(descriptor.degraded));

    if let Some(request) = args.prompt_for.as_deref() {
        let language = resolver.response_language(identity);
        envelope = envelope.with_meta("prompt", json!(build_prompt(request, &descriptor, &language)));
    }

    emit(&envelope)
}
