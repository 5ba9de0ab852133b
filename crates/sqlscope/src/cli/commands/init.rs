use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tracing::info;

use super::{emit, load_settings};
use crate::config::RuntimePaths;
use crate::models::QueryEnvelope;
use crate::sqlite::{
    APP_STORE_SCHEMA_VERSION, AppStore, ensure_grant_catalog, open_sqlite_connection,
};

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    #[arg(
        long,
        default_value_t = false,
        help = "Only create the application store; leave data databases untouched."
    )]
    pub skip_grant_catalog: bool,
}

pub fn run(args: &InitArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let settings = load_settings(runtime_paths)?;

    let store = AppStore::open_initialized(&settings.app_store)?;
    info!(app_store = %store.path().display(), "application store ready");

    let mut grant_catalogs = Vec::new();
    if !args.skip_grant_catalog {
        for (name, database) in &settings.databases {
            let connection = open_sqlite_connection(&database.path)?;
            ensure_grant_catalog(&connection)
                .with_context(|| format!("failed to prepare grant catalog for `{name}`"))?;
            info!(database = %name, path = %database.path.display(), "grant catalog ready");
            grant_catalogs.push(name.clone());
        }
    }

    emit(
        &QueryEnvelope::ok(
            "init",
            json!({
                "app_store": store.path().display().to_string(),
                "grant_catalogs": grant_catalogs,
            }),
        )
        .with_meta("schema_version_applied", json!(APP_STORE_SCHEMA_VERSION)),
    )
}
