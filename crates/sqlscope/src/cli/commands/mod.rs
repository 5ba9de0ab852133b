pub mod ask;
pub mod description_schema;
pub mod history;
pub mod init;
pub mod schema;
pub mod validate;

use anyhow::Result;

use crate::config::{RuntimePaths, Settings};
use crate::models::QueryEnvelope;

pub(crate) fn load_settings(runtime_paths: &RuntimePaths) -> Result<Settings> {
    Settings::load(runtime_paths)
}

pub(crate) fn emit(envelope: &QueryEnvelope) -> Result<()> {
    println!("{}", envelope.to_json_line()?);
    Ok(())
}
