use anyhow::Result;

use super::emit;
use crate::models::{QueryEnvelope, description_json_schema};

pub fn run() -> Result<()> {
    emit(&QueryEnvelope::ok(
        "description-schema",
        description_json_schema(),
    ))
}
