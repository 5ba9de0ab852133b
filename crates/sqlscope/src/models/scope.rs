use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSource {
    Mapped,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeMapping {
    pub identity: String,
    pub role_name: String,
    pub database_name: String,
    pub schema_name: String,
    pub source: ScopeSource,
}

impl ScopeMapping {
    #[must_use]
    pub fn mapped(
        identity: impl Into<String>,
        role_name: impl Into<String>,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            role_name: role_name.into(),
            database_name: database_name.into(),
            schema_name: schema_name.into(),
            source: ScopeSource::Mapped,
        }
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.source == ScopeSource::Default
    }
}
