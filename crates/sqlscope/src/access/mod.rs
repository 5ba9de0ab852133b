use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::config::{DefaultScope, Settings};
use crate::models::{ScopeMapping, ScopeSource};

pub trait MappingStore: Send + Sync {
    fn mappings_for(&self, identity: &str) -> Result<Vec<ScopeMapping>>;

    fn preferred_language(&self, identity: &str) -> Result<Option<String>>;
}

pub struct AccessResolver {
    store: Arc<dyn MappingStore>,
    default_scope: DefaultScope,
    default_language: String,
    schemas_by_database: BTreeMap<String, BTreeSet<String>>,
}

impl AccessResolver {
    #[must_use]
    pub fn new(store: Arc<dyn MappingStore>, settings: &Settings) -> Self {
        let schemas_by_database = settings
            .databases
            .iter()
            .map(|(name, database)| {
                let schemas = std::iter::once("main".to_string())
                    .chain(database.attach.keys().cloned())
                    .collect::<BTreeSet<_>>();
                (name.clone(), schemas)
            })
            .collect();

        Self {
            store,
            default_scope: settings.default_scope.clone(),
            default_language: settings.default_language.clone(),
            schemas_by_database,
        }
    }

    pub fn resolve(&self, identity: Option<&str>) -> ScopeMapping {
        let Some(identity) = identity.map(str::trim).filter(|id| !id.is_empty()) else {
            return self.default_for("");
        };

        let mappings = match self.store.mappings_for(identity) {
            Ok(mappings) => mappings,
            Err(error) => {
                warn!(identity, error = %format!("{error:#}"), "mapping store unreadable; using default scope");
                return self.default_for(identity);
            }
        };

        let Some(first) = mappings.first() else {
            return self.default_for(identity);
        };
        if mappings.len() > 1 {
            warn!(
                identity,
                mappings = mappings.len(),
                role = %first.role_name,
                "identity has several scope mappings; using the oldest"
            );
        }

        if !self.is_known_scope(first) {
            warn!(
                identity,
                database = %first.database_name,
                schema = %first.schema_name,
                "mapped scope is not configured; using default scope"
            );
            return self.default_for(identity);
        }

        first.clone()
    }

    pub fn response_language(&self, identity: Option<&str>) -> String {
        let Some(identity) = identity.map(str::trim).filter(|id| !id.is_empty()) else {
            return self.default_language.clone();
        };

        match self.store.preferred_language(identity) {
            Ok(Some(language)) if !language.trim().is_empty() => language.trim().to_string(),
            Ok(_) => self.default_language.clone(),
            Err(error) => {
                warn!(identity, error = %format!("{error:#}"), "language preference unreadable");
                self.default_language.clone()
            }
        }
    }

    fn is_known_scope(&self, mapping: &ScopeMapping) -> bool {
        self.schemas_by_database
            .get(&mapping.database_name)
            .is_some_and(|schemas| schemas.contains(&mapping.schema_name))
    }

    fn default_for(&self, identity: &str) -> ScopeMapping {
        ScopeMapping {
            identity: identity.to_string(),
            role_name: self.default_scope.role_name.clone(),
            database_name: self.default_scope.database_name.clone(),
            schema_name: self.default_scope.schema_name.clone(),
            source: ScopeSource::Default,
        }
    }
}
