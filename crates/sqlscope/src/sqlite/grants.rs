use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};

use super::{ALL_OBJECTS, ROLE_GRANTS_TABLE, is_internal_object};

const DENIED_FUNCTIONS: &[&str] = &[
    "load_extension",
    "fts3_tokenizer",
    "readfile",
    "writefile",
    "edit",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemaGrant {
    All,
    Objects(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrants {
    role_name: String,
    schemas: BTreeMap<String, SchemaGrant>,
}

impl RoleGrants {
    #[must_use]
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            schemas: BTreeMap::new(),
        }
    }

    pub fn load(connection: &Connection, role_name: &str) -> Result<Self> {
        let mut statement = connection
            .prepare(&format!(
                "SELECT schema_name, object_name
                 FROM main.{ROLE_GRANTS_TABLE}
                 WHERE role_name = ?1
                 ORDER BY schema_name, object_name"
            ))
            .context("failed to prepare role grant lookup")?;
        let rows = statement
            .query_map([role_name], |row| {
                Ok((row.get::<usize, String>(0)?, row.get::<usize, String>(1)?))
            })
            .with_context(|| format!("failed to read grants for role `{role_name}`"))?;

        let mut grants = Self::new(role_name);
        for row in rows {
            let (schema_name, object_name) = row.context("failed to decode role grant row")?;
            grants.grant(&schema_name, &object_name);
        }
        Ok(grants)
    }

    pub fn grant(&mut self, schema_name: &str, object_name: &str) {
        let schema_key = schema_name.trim().to_ascii_lowercase();
        let object_key = object_name.trim().to_ascii_lowercase();
        if object_key == ALL_OBJECTS {
            self.schemas.insert(schema_key, SchemaGrant::All);
            return;
        }

        match self
            .schemas
            .entry(schema_key)
            .or_insert_with(|| SchemaGrant::Objects(BTreeSet::new()))
        {
            SchemaGrant::All => {}
            SchemaGrant::Objects(objects) => {
                objects.insert(object_key);
            }
        }
    }

    #[must_use]
    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    #[must_use]
    pub fn allows(&self, schema_name: &str, object_name: &str) -> bool {
        if is_internal_object(object_name) {
            return false;
        }
        match self.schemas.get(&schema_name.to_ascii_lowercase()) {
            Some(SchemaGrant::All) => true,
            Some(SchemaGrant::Objects(objects)) => {
                objects.contains(&object_name.to_ascii_lowercase())
            }
            None => false,
        }
    }

    /// Authorizer decision for one access attempt while this role is active.
    /// Only reads of granted objects, plain SELECT machinery and harmless
    /// functions are allowed; every other action is denied.
    #[must_use]
    pub fn authorize(&self, context: AuthContext<'_>) -> Authorization {
        match context.action {
            AuthAction::Select | AuthAction::Recursive => Authorization::Allow,
            AuthAction::Function { function_name } => {
                if DENIED_FUNCTIONS
                    .iter()
                    .any(|denied| function_name.eq_ignore_ascii_case(denied))
                {
                    Authorization::Deny
                } else {
                    Authorization::Allow
                }
            }
            AuthAction::Read { table_name, .. } => {
                let schema_name = context.database_name.unwrap_or("main");
                // Reads made on behalf of a granted view are covered by the view grant.
                let via_granted_view = context
                    .accessor
                    .is_some_and(|view| self.allows(schema_name, view));
                if self.allows(schema_name, table_name) || via_granted_view {
                    Authorization::Allow
                } else {
                    Authorization::Deny
                }
            }
            _ => Authorization::Deny,
        }
    }
}
