use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::{
    IDENTITY_SETTINGS_TABLE, OBJECT_DESCRIPTIONS_TABLE, QUERY_OUTCOMES_TABLE,
    SCOPE_MAPPINGS_TABLE, ensure_app_store_schema, open_sqlite_connection,
};
use crate::access::MappingStore;
use crate::introspect::{DescriptionStore, StoredDescription};
use crate::models::{DescriptionDocument, ObjectType, QueryOutcome, ScopeMapping};
use crate::record::OutcomeSink;
use crate::utils::time::now_utc;

#[derive(Debug)]
pub struct AppStore {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl AppStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = open_sqlite_connection(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            connection: Mutex::new(connection),
        })
    }

    pub fn open_initialized(path: &Path) -> Result<Self> {
        let store = Self::open(path)?;
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<()> {
        ensure_app_store_schema(&self.lock())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_mapping(&self, mapping: &ScopeMapping, created_at_utc: &str) -> Result<()> {
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO {SCOPE_MAPPINGS_TABLE}
                     (identity, role_name, database_name, schema_name, created_at_utc)
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![
                    mapping.identity,
                    mapping.role_name,
                    mapping.database_name,
                    mapping.schema_name,
                    created_at_utc,
                ],
            )
            .with_context(|| format!("failed to insert scope mapping for `{}`", mapping.identity))?;
        Ok(())
    }

    pub fn put_description(
        &self,
        database_name: &str,
        schema_name: &str,
        object_name: &str,
        object_type: ObjectType,
        description_json: &str,
    ) -> Result<()> {
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO {OBJECT_DESCRIPTIONS_TABLE}
                     (database_name, schema_name, object_name, object_type, description_json, updated_at_utc)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (database_name, schema_name, object_name) DO UPDATE SET
                       object_type = excluded.object_type,
                       description_json = excluded.description_json,
                       updated_at_utc = excluded.updated_at_utc"
                ),
                params![
                    database_name,
                    schema_name,
                    object_name,
                    object_type.as_str(),
                    description_json,
                    now_utc(),
                ],
            )
            .with_context(|| {
                format!("failed to store description for {database_name}.{schema_name}.{object_name}")
            })?;
        Ok(())
    }

    pub fn set_preferred_language(&self, identity: &str, language: &str) -> Result<()> {
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO {IDENTITY_SETTINGS_TABLE} (identity, preferred_language, updated_at_utc)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (identity) DO UPDATE SET
                       preferred_language = excluded.preferred_language,
                       updated_at_utc = excluded.updated_at_utc"
                ),
                params![identity, language, now_utc()],
            )
            .with_context(|| format!("failed to store language preference for `{identity}`"))?;
        Ok(())
    }

    pub fn recent_outcomes(&self, identity: &str, limit: usize) -> Result<Vec<QueryOutcome>> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(&format!(
                "SELECT identity, request_text, candidate_sql, row_count, elapsed_seconds,
                        success, error_message, recorded_at_utc
                 FROM {QUERY_OUTCOMES_TABLE}
                 WHERE identity = ?1
                 ORDER BY recorded_at_utc DESC, rowid DESC
                 LIMIT ?2"
            ))
            .context("failed to prepare outcome history query")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = statement
            .query_map(params![identity, limit], |row| {
                Ok(QueryOutcome {
                    identity: row.get(0)?,
                    request: row.get(1)?,
                    candidate: row.get(2)?,
                    row_count: usize::try_from(row.get::<usize, i64>(3)?).unwrap_or_default(),
                    elapsed_seconds: row.get(4)?,
                    success: row.get::<usize, i64>(5)? != 0,
                    error: row.get(6)?,
                    recorded_at_utc: row.get(7)?,
                })
            })
            .with_context(|| format!("failed to read outcome history for `{identity}`"))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode outcome history row")
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl MappingStore for AppStore {
    fn mappings_for(&self, identity: &str) -> Result<Vec<ScopeMapping>> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(&format!(
                "SELECT identity, role_name, database_name, schema_name
                 FROM {SCOPE_MAPPINGS_TABLE}
                 WHERE identity = ?1
                 ORDER BY created_at_utc ASC, rowid ASC"
            ))
            .context("failed to prepare scope mapping lookup")?;
        let rows = statement
            .query_map([identity], |row| {
                Ok(ScopeMapping::mapped(
                    row.get::<usize, String>(0)?,
                    row.get::<usize, String>(1)?,
                    row.get::<usize, String>(2)?,
                    row.get::<usize, String>(3)?,
                ))
            })
            .with_context(|| format!("failed to read scope mappings for `{identity}`"))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode scope mapping row")
    }

    fn preferred_language(&self, identity: &str) -> Result<Option<String>> {
        self.lock()
            .query_row(
                &format!(
                    "SELECT preferred_language FROM {IDENTITY_SETTINGS_TABLE} WHERE identity = ?1"
                ),
                [identity],
                |row| row.get::<usize, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read language preference for `{identity}`"))
    }
}

impl DescriptionStore for AppStore {
    fn descriptions_for(
        &self,
        database_name: &str,
        schema_name: &str,
    ) -> Result<Vec<StoredDescription>> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(&format!(
                "SELECT object_name, object_type, description_json
                 FROM {OBJECT_DESCRIPTIONS_TABLE}
                 WHERE database_name = ?1 AND schema_name = ?2
                 ORDER BY object_name"
            ))
            .context("failed to prepare description lookup")?;
        let rows = statement
            .query_map([database_name, schema_name], |row| {
                Ok((
                    row.get::<usize, String>(0)?,
                    row.get::<usize, String>(1)?,
                    row.get::<usize, String>(2)?,
                ))
            })
            .with_context(|| {
                format!("failed to read descriptions for {database_name}.{schema_name}")
            })?;

        let mut descriptions = Vec::new();
        for row in rows {
            let (object_name, object_type, description_json) =
                row.context("failed to decode description row")?;
            descriptions.push(StoredDescription {
                object_name,
                object_type: ObjectType::from_catalog(&object_type).unwrap_or(ObjectType::Table),
                document: DescriptionDocument::parse_lenient(&description_json),
            });
        }
        Ok(descriptions)
    }
}

impl OutcomeSink for AppStore {
    fn append(&self, outcome: &QueryOutcome) -> Result<()> {
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO {QUERY_OUTCOMES_TABLE}
                     (identity, request_text, candidate_sql, row_count, elapsed_seconds,
                      success, error_message, recorded_at_utc)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    outcome.identity,
                    outcome.request,
                    outcome.candidate,
                    i64::try_from(outcome.row_count).unwrap_or(i64::MAX),
                    outcome.elapsed_seconds,
                    i64::from(outcome.success),
                    outcome.error,
                    outcome.recorded_at_utc,
                ],
            )
            .context("failed to append query outcome")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::AppStore;
    use crate::access::MappingStore;
    use crate::introspect::DescriptionStore;
    use crate::models::{ObjectType, QueryOutcome, ScopeMapping};
    use crate::record::OutcomeSink;

    fn store() -> (tempfile::TempDir, AppStore) {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = AppStore::open_initialized(&dir.path().join("app.sqlite"))
            .expect("app store should initialize");
        (dir, store)
    }

    #[test]
    fn mappings_come_back_oldest_first() {
        let (_dir, store) = store();
        store
            .add_mapping(
                &ScopeMapping::mapped("ana", "auditor", "sales", "main"),
                "2026-02-01T00:00:00Z",
            )
            .expect("insert should succeed");
        store
            .add_mapping(
                &ScopeMapping::mapped("ana", "reader", "sales", "main"),
                "2026-01-01T00:00:00Z",
            )
            .expect("insert should succeed");

        let roles = store
            .mappings_for("ana")
            .expect("lookup should succeed")
            .into_iter()
            .map(|mapping| mapping.role_name)
            .collect::<Vec<_>>();
        assert_eq!(roles, vec!["reader", "auditor"]);
    }

    #[test]
    fn descriptions_upsert_and_parse() {
        let (_dir, store) = store();
        store
            .put_description("sales", "main", "orders", ObjectType::Table, "old text")
            .expect("insert should succeed");
        store
            .put_description(
                "sales",
                "main",
                "orders",
                ObjectType::Table,
                r#"{"description": "Customer orders"}"#,
            )
            .expect("upsert should succeed");

        let descriptions = store
            .descriptions_for("sales", "main")
            .expect("lookup should succeed");
        assert_eq!(descriptions.len(), 1);
        assert_eq!(
            descriptions[0].document.description.as_deref(),
            Some("Customer orders")
        );
    }

    #[test]
    fn outcomes_are_listed_newest_first() {
        let (_dir, store) = store();
        for (request, at) in [("first", "2026-03-01T00:00:00Z"), ("second", "2026-03-02T00:00:00Z")] {
            store
                .append(&QueryOutcome {
                    identity: "ana".to_string(),
                    request: request.to_string(),
                    candidate: None,
                    row_count: 0,
                    elapsed_seconds: 0.0,
                    success: false,
                    error: Some("no usable query produced".to_string()),
                    recorded_at_utc: at.to_string(),
                })
                .expect("append should succeed");
        }

        let history = store.recent_outcomes("ana", 10).expect("history should load");
        let requests = history.iter().map(|o| o.request.as_str()).collect::<Vec<_>>();
        assert_eq!(requests, vec!["second", "first"]);
        assert!(!history[0].success);
    }

    #[test]
    fn missing_language_preference_is_none() {
        let (_dir, store) = store();
        assert_eq!(store.preferred_language("ana").expect("lookup"), None);
        store.set_preferred_language("ana", "fr").expect("upsert");
        assert_eq!(
            store.preferred_language("ana").expect("lookup").as_deref(),
            Some("fr")
        );
    }
}
