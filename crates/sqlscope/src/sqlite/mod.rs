pub mod app_store;
pub mod catalog;
pub mod grants;
pub mod pool;

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, params};

use crate::utils::time::now_utc;

pub use app_store::AppStore;
pub use grants::RoleGrants;
pub use pool::{ConnectionPool, ConnectionPools, PoolError, PooledConnection};

pub const APP_STORE_SCHEMA_VERSION: &str = "sqlscope.app.v1";
pub const SCOPE_MAPPINGS_TABLE: &str = "scope_mappings";
pub const OBJECT_DESCRIPTIONS_TABLE: &str = "object_descriptions";
pub const IDENTITY_SETTINGS_TABLE: &str = "identity_settings";
pub const QUERY_OUTCOMES_TABLE: &str = "query_outcomes";
pub const SCHEMA_META_TABLE: &str = "sqlscope_schema_meta";
pub const ROLE_GRANTS_TABLE: &str = "sqlscope_role_grants";

pub const ALL_OBJECTS: &str = "*";

const CREATE_SCOPE_MAPPINGS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scope_mappings (
    identity TEXT NOT NULL,
    role_name TEXT NOT NULL,
    database_name TEXT NOT NULL,
    schema_name TEXT NOT NULL DEFAULT 'main',
    created_at_utc TEXT NOT NULL
);
"#;

const CREATE_INDEX_SCOPE_MAPPINGS_IDENTITY_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_scope_mappings_identity
ON scope_mappings (identity, created_at_utc);
"#;

const CREATE_OBJECT_DESCRIPTIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS object_descriptions (
    database_name TEXT NOT NULL,
    schema_name TEXT NOT NULL DEFAULT 'main',
    object_name TEXT NOT NULL,
    object_type TEXT NOT NULL DEFAULT 'table',
    description_json TEXT NOT NULL DEFAULT '{}',
    updated_at_utc TEXT NOT NULL,
    UNIQUE (database_name, schema_name, object_name),
    CHECK (object_type IN ('table', 'view'))
);
"#;

const CREATE_IDENTITY_SETTINGS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identity_settings (
    identity TEXT NOT NULL PRIMARY KEY,
    preferred_language TEXT NOT NULL DEFAULT 'en',
    updated_at_utc TEXT NOT NULL
);
"#;

const CREATE_QUERY_OUTCOMES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_outcomes (
    identity TEXT NOT NULL,
    request_text TEXT NOT NULL,
    candidate_sql TEXT,
    row_count INTEGER NOT NULL DEFAULT 0,
    elapsed_seconds REAL NOT NULL DEFAULT 0.0,
    success INTEGER NOT NULL,
    error_message TEXT,
    recorded_at_utc TEXT NOT NULL,
    CHECK (success IN (0, 1))
);
"#;

const CREATE_INDEX_QUERY_OUTCOMES_IDENTITY_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_query_outcomes_identity_time
ON query_outcomes (identity, recorded_at_utc);
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sqlscope_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

const CREATE_ROLE_GRANTS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sqlscope_role_grants (
    role_name TEXT NOT NULL,
    schema_name TEXT NOT NULL DEFAULT 'main',
    object_name TEXT NOT NULL,
    UNIQUE (role_name, schema_name, object_name)
);
"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_SCOPE_MAPPINGS_TABLE_SQL,
        CREATE_INDEX_SCOPE_MAPPINGS_IDENTITY_SQL,
        CREATE_OBJECT_DESCRIPTIONS_TABLE_SQL,
        CREATE_IDENTITY_SETTINGS_TABLE_SQL,
        CREATE_QUERY_OUTCOMES_TABLE_SQL,
        CREATE_INDEX_QUERY_OUTCOMES_IDENTITY_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

#[must_use]
pub fn create_grant_catalog_sql() -> &'static str {
    CREATE_ROLE_GRANTS_TABLE_SQL
}

pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

pub fn open_read_only_connection(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags).with_context(|| {
        format!(
            "failed to open sqlite database read-only: {}",
            path.display()
        )
    })
}

pub fn ensure_app_store_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create app store schema")?;

    if schema_meta_has_version(connection, APP_STORE_SCHEMA_VERSION)? {
        return Ok(());
    }

    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![APP_STORE_SCHEMA_VERSION, now_utc()],
        )
        .context("failed to write app store schema meta row")?;

    Ok(())
}

pub fn ensure_grant_catalog(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(CREATE_ROLE_GRANTS_TABLE_SQL)
        .context("failed to create role grant catalog")
}

fn schema_meta_has_version(connection: &Connection, schema_version: &str) -> Result<bool> {
    let query = format!(
        "SELECT EXISTS(SELECT 1 FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1 LIMIT 1)"
    );
    let exists = connection
        .query_row(&query, [schema_version], |row| row.get::<usize, i64>(0))
        .context("failed to query app store schema version metadata")?;
    Ok(exists != 0)
}

#[must_use]
pub fn is_internal_object(object_name: &str) -> bool {
    let lowered = object_name.to_ascii_lowercase();
    lowered.starts_with("sqlite_") || lowered.starts_with("sqlscope_")
}

#[must_use]
pub fn sqlite_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[must_use]
pub fn sqlite_double_quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::{
        APP_STORE_SCHEMA_VERSION, SCHEMA_META_TABLE, create_schema_sql, ensure_app_store_schema,
        is_internal_object, sqlite_double_quoted, sqlite_single_quoted,
    };
    use rusqlite::Connection;

    #[test]
    fn app_store_schema_is_idempotent() {
        let connection = Connection::open_in_memory().expect("in-memory db should open");
        ensure_app_store_schema(&connection).expect("first apply should succeed");
        ensure_app_store_schema(&connection).expect("second apply should succeed");

        let versions: i64 = connection
            .query_row(
                &format!("SELECT COUNT(*) FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1"),
                [APP_STORE_SCHEMA_VERSION],
                |row| row.get(0),
            )
            .expect("meta row count should load");
        assert_eq!(versions, 1);
    }

    #[test]
    fn ddl_covers_every_external_table() {
        let ddl = create_schema_sql();
        for table in [
            "scope_mappings",
            "object_descriptions",
            "identity_settings",
            "query_outcomes",
            "sqlscope_schema_meta",
        ] {
            assert!(
                ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table: {table}"
            );
        }
    }

    #[test]
    fn internal_objects_are_recognised() {
        assert!(is_internal_object("sqlite_sequence"));
        assert!(is_internal_object("SQLSCOPE_ROLE_GRANTS"));
        assert!(!is_internal_object("orders"));
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(sqlite_single_quoted("o'brien"), "'o''brien'");
        assert_eq!(sqlite_double_quoted("we\"ird"), "\"we\"\"ird\"");
    }
}
