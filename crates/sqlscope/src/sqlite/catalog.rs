use std::time::Instant;

use anyhow::{Context, Result};
use rusqlite::Connection;

use super::grants::RoleGrants;
use super::pool::ConnectionPools;
use super::{is_internal_object, sqlite_double_quoted, sqlite_single_quoted};
use crate::introspect::{Catalog, CatalogColumn, CatalogObject};
use crate::models::{ObjectType, ScopeMapping};

impl Catalog for ConnectionPools {
    fn granted_objects(
        &self,
        scope: &ScopeMapping,
        include_views: bool,
        deadline: Instant,
    ) -> Result<Vec<CatalogObject>> {
        let pool = self
            .get(&scope.database_name)
            .with_context(|| format!("database `{}` is not configured", scope.database_name))?;
        let connection = pool.acquire(deadline)?;
        read_granted_objects(&connection, scope, include_views)
    }
}

pub fn read_granted_objects(
    connection: &Connection,
    scope: &ScopeMapping,
    include_views: bool,
) -> Result<Vec<CatalogObject>> {
    let grants = RoleGrants::load(connection, &scope.role_name)?;
    let kinds = if include_views {
        "('table', 'view')"
    } else {
        "('table')"
    };
    let schema = sqlite_double_quoted(&scope.schema_name);

    let mut statement = connection
        .prepare(&format!(
            "SELECT name, type
             FROM {schema}.sqlite_schema
             WHERE type IN {kinds}
             ORDER BY name ASC"
        ))
        .with_context(|| {
            format!(
                "failed to prepare catalog listing for schema `{}`",
                scope.schema_name
            )
        })?;
    let object_rows = statement
        .query_map([], |row| {
            Ok((row.get::<usize, String>(0)?, row.get::<usize, String>(1)?))
        })
        .context("failed to execute catalog listing")?;

    let mut objects = Vec::new();
    for row in object_rows {
        let (name, kind) = row.context("failed to decode catalog row")?;
        if is_internal_object(&name) || !grants.allows(&scope.schema_name, &name) {
            continue;
        }
        let Some(object_type) = ObjectType::from_catalog(&kind) else {
            continue;
        };
        let columns = read_columns(connection, &schema, &name)?;
        objects.push(CatalogObject {
            object_name: name,
            object_type,
            columns,
        });
    }

    Ok(objects)
}

fn read_columns(
    connection: &Connection,
    quoted_schema: &str,
    object_name: &str,
) -> Result<Vec<CatalogColumn>> {
    let pragma_sql = format!(
        "PRAGMA {quoted_schema}.table_info({})",
        sqlite_single_quoted(object_name)
    );
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_context(|| format!("failed to prepare column listing for `{object_name}`"))?;

    let column_rows = statement
        .query_map([], |row| {
            Ok(CatalogColumn {
                name: row.get::<usize, String>(1)?,
                datatype: row.get::<usize, Option<String>>(2)?.unwrap_or_default(),
                nullable: row.get::<usize, i64>(3)? == 0,
            })
        })
        .with_context(|| format!("failed to execute column listing for `{object_name}`"))?;

    column_rows
        .map(|row| row.context("failed to decode column row"))
        .collect()
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::read_granted_objects;
    use crate::models::{ObjectType, ScopeMapping};
    use crate::sqlite::ensure_grant_catalog;

    fn fixture() -> Connection {
        let connection = Connection::open_in_memory().expect("in-memory db should open");
        ensure_grant_catalog(&connection).expect("grant catalog should apply");
        connection
            .execute_batch(
                "CREATE TABLE orders (id INTEGER NOT NULL, total REAL);
                 CREATE TABLE salaries (person TEXT, amount REAL);
                 CREATE VIEW order_totals AS SELECT id, total FROM orders;
                 INSERT INTO sqlscope_role_grants VALUES ('reader', 'main', 'orders');
                 INSERT INTO sqlscope_role_grants VALUES ('reader', 'main', 'order_totals');
                 INSERT INTO sqlscope_role_grants VALUES ('admin', 'main', '*');",
            )
            .expect("fixture should apply");
        connection
    }

    #[test]
    fn lists_only_granted_objects() {
        let connection = fixture();
        let scope = ScopeMapping::mapped("ana", "reader", "sales", "main");

        let objects = read_granted_objects(&connection, &scope, true).expect("catalog should load");
        let names = objects
            .iter()
            .map(|object| object.object_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["order_totals", "orders"]);
        assert_eq!(objects[0].object_type, ObjectType::View);

        let orders = &objects[1];
        assert_eq!(orders.columns[0].datatype, "INTEGER");
        assert!(!orders.columns[0].nullable);
        assert!(orders.columns[1].nullable);
    }

    #[test]
    fn views_can_be_excluded() {
        let connection = fixture();
        let scope = ScopeMapping::mapped("ana", "reader", "sales", "main");

        let objects = read_granted_objects(&connection, &scope, false).expect("catalog should load");
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn wildcard_grant_skips_internal_tables() {
        let connection = fixture();
        let scope = ScopeMapping::mapped("root", "admin", "sales", "main");

        let objects = read_granted_objects(&connection, &scope, true).expect("catalog should load");
        assert!(objects.iter().all(|object| !object.object_name.starts_with("sqlscope_")));
        assert_eq!(objects.len(), 3);
    }

    #[test]
    fn role_without_grants_sees_nothing() {
        let connection = fixture();
        let scope = ScopeMapping::mapped("eve", "nobody", "sales", "main");

        let objects = read_granted_objects(&connection, &scope, true).expect("catalog should load");
        assert!(objects.is_empty());
    }
}
