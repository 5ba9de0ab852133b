#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use sqlscope::config::{DatabaseSettings, DefaultScope, Settings};
use sqlscope::models::{ObjectType, ScopeMapping};
use sqlscope::sqlite::{AppStore, ConnectionPools, ensure_grant_catalog};
use tempfile::TempDir;

pub const DATABASE: &str = "sales";
pub const DEFAULT_ROLE: &str = "reader";

/// Role grants seeded into the data database:
/// - `reader` (default scope): `main.orders`
/// - `analyst`: `main.orders`, `main.customers`, `main.order_totals`
/// - `admin`: everything in `main`
/// - `archivist`: everything in the attached `archive` schema
const SEED_DATA_SQL: &str = r#"
CREATE TABLE customers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    region TEXT
);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL,
    total REAL NOT NULL,
    placed_at TEXT
);
CREATE TABLE salaries (
    employee TEXT NOT NULL,
    amount INTEGER NOT NULL
);
CREATE VIEW order_totals AS
    SELECT customer_id, sum(total) AS total FROM orders GROUP BY customer_id;

INSERT INTO customers VALUES (1, 'Ana', 'north'), (2, 'Bruno', 'south');
INSERT INTO orders VALUES
    (1, 1, 10.5, '2026-01-02'),
    (2, 1, 4.5, '2026-01-03'),
    (3, 2, 20.0, '2026-01-04');
INSERT INTO salaries VALUES ('Ana', 5000), ('Bruno', 6200);

INSERT INTO sqlscope_role_grants VALUES ('reader', 'main', 'orders');
INSERT INTO sqlscope_role_grants VALUES ('analyst', 'main', 'orders');
INSERT INTO sqlscope_role_grants VALUES ('analyst', 'main', 'customers');
INSERT INTO sqlscope_role_grants VALUES ('analyst', 'main', 'order_totals');
INSERT INTO sqlscope_role_grants VALUES ('admin', 'main', '*');
INSERT INTO sqlscope_role_grants VALUES ('archivist', 'archive', '*');
"#;

const SEED_ARCHIVE_SQL: &str = r#"
CREATE TABLE orders_2020 (id INTEGER PRIMARY KEY, total REAL);
INSERT INTO orders_2020 VALUES (1, 99.0);
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub settings: Settings,
    pub store: Arc<AppStore>,
    pub pools: Arc<ConnectionPools>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_pool_size(2)
    }

    pub fn with_pool_size(pool_size: usize) -> Self {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let data_path = dir.path().join("sales.sqlite");
        let archive_path = dir.path().join("archive.sqlite");
        seed(&data_path, true, SEED_DATA_SQL);
        seed(&archive_path, false, SEED_ARCHIVE_SQL);

        let mut databases = BTreeMap::new();
        databases.insert(
            DATABASE.to_string(),
            DatabaseSettings {
                path: data_path,
                attach: BTreeMap::from([("archive".to_string(), archive_path)]),
                pool_size,
            },
        );
        let settings = Settings {
            app_store: dir.path().join("app.sqlite"),
            databases,
            default_scope: DefaultScope {
                role_name: DEFAULT_ROLE.to_string(),
                database_name: DATABASE.to_string(),
                schema_name: "main".to_string(),
            },
            ..Settings::default()
        };
        settings.validate().expect("fixture settings should be valid");

        let store = Arc::new(
            AppStore::open_initialized(&settings.app_store).expect("app store should initialize"),
        );
        let pools = Arc::new(ConnectionPools::from_settings(&settings));

        Self {
            dir,
            settings,
            store,
            pools,
        }
    }

    pub fn map(&self, identity: &str, role_name: &str, schema_name: &str, created_at_utc: &str) {
        self.store
            .add_mapping(
                &ScopeMapping::mapped(identity, role_name, DATABASE, schema_name),
                created_at_utc,
            )
            .expect("mapping should insert");
    }

    pub fn describe(&self, object_name: &str, object_type: ObjectType, description_json: &str) {
        self.store
            .put_description(DATABASE, "main", object_name, object_type, description_json)
            .expect("description should store");
    }
}

fn seed(path: &Path, with_grant_catalog: bool, sql: &str) {
    let connection = Connection::open(path).expect("fixture db should open");
    if with_grant_catalog {
        ensure_grant_catalog(&connection).expect("grant catalog should apply");
    }
    connection.execute_batch(sql).expect("fixture data should apply");
}
