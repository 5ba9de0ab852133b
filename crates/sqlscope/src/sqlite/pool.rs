use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use r2d2::{HandleError, ManageConnection, Pool};
use rusqlite::Connection;
use rusqlite::hooks::{AuthContext, Authorization};
use thiserror::Error;
use tracing::warn;

use super::grants::RoleGrants;
use super::{open_read_only_connection, sqlite_double_quoted};
use crate::config::{DatabaseSettings, Settings};

// Virtual machine instructions between deadline checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no connection to `{database}` became available within {waited_ms} ms")]
    Exhausted { database: String, waited_ms: u128 },

    #[error("failed to open connection to `{database}`: {message}")]
    Open { database: String, message: String },
}

#[derive(Debug, Error)]
#[error("{0}")]
struct ConnectError(String);

#[derive(Debug)]
struct ReadOnlyManager {
    path: PathBuf,
    attachments: Vec<(String, PathBuf)>,
}

impl ManageConnection for ReadOnlyManager {
    type Connection = Connection;
    type Error = ConnectError;

    fn connect(&self) -> Result<Connection, ConnectError> {
        let connection = open_read_only_connection(&self.path)
            .map_err(|error| ConnectError(format!("{error:#}")))?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|error| ConnectError(format!("failed to set busy timeout: {error}")))?;
        for (alias, path) in &self.attachments {
            attach(&connection, alias, path).map_err(ConnectError)?;
        }
        Ok(connection)
    }

    fn is_valid(&self, connection: &mut Connection) -> Result<(), ConnectError> {
        connection
            .execute_batch("")
            .map_err(|error| ConnectError(error.to_string()))
    }

    // A handle left inside a transaction cannot be trusted by the next borrower.
    fn has_broken(&self, connection: &mut Connection) -> bool {
        !connection.is_autocommit()
    }
}

#[derive(Debug, Clone)]
struct ConnectFailures {
    database: String,
    last: Arc<Mutex<Option<(Instant, String)>>>,
}

impl ConnectFailures {
    fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    fn since(&self, started: Instant) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|(failed_at, _)| *failed_at >= started)
            .map(|(_, message)| message.clone())
    }
}

impl HandleError<ConnectError> for ConnectFailures {
    fn handle_error(&self, error: ConnectError) {
        warn!(database = %self.database, error = %error, "pooled connection failed to open");
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), error.0));
    }
}

#[derive(Debug)]
pub struct ConnectionPool {
    database_name: String,
    pool: Pool<ReadOnlyManager>,
    failures: ConnectFailures,
    checkouts: AtomicUsize,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(database_name: impl Into<String>, settings: &DatabaseSettings) -> Self {
        let database_name = database_name.into();
        let failures = ConnectFailures::new(&database_name);
        let manager = ReadOnlyManager {
            path: settings.path.clone(),
            attachments: settings
                .attach
                .iter()
                .map(|(alias, path)| (alias.clone(), path.clone()))
                .collect(),
        };
        let max_size = u32::try_from(settings.pool_size.max(1)).unwrap_or(u32::MAX);
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .error_handler(Box::new(failures.clone()))
            .build_unchecked(manager);

        Self {
            database_name,
            pool,
            failures,
            checkouts: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.pool.state().idle_connections as usize
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.pool.state().connections as usize
    }

    #[must_use]
    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::Relaxed)
    }

    pub fn acquire(&self, deadline: Instant) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(connection) = self.pool.get_timeout(remaining.min(ACQUIRE_SLICE)) {
                self.checkouts.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection {
                    connection,
                    active_role: None,
                });
            }

            if let Some(message) = self.failures.since(started) {
                return Err(PoolError::Open {
                    database: self.database_name.clone(),
                    message,
                });
            }
            if Instant::now() >= deadline {
                return Err(PoolError::Exhausted {
                    database: self.database_name.clone(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionPools {
    pools: BTreeMap<String, ConnectionPool>,
}

impl ConnectionPools {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pools: settings
                .databases
                .iter()
                .map(|(name, database)| (name.clone(), ConnectionPool::new(name.clone(), database)))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, database_name: &str) -> Option<&ConnectionPool> {
        self.pools.get(database_name)
    }
}

fn attach(connection: &Connection, alias: &str, path: &Path) -> Result<(), String> {
    let statement = format!("ATTACH DATABASE ?1 AS {}", sqlite_double_quoted(alias));
    connection
        .execute(&statement, [path.to_string_lossy().as_ref()])
        .map(|_| ())
        .map_err(|error| {
            format!(
                "failed to attach `{}` as schema `{alias}`: {error}",
                path.display()
            )
        })
}

/// A borrowed connection. Dropping it removes the role and deadline hooks
/// before the connection goes back to the pool, on every exit path.
pub struct PooledConnection {
    connection: r2d2::PooledConnection<ReadOnlyManager>,
    active_role: Option<String>,
}

impl PooledConnection {
    pub fn assume_role(&mut self, grants: RoleGrants, deadline: Option<Instant>) {
        self.active_role = Some(grants.role_name().to_string());
        self.connection.authorizer(Some(move |context: AuthContext<'_>| {
            grants.authorize(context)
        }));
        if let Some(deadline) = deadline {
            self.connection.progress_handler(
                PROGRESS_CHECK_INTERVAL,
                Some(move || Instant::now() >= deadline),
            );
        }
    }

    pub fn reset_role(&mut self) {
        self.connection
            .authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
        self.connection.progress_handler(0, None::<fn() -> bool>);
        self.active_role = None;
    }

    #[must_use]
    pub fn active_role(&self) -> Option<&str> {
        self.active_role.as_deref()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.reset_role();
    }
}
