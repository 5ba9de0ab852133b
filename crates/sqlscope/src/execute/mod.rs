use std::sync::Arc;
use std::time::Instant;

use rusqlite::ErrorCode;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::extract::CandidateQuery;
use crate::models::ScopeMapping;
use crate::sqlite::{ConnectionPools, PoolError, RoleGrants};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub elapsed_seconds: f64,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("query could not be compiled: {0}")]
    Syntax(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("no pooled connection available: {0}")]
    PoolTimeout(String),
}

impl ExecutionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::Timeout(_) => "timeout",
            Self::Syntax(_) => "syntax_error",
            Self::Store(_) => "store_error",
            Self::PoolTimeout(_) => "pool_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Fetch,
}

fn classify(error: &rusqlite::Error, phase: Phase) -> ExecutionError {
    let message = error.to_string();
    match error.sqlite_error_code() {
        Some(
            ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly,
        ) => ExecutionError::PermissionDenied(message),
        Some(ErrorCode::OperationInterrupted) => ExecutionError::Timeout(message),
        _ if phase == Phase::Prepare => ExecutionError::Syntax(message),
        _ => ExecutionError::Store(message),
    }
}

pub struct QueryExecutor {
    pools: Arc<ConnectionPools>,
    max_rows: Option<usize>,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(pools: Arc<ConnectionPools>, max_rows: Option<usize>) -> Self {
        Self { pools, max_rows }
    }

    pub fn execute(
        &self,
        candidate: &CandidateQuery,
        scope: &ScopeMapping,
        deadline: Instant,
    ) -> Result<ExecutionResult, ExecutionError> {
        let pool = self.pools.get(&scope.database_name).ok_or_else(|| {
            ExecutionError::Store(format!(
                "database `{}` is not configured",
                scope.database_name
            ))
        })?;

        let mut connection = pool.acquire(deadline).map_err(|error| match error {
            PoolError::Exhausted { .. } => ExecutionError::PoolTimeout(error.to_string()),
            PoolError::Open { .. } => ExecutionError::Store(error.to_string()),
        })?;
        let grants = RoleGrants::load(&connection, &scope.role_name)
            .map_err(|error| ExecutionError::Store(format!("{error:#}")))?;
        if Instant::now() >= deadline {
            return Err(ExecutionError::Timeout(
                "request deadline passed before execution".to_string(),
            ));
        }
        connection.assume_role(grants, Some(deadline));

        let started = Instant::now();
        let mut statement = connection
            .prepare(candidate.as_str())
            .map_err(|error| classify(&error, Phase::Prepare))?;
        let columns = statement
            .column_names()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        let mut rows = statement
            .query([])
            .map_err(|error| classify(&error, Phase::Fetch))?;
        let mut materialized = Vec::new();
        let mut truncated = false;
        while let Some(row) = rows.next().map_err(|error| classify(&error, Phase::Fetch))? {
            if self.max_rows.is_some_and(|cap| materialized.len() >= cap) {
                truncated = true;
                break;
            }

            let mut record = Map::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row
                    .get::<usize, SqlValue>(index)
                    .map_err(|error| classify(&error, Phase::Fetch))?;
                record.insert(column.clone(), json_value_from_sql(value));
            }
            materialized.push(record);
        }
        let elapsed_seconds = started.elapsed().as_secs_f64();

        debug!(
            role = %scope.role_name,
            rows = materialized.len(),
            elapsed_seconds,
            truncated,
            "query executed"
        );
        Ok(ExecutionResult {
            columns,
            row_count: materialized.len(),
            rows: materialized,
            elapsed_seconds,
            truncated,
        })
    }
}

#[must_use]
pub fn json_value_from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => json!(value),
        SqlValue::Real(value) => json!(value),
        SqlValue::Text(value) => json!(value),
        SqlValue::Blob(value) => json!(encode_blob_hex(&value)),
    }
}

fn encode_blob_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}
