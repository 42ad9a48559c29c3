//! Session query engine
//!
//! The editor keeps chat history as one JSON array stored under a single key
//! of its generic key/value table. Every operation here issues exactly that
//! one lookup and derives its view (paging, by id, by recency) in memory.

use super::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::parser::parse_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Key/value table every workspace database carries
pub const ITEM_TABLE: &str = "ItemTable";

/// Key holding the serialized session array
pub const SESSIONS_KEY: &str = "interactive.sessions";

/// The only statement this crate runs against editor data. rusqlite's
/// statement cache is keyed by this text.
const SELECT_VALUE: &str = "SELECT value FROM ItemTable WHERE key = ?1";

/// In-memory paging applied after the full fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub offset: usize,
    pub limit: Option<usize>,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub total: usize,
    pub returned: usize,
    pub has_more: bool,
}

/// Aggregate view of the stored array, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub total_sessions: usize,
    /// Length of the serialized array in bytes
    pub size_estimate: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub sessions: Vec<Value>,
    pub metadata: Option<QueryMetadata>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub queries_executed: u64,
    /// Lookups that found no row
    pub empty_results: u64,
    pub failed_queries: u64,
    pub sessions_returned: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_query_duration: Option<Duration>,
    pub total_query_duration: Duration,
}

/// Reads the session array through a shared [`ConnectionManager`].
pub struct SessionQuery {
    connections: Arc<ConnectionManager>,
    stats: Mutex<QueryStats>,
}

impl SessionQuery {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            stats: Mutex::new(QueryStats::default()),
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, QueryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch and decode the whole session array.
    ///
    /// A missing row is an empty list. A value that is not a JSON array is
    /// an `Error::Query`, which the breaker neither retries nor counts.
    pub async fn fetch_all(&self, database: &Path) -> Result<Vec<Value>> {
        let started = Instant::now();
        let outcome = self.lookup(database).await;
        let elapsed = started.elapsed();

        let mut stats = self.lock_stats();
        stats.queries_executed += 1;
        stats.last_query_duration = Some(elapsed);
        stats.total_query_duration += elapsed;
        match &outcome {
            Ok(sessions) if sessions.is_empty() => stats.empty_results += 1,
            Ok(sessions) => stats.sessions_returned += sessions.len() as u64,
            Err(_) => stats.failed_queries += 1,
        }
        drop(stats);

        tracing::debug!(
            database = %database.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            ok = outcome.is_ok(),
            "Session lookup finished"
        );
        outcome
    }

    async fn lookup(&self, database: &Path) -> Result<Vec<Value>> {
        let raw = self
            .connections
            .with_connection(database, read_sessions_value)
            .await?;

        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&raw)? {
            Value::Array(sessions) => Ok(sessions),
            other => Err(Error::Query(format!(
                "{} holds {} instead of an array",
                SESSIONS_KEY,
                json_kind(&other)
            ))),
        }
    }

    /// Page through the session array.
    pub async fn get_sessions(
        &self,
        database: &Path,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let all = self.fetch_all(database).await?;
        let metadata = options
            .include_metadata
            .then(|| Self::compute_metadata(&all));

        let total = all.len();
        let sessions: Vec<Value> = all
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();
        let returned = sessions.len();

        Ok(QueryResult {
            sessions,
            metadata,
            pagination: Pagination {
                offset: options.offset,
                limit: options.limit,
                total,
                returned,
                has_more: options.offset.saturating_add(returned) < total,
            },
        })
    }

    /// The stored session whose `id` or `sessionId` equals `id`.
    pub async fn get_session_by_id(&self, database: &Path, id: &str) -> Result<Option<Value>> {
        let all = self.fetch_all(database).await?;
        Ok(all.into_iter().find(|s| raw_session_id(s) == Some(id)))
    }

    /// Sessions last active at or after `since`, newest first.
    ///
    /// Activity is `lastModified`, else `createdAt`. Sessions with neither
    /// are left out.
    pub async fn get_sessions_since(
        &self,
        database: &Path,
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let all = self.fetch_all(database).await?;
        let mut recent: Vec<(DateTime<Utc>, Value)> = all
            .into_iter()
            .filter_map(|s| raw_activity(&s).map(|at| (at, s)))
            .filter(|(at, _)| *at >= since)
            .collect();
        recent.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(recent.into_iter().map(|(_, s)| s).collect())
    }

    pub fn compute_metadata(sessions: &[Value]) -> QueryMetadata {
        let size_estimate = serde_json::to_string(sessions)
            .map(|s| s.len())
            .unwrap_or(0);
        let created: Vec<DateTime<Utc>> = sessions
            .iter()
            .filter_map(|s| s.get("createdAt").and_then(parse_timestamp))
            .collect();

        QueryMetadata {
            total_sessions: sessions.len(),
            size_estimate,
            earliest_created_at: created.iter().min().copied(),
            latest_created_at: created.iter().max().copied(),
        }
    }

    pub fn stats(&self) -> QueryStats {
        self.lock_stats().clone()
    }
}

/// Read the raw value stored under [`SESSIONS_KEY`]. NULL reads as absent.
fn read_sessions_value(conn: &Connection) -> Result<Option<String>> {
    let mut stmt = conn.prepare_cached(SELECT_VALUE)?;
    let value = stmt
        .query_row([SESSIONS_KEY], |row| row.get::<_, SqlValue>(0))
        .optional()?;

    match value {
        None | Some(SqlValue::Null) => Ok(None),
        Some(SqlValue::Text(text)) => Ok(Some(text)),
        Some(SqlValue::Blob(bytes)) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::Query(format!("{} is not valid UTF-8", SESSIONS_KEY))),
        Some(SqlValue::Integer(_)) | Some(SqlValue::Real(_)) => Err(Error::Query(format!(
            "{} holds a number instead of JSON text",
            SESSIONS_KEY
        ))),
    }
}

fn raw_session_id(session: &Value) -> Option<&str> {
    session
        .get("id")
        .or_else(|| session.get("sessionId"))
        .and_then(Value::as_str)
}

fn raw_activity(session: &Value) -> Option<DateTime<Utc>> {
    session
        .get("lastModified")
        .and_then(parse_timestamp)
        .or_else(|| session.get("createdAt").and_then(parse_timestamp))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
