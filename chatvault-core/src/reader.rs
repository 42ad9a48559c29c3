//! Database reader facade
//!
//! [`DatabaseReader`] wires the pipeline together:
//!
//! ```text
//! WorkspaceProvider ─► WorkspaceResolver ─► ConnectionManager ─► SessionQuery ─► SessionParser
//!                                   └──────────── CircuitBreaker ────────────┘
//! ```
//!
//! The breaker wraps database access (resolution, connection, lookup).
//! Parsing runs afterwards and never touches breaker accounting.
//!
//! Public operations return result values rather than `Err`, so callers can
//! always render what happened.

use crate::breaker::{BreakerConfig, BreakerHealth, CircuitBreaker, CircuitState};
use crate::db::{
    ConnectionConfig, ConnectionManager, ConnectionStats, Pagination, QueryMetadata,
    QueryOptions, QueryStats, SessionQuery,
};
use crate::db::connection::DEFAULT_RETRY_COOLDOWN;
use crate::error::{Error, Result};
use crate::parser::{ParseReport, ParserConfig, SessionParser};
use crate::platform::{PlatformResolver, DEFAULT_EDITOR_VARIANTS};
use crate::types::{ParsedSession, PlatformConfig, WorkspaceInfo};
use crate::workspace::{WorkspaceProvider, WorkspaceResolver};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a reader needs to build its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Explicit workspace storage root, bypassing platform detection
    pub storage_dir: Option<PathBuf>,
    /// Alternate installation folders for platform fallback
    pub editor_variants: Vec<String>,
    pub connection: ConnectionConfig,
    pub retry_cooldown: Duration,
    /// Wrap database access in the circuit breaker
    pub use_breaker: bool,
    pub breaker: BreakerConfig,
    pub parser: ParserConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            editor_variants: DEFAULT_EDITOR_VARIANTS.iter().map(|v| v.to_string()).collect(),
            connection: ConnectionConfig::default(),
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            use_breaker: true,
            breaker: BreakerConfig::default(),
            parser: ParserConfig::default(),
        }
    }
}

/// Where sessions are read from.
enum Source {
    /// The workspace the host reports as open
    Workspace(Box<dyn WorkspaceProvider>),
    /// A database file named directly
    File(PathBuf),
}

// ============================================
// Results
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMetadata {
    pub count: usize,
    pub processing_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker_state: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// Uniform result of every read operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    pub success: bool,
    pub sessions: Vec<ParsedSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub metadata: ReadMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PlatformConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of every collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub breaker_enabled: bool,
    pub breaker: BreakerHealth,
    pub connections: ConnectionStats,
    pub queries: QueryStats,
    pub platform: PlatformHealth,
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Platform,
    Workspace,
    Connection,
    Query,
    Parser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerReport {
    pub layer: Layer,
    pub status: LayerStatus,
    pub detail: String,
    pub duration: Duration,
}

/// Outcome of [`DatabaseReader::self_test`]. Layers after the first failure
/// are not run and do not appear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfTestReport {
    pub success: bool,
    pub layers: Vec<LayerReport>,
    pub errors: Vec<String>,
}

// ============================================
// Reader
// ============================================

/// Reads chat sessions from the editor's workspace database.
pub struct DatabaseReader {
    config: ReaderConfig,
    source: Source,
    platform: Arc<PlatformResolver>,
    workspaces: WorkspaceResolver,
    connections: Arc<ConnectionManager>,
    query: SessionQuery,
    parser: SessionParser,
    breaker: CircuitBreaker,
}

impl DatabaseReader {
    /// Read the database of whatever workspace `provider` reports.
    pub fn new(config: ReaderConfig, provider: Box<dyn WorkspaceProvider>) -> Self {
        Self::build(config, Source::Workspace(provider))
    }

    /// Read one database file directly.
    pub fn for_database(config: ReaderConfig, database: impl Into<PathBuf>) -> Self {
        Self::build(config, Source::File(database.into()))
    }

    /// Validate a loaded configuration and build a workspace reader from it.
    pub fn from_config(
        config: &crate::config::Config,
        provider: Box<dyn WorkspaceProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.reader_config(), provider))
    }

    fn build(config: ReaderConfig, source: Source) -> Self {
        let mut platform = PlatformResolver::new().with_variants(config.editor_variants.clone());
        if let Some(dir) = &config.storage_dir {
            platform = platform.with_storage_dir(dir.clone());
        }
        let platform = Arc::new(platform);

        let connections = Arc::new(
            ConnectionManager::new(config.connection.clone())
                .with_retry_cooldown(config.retry_cooldown),
        );

        Self {
            workspaces: WorkspaceResolver::new(platform.clone()),
            query: SessionQuery::new(connections.clone()),
            parser: SessionParser::new(config.parser.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            platform,
            connections,
            source,
            config,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// All sessions, in stored order, with query metadata.
    pub async fn get_sessions(&self) -> ReadResult {
        let options = QueryOptions {
            include_metadata: true,
            ..QueryOptions::default()
        };
        self.get_sessions_page(&options).await
    }

    /// Sessions paged after parsing, so rejected entries never shift a page.
    pub async fn get_sessions_page(&self, options: &QueryOptions) -> ReadResult {
        let started = Instant::now();
        let fetch = QueryOptions {
            include_metadata: options.include_metadata,
            ..QueryOptions::default()
        };

        let fetch = &fetch;
        let fetched = self
            .guarded(move || async move {
                let database = self.database_path().await?;
                self.query.get_sessions(&database, fetch).await
            })
            .await;

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => return self.failed(e, started),
        };

        let mut result = self.parse_into_result(Value::Array(raw.sessions), started);
        let total = result.sessions.len();
        let page: Vec<ParsedSession> = std::mem::take(&mut result.sessions)
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        result.metadata.count = page.len();
        result.metadata.query = raw.metadata;
        result.metadata.pagination = Some(Pagination {
            offset: options.offset,
            limit: options.limit,
            total,
            returned: page.len(),
            has_more: options.offset.saturating_add(page.len()) < total,
        });
        result.sessions = page;
        result
    }

    /// The session whose stored `id` or `sessionId` equals `id`.
    pub async fn get_session_by_id(&self, id: &str) -> ReadResult {
        let started = Instant::now();

        let fetched = self
            .guarded(move || async move {
                let database = self.database_path().await?;
                self.query.get_session_by_id(&database, id).await
            })
            .await;

        match fetched {
            Ok(Some(raw)) => self.parse_into_result(Value::Array(vec![raw]), started),
            Ok(None) => self.failed(Error::SessionNotFound(id.to_string()), started),
            Err(e) => self.failed(e, started),
        }
    }

    /// Sessions active at or after `since`, newest first.
    pub async fn get_sessions_since(&self, since: DateTime<Utc>) -> ReadResult {
        let started = Instant::now();

        let fetched = self
            .guarded(move || async move {
                let database = self.database_path().await?;
                self.query.get_sessions_since(&database, since).await
            })
            .await;

        match fetched {
            Ok(raw) => self.parse_into_result(Value::Array(raw), started),
            Err(e) => self.failed(e, started),
        }
    }

    /// Every discoverable workspace database, most recent first.
    pub async fn discover_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        self.workspaces.discover().await
    }

    /// Resolve an arbitrary workspace directory.
    pub async fn resolve_workspace(&self, path: &Path) -> WorkspaceInfo {
        self.workspaces.resolve(path).await
    }

    /// The database file this reader targets.
    pub async fn database_path(&self) -> Result<PathBuf> {
        match &self.source {
            Source::File(path) => Ok(path.clone()),
            Source::Workspace(provider) => {
                let info = self.workspaces.resolve_current(provider.as_ref()).await?;
                if info.is_valid {
                    Ok(info.database_path)
                } else {
                    Err(Error::Resolution(format!(
                        "workspace {} has no usable database: {}",
                        info.workspace_path.display(),
                        info.error.unwrap_or_else(|| "unknown error".to_string())
                    )))
                }
            }
        }
    }

    async fn guarded<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.config.use_breaker {
            self.breaker.execute(op).await
        } else {
            op().await
        }
    }

    fn breaker_state(&self) -> Option<CircuitState> {
        self.config.use_breaker.then(|| self.breaker.state())
    }

    fn parse_into_result(&self, raw: Value, started: Instant) -> ReadResult {
        let is_empty = raw.as_array().is_some_and(|a| a.is_empty());
        if is_empty {
            return ReadResult {
                success: true,
                sessions: Vec::new(),
                error: None,
                warnings: Vec::new(),
                metadata: self.metadata(0, started),
            };
        }

        let ParseReport {
            success,
            sessions,
            error,
            warnings,
            ..
        } = self.parser.parse(&raw);

        ReadResult {
            success,
            metadata: self.metadata(sessions.len(), started),
            sessions,
            error,
            warnings,
        }
    }

    fn failed(&self, error: Error, started: Instant) -> ReadResult {
        tracing::debug!(error = %error, "Read failed");
        ReadResult {
            success: false,
            sessions: Vec::new(),
            error: Some(error.to_string()),
            warnings: Vec::new(),
            metadata: self.metadata(0, started),
        }
    }

    fn metadata(&self, count: usize, started: Instant) -> ReadMetadata {
        ReadMetadata {
            count,
            processing_time: started.elapsed(),
            breaker_state: self.breaker_state(),
            query: None,
            pagination: None,
        }
    }

    // ============================================
    // Diagnostics
    // ============================================

    /// Collect health from every collaborator. Breaker counters are not touched.
    pub async fn health(&self) -> HealthSnapshot {
        let platform = match self.platform.storage_path().await {
            Ok(_) => PlatformHealth {
                config: self.platform.cached(),
                error: None,
            },
            Err(e) => PlatformHealth {
                config: self.platform.config().ok(),
                error: Some(e.to_string()),
            },
        };

        HealthSnapshot {
            breaker_enabled: self.config.use_breaker,
            breaker: self.breaker.health(),
            connections: self.connections.stats(),
            queries: self.query.stats(),
            platform,
            parser: self.parser.config().clone(),
        }
    }

    /// Exercise each layer in dependency order, stopping at the first failure.
    ///
    /// Runs outside the breaker so a failing self-test does not open it.
    pub async fn self_test(&self) -> SelfTestReport {
        let mut run = SelfTestRun::default();

        let database = match &self.source {
            Source::File(path) => {
                run.skipped(Layer::Platform, "explicit database file");
                run.skipped(Layer::Workspace, "explicit database file");
                path.clone()
            }
            Source::Workspace(provider) => {
                let started = Instant::now();
                match self.platform.storage_path().await {
                    Ok(storage) => run.passed(
                        Layer::Platform,
                        format!("storage root {}", storage.display()),
                        started,
                    ),
                    Err(e) => return run.failed(Layer::Platform, e, started),
                }

                let started = Instant::now();
                match self.workspaces.resolve_current(provider.as_ref()).await {
                    Ok(info) if info.is_valid => {
                        run.passed(
                            Layer::Workspace,
                            format!("workspace id {}", info.workspace_id),
                            started,
                        );
                        info.database_path
                    }
                    Ok(info) => {
                        let reason = info.error.unwrap_or_else(|| "invalid database".to_string());
                        return run.failed(
                            Layer::Workspace,
                            Error::Resolution(format!("{}: {}", info.workspace_id, reason)),
                            started,
                        );
                    }
                    Err(e) => return run.failed(Layer::Workspace, e, started),
                }
            }
        };

        let started = Instant::now();
        match self.connections.get_connection(&database).await {
            Ok(_) => run.passed(
                Layer::Connection,
                format!("opened {}", database.display()),
                started,
            ),
            Err(e) => return run.failed(Layer::Connection, e, started),
        }

        let started = Instant::now();
        let sessions = match self.query.fetch_all(&database).await {
            Ok(sessions) => {
                run.passed(
                    Layer::Query,
                    format!("{} stored sessions", sessions.len()),
                    started,
                );
                sessions
            }
            Err(e) => return run.failed(Layer::Query, e, started),
        };

        let started = Instant::now();
        let (input, label) = if sessions.is_empty() {
            (sample_sessions(), "sample")
        } else {
            (Value::Array(sessions), "stored")
        };
        let report = self.parser.parse(&input);
        if report.success {
            run.passed(
                Layer::Parser,
                format!("{} {} sessions parsed", report.sessions.len(), label),
                started,
            );
        } else {
            let reason = report
                .error
                .unwrap_or_else(|| "no valid sessions".to_string());
            return run.failed(Layer::Parser, Error::Parse(reason), started);
        }

        run.finish()
    }

    /// Release every resource and reset all caches and the breaker.
    pub fn dispose(&self) {
        self.connections.dispose();
        self.workspaces.clear_cache();
        self.platform.reset_cache();
        self.breaker.reset();
        tracing::debug!("Database reader disposed");
    }
}

/// Minimal well-formed input used when the database holds no sessions.
fn sample_sessions() -> Value {
    json!([{
        "id": "self-test",
        "messages": [
            {"role": "user", "content": "ping"},
            {"role": "assistant", "content": "pong"}
        ]
    }])
}

#[derive(Default)]
struct SelfTestRun {
    layers: Vec<LayerReport>,
}

impl SelfTestRun {
    fn passed(&mut self, layer: Layer, detail: String, started: Instant) {
        self.layers.push(LayerReport {
            layer,
            status: LayerStatus::Passed,
            detail,
            duration: started.elapsed(),
        });
    }

    fn skipped(&mut self, layer: Layer, detail: &str) {
        self.layers.push(LayerReport {
            layer,
            status: LayerStatus::Skipped,
            detail: detail.to_string(),
            duration: Duration::ZERO,
        });
    }

    fn failed(mut self, layer: Layer, error: Error, started: Instant) -> SelfTestReport {
        let message = error.to_string();
        tracing::warn!(layer = ?layer, error = %message, "Self-test layer failed");
        self.layers.push(LayerReport {
            layer,
            status: LayerStatus::Failed,
            detail: message.clone(),
            duration: started.elapsed(),
        });
        SelfTestReport {
            success: false,
            layers: self.layers,
            errors: vec![message],
        }
    }

    fn finish(self) -> SelfTestReport {
        SelfTestReport {
            success: true,
            layers: self.layers,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DATABASE_FILE_NAME;
    use crate::workspace::{workspace_id, FixedWorkspace};
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn fast_config(storage: &Path) -> ReaderConfig {
        ReaderConfig {
            storage_dir: Some(storage.to_path_buf()),
            breaker: BreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                ..BreakerConfig::default()
            },
            ..ReaderConfig::default()
        }
    }

    fn write_database(path: &Path, sessions: Option<&Value>) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);",
        )
        .unwrap();
        if let Some(sessions) = sessions {
            conn.execute(
                "INSERT INTO ItemTable VALUES ('interactive.sessions', ?1)",
                [sessions.to_string()],
            )
            .unwrap();
        }
    }

    /// Storage root with a database for `workspace`, returning the database path.
    fn seed_workspace(storage: &Path, workspace: &Path, sessions: Option<&Value>) -> PathBuf {
        let db = storage
            .join(workspace_id(workspace))
            .join(DATABASE_FILE_NAME);
        write_database(&db, sessions);
        db
    }

    fn sessions() -> Value {
        json!([
            {"id": "s1", "lastModified": "2024-03-01T00:00:00Z",
             "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]},
            {"id": "s2", "lastModified": "2024-06-01T00:00:00Z",
             "messages": [{"role": "user", "content": "again"}]},
            {"id": "broken", "messages": [{"role": "system", "content": "x"}]}
        ])
    }

    #[tokio::test]
    async fn test_reads_current_workspace() {
        let storage = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        seed_workspace(storage.path(), project.path(), Some(&sessions()));

        let reader = DatabaseReader::new(
            fast_config(storage.path()),
            Box::new(FixedWorkspace::new(project.path())),
        );
        let result = reader.get_sessions().await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.sessions.len(), 2);
        assert_eq!(result.metadata.count, 2);
        assert_eq!(result.metadata.breaker_state, Some(CircuitState::Closed));
        assert_eq!(result.metadata.query.as_ref().unwrap().total_sessions, 3);
        assert!(result.warnings.iter().any(|w| w.contains("broken")));
    }

    #[tokio::test]
    async fn test_paging_after_parse() {
        let storage = TempDir::new().unwrap();
        let db = seed_workspace(storage.path(), Path::new("/unused"), Some(&sessions()));
        let reader = DatabaseReader::for_database(fast_config(storage.path()), db);

        let page = reader
            .get_sessions_page(&QueryOptions {
                offset: 1,
                limit: Some(5),
                include_metadata: false,
            })
            .await;
        assert!(page.success);
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].id, "s2");
        assert!(page.metadata.query.is_none());
        let pagination = page.metadata.pagination.unwrap();
        assert_eq!(pagination.total, 2);
        assert!(!pagination.has_more);

        let with_metadata = reader
            .get_sessions_page(&QueryOptions {
                include_metadata: true,
                ..QueryOptions::default()
            })
            .await;
        assert_eq!(with_metadata.metadata.query.unwrap().total_sessions, 3);
    }

    #[tokio::test]
    async fn test_empty_database_is_success() {
        let storage = TempDir::new().unwrap();
        let db = storage.path().join("x").join(DATABASE_FILE_NAME);
        write_database(&db, None);
        let reader = DatabaseReader::for_database(fast_config(storage.path()), db);

        let result = reader.get_sessions().await;
        assert!(result.success);
        assert!(result.sessions.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_session_by_id_and_not_found() {
        let storage = TempDir::new().unwrap();
        let db = seed_workspace(storage.path(), Path::new("/unused"), Some(&sessions()));
        let reader = DatabaseReader::for_database(fast_config(storage.path()), db);

        let found = reader.get_session_by_id("s2").await;
        assert!(found.success);
        assert_eq!(found.sessions[0].id, "s2");

        let missing = reader.get_session_by_id("nope").await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("session not found"));
        assert_eq!(reader.breaker().stats().failure_count, 0);

        let invalid = reader.get_session_by_id("broken").await;
        assert!(!invalid.success);
        assert_eq!(reader.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_sessions_since_newest_first() {
        let storage = TempDir::new().unwrap();
        let db = seed_workspace(storage.path(), Path::new("/unused"), Some(&sessions()));
        let reader = DatabaseReader::for_database(fast_config(storage.path()), db);

        let since = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = reader.get_sessions_since(since).await;
        let ids: Vec<_> = result.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[tokio::test]
    async fn test_no_workspace_fails_cleanly() {
        let storage = TempDir::new().unwrap();
        let reader = DatabaseReader::new(
            fast_config(storage.path()),
            Box::new(FixedWorkspace::none()),
        );

        let result = reader.get_sessions().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no workspace folder is open"));
        // Resolution problems are not dependency failures
        assert_eq!(reader.breaker().stats().total_failures, 0);
    }

    #[tokio::test]
    async fn test_connection_failures_open_breaker() {
        let storage = TempDir::new().unwrap();
        let db = storage.path().join(DATABASE_FILE_NAME);
        std::fs::write(&db, b"NotASQLiteFile!\0\0\0\0").unwrap();
        let reader = DatabaseReader::for_database(fast_config(storage.path()), &db);

        for _ in 0..2 {
            let result = reader.get_sessions().await;
            assert!(!result.success);
            assert!(result.error.unwrap().contains("missing SQLite signature"));
        }
        assert_eq!(reader.breaker().state(), CircuitState::Open);

        let rejected = reader.get_sessions().await;
        assert!(rejected.error.unwrap().contains("circuit breaker is open"));
        assert_eq!(rejected.metadata.breaker_state, Some(CircuitState::Open));
        assert!(!reader.connections().is_pooled(&db));
    }

    #[tokio::test]
    async fn test_stored_object_does_not_trip_breaker() {
        let storage = TempDir::new().unwrap();
        let db = storage.path().join("x").join(DATABASE_FILE_NAME);
        write_database(&db, Some(&json!({})));
        let config = ReaderConfig {
            breaker: BreakerConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(100),
                ..fast_config(storage.path()).breaker
            },
            ..fast_config(storage.path())
        };
        let reader = DatabaseReader::for_database(config, &db);

        let started = Instant::now();
        for _ in 0..3 {
            let result = reader.get_sessions().await;
            assert!(!result.success);
            assert!(result.error.unwrap().contains("instead of an array"));
        }
        assert!(started.elapsed() < Duration::from_millis(300));

        let stats = reader.breaker().stats();
        assert_eq!(stats.total_retries, 0);
        assert_eq!(stats.total_failures, 0);
        assert_eq!(stats.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_can_be_disabled() {
        let storage = TempDir::new().unwrap();
        let db = storage.path().join(DATABASE_FILE_NAME);
        std::fs::write(&db, b"NotASQLiteFile!\0\0\0\0").unwrap();
        let config = ReaderConfig {
            use_breaker: false,
            ..fast_config(storage.path())
        };
        let reader = DatabaseReader::for_database(config, &db);

        for _ in 0..5 {
            assert!(!reader.get_sessions().await.success);
        }
        let result = reader.get_sessions().await;
        assert!(result.metadata.breaker_state.is_none());
        assert_eq!(reader.breaker().stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_self_test_passes_all_layers() {
        let storage = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        seed_workspace(storage.path(), project.path(), None);

        let reader = DatabaseReader::new(
            fast_config(storage.path()),
            Box::new(FixedWorkspace::new(project.path())),
        );
        let report = reader.self_test().await;

        assert!(report.success, "{:?}", report.errors);
        let layers: Vec<_> = report.layers.iter().map(|l| l.layer).collect();
        assert_eq!(
            layers,
            vec![
                Layer::Platform,
                Layer::Workspace,
                Layer::Connection,
                Layer::Query,
                Layer::Parser
            ]
        );
        assert!(report.layers[4].detail.contains("sample"));
    }

    #[tokio::test]
    async fn test_self_test_stops_at_first_failure() {
        let storage = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let reader = DatabaseReader::new(
            fast_config(storage.path()),
            Box::new(FixedWorkspace::new(project.path())),
        );
        let report = reader.self_test().await;

        assert!(!report.success);
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.layers[1].layer, Layer::Workspace);
        assert_eq!(report.layers[1].status, LayerStatus::Failed);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_health_and_dispose() {
        let storage = TempDir::new().unwrap();
        let db = seed_workspace(storage.path(), Path::new("/unused"), Some(&sessions()));
        let reader = DatabaseReader::for_database(fast_config(storage.path()), &db);

        assert!(reader.get_sessions().await.success);
        let health = reader.health().await;
        assert!(health.breaker_enabled);
        assert_eq!(health.connections.active_connections, 1);
        assert_eq!(health.queries.queries_executed, 1);
        assert!(health.platform.error.is_none());
        assert_eq!(health.breaker.stats.total_requests, 1);
        assert!(serde_json::to_string(&health).is_ok());

        reader.breaker().open();
        reader.dispose();
        assert_eq!(reader.connections().stats().active_connections, 0);
        assert_eq!(reader.breaker().state(), CircuitState::Closed);
        assert!(reader.get_sessions().await.success);
    }
}
