//! Integration tests for the chatvault access pipeline
//!
//! These tests build real workspace storage trees and SQLite state databases
//! in temporary directories, seeded from fixture files in
//! `tests/fixtures/sessions/`, and drive them through the public API.

use chatvault_core::breaker::CircuitState;
use chatvault_core::db::{ConnectionManager, QueryOptions, SessionQuery, DATABASE_FILE_NAME};
use chatvault_core::parser::{ParserConfig, SessionParser};
use chatvault_core::platform::PlatformResolver;
use chatvault_core::workspace::{workspace_id, FixedWorkspace, WorkspaceResolver};
use chatvault_core::{BreakerConfig, DatabaseReader, Error, ReaderConfig, Role};
use rusqlite::Connection;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/sessions")
        .join(name)
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

/// Write a state database shaped like the editor's, optionally holding `sessions`.
fn write_state_db(path: &Path, sessions: Option<&str>) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
         INSERT INTO ItemTable VALUES ('workbench.sidebar.width', '300');",
    )
    .unwrap();
    if let Some(sessions) = sessions {
        conn.execute(
            "INSERT INTO ItemTable VALUES ('interactive.sessions', ?1)",
            [sessions],
        )
        .unwrap();
    }
}

/// Storage root plus one project whose database holds `sessions`.
struct Workspace {
    storage: TempDir,
    project: TempDir,
}

impl Workspace {
    fn new(sessions: Option<&str>) -> Self {
        let ws = Self {
            storage: TempDir::new().unwrap(),
            project: TempDir::new().unwrap(),
        };
        write_state_db(&ws.database(), sessions);
        ws
    }

    fn database(&self) -> PathBuf {
        self.storage
            .path()
            .join(workspace_id(self.project.path()))
            .join(DATABASE_FILE_NAME)
    }

    fn reader(&self, config: ReaderConfig) -> DatabaseReader {
        let config = ReaderConfig {
            storage_dir: Some(self.storage.path().to_path_buf()),
            ..config
        };
        DatabaseReader::new(config, Box::new(FixedWorkspace::new(self.project.path())))
    }
}

fn quick_breaker() -> BreakerConfig {
    BreakerConfig {
        max_retries: 0,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        reset_timeout: Duration::from_secs(60),
        ..BreakerConfig::default()
    }
}

// ============================================
// End-to-end reads
// ============================================

#[tokio::test]
async fn test_reads_fixture_sessions_from_workspace() {
    let ws = Workspace::new(Some(&fixture("basic.json")));
    let reader = ws.reader(ReaderConfig::default());

    let result = reader.get_sessions().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.sessions.len(), 2);

    let first = &result.sessions[0];
    assert_eq!(first.id, "s1");
    assert_eq!(first.custom_title.as_deref(), Some("Wire up the connection pool"));
    let meta = first.metadata();
    assert_eq!(meta.message_count, 2);
    assert_eq!(meta.first_message_at, Some(1743585300000));
    assert_eq!(meta.last_message_at, Some(1743585312000));

    let second = &result.sessions[1];
    assert_eq!(second.id, "s2");
    assert_eq!(second.custom_title.as_deref(), Some("Backoff tuning"));
    assert_eq!(second.metadata().user_message_count, 2);
    assert_eq!(second.metadata().assistant_message_count, 1);
    assert!(second.created_at.is_some());

    let query = result.metadata.query.expect("query metadata");
    assert_eq!(query.total_sessions, 2);
}

#[tokio::test]
async fn test_lenient_and_strict_reads_of_mixed_data() {
    let ws = Workspace::new(Some(&fixture("mixed-quality.json")));

    let lenient = ws.reader(ReaderConfig::default()).get_sessions().await;
    assert!(lenient.success);
    assert_eq!(lenient.sessions.len(), 2);
    let good = &lenient.sessions[0];
    assert_eq!(good.id, "good");
    assert_eq!(good.messages.len(), 2);
    assert_eq!(good.messages[0].role, Role::User);
    assert!(good.messages[1].timestamp.is_none());
    assert!(lenient.sessions[1].id.starts_with("session-"));

    let strict = ws
        .reader(ReaderConfig {
            parser: ParserConfig {
                strict: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .get_sessions()
        .await;
    assert!(strict.success);
    assert_eq!(strict.sessions.len(), 1);
    assert!(strict.sessions[0].id.starts_with("session-"));

    let requiring_ids = ws
        .reader(ReaderConfig {
            parser: ParserConfig {
                strict: true,
                require_session_id: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .get_sessions()
        .await;
    assert!(!requiring_ids.success);
    assert!(requiring_ids.error.is_some());
}

#[test]
fn test_parser_report_on_mixed_fixture() {
    let parser = SessionParser::default();
    let report = parser.parse_str(&fixture("mixed-quality.json"));

    assert!(report.success);
    assert_eq!(report.stats.sessions_seen, 5);
    assert_eq!(report.stats.sessions_valid, 2);
    assert_eq!(report.stats.sessions_rejected, 3);
    assert_eq!(report.stats.messages_seen, 5);
    assert_eq!(report.stats.messages_valid, 3);
    assert_eq!(report.stats.messages_rejected, 2);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("not a recognized timestamp")));
}

#[test]
fn test_single_object_fixture_is_wrapped_by_parser() {
    let report = SessionParser::default().parse_str(&fixture("single-object.json"));
    assert!(report.success);
    assert_eq!(report.sessions[0].id, "lonely");
    assert!(!report.warnings.is_empty());
}

#[tokio::test]
async fn test_stored_object_is_a_query_error() {
    let ws = Workspace::new(Some(&fixture("single-object.json")));
    let reader = ws.reader(ReaderConfig {
        breaker: quick_breaker(),
        ..Default::default()
    });

    let result = reader.get_sessions().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("instead of an array"));
    // A bad stored value is not a dependency failure
    let stats = reader.breaker().stats();
    assert_eq!(stats.total_failures, 0);
    assert_eq!(stats.total_retries, 0);
    assert_eq!(stats.state, CircuitState::Closed);
}

#[tokio::test]
async fn test_blob_value_is_read() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join(DATABASE_FILE_NAME);
    write_state_db(&db, None);
    let conn = Connection::open(&db).unwrap();
    conn.execute(
        "INSERT INTO ItemTable VALUES ('interactive.sessions', ?1)",
        [fixture("basic.json").into_bytes()],
    )
    .unwrap();
    drop(conn);

    let query = SessionQuery::new(Arc::new(ConnectionManager::default()));
    let result = query
        .get_sessions(
            &db,
            &QueryOptions {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.sessions.len(), 1);
    assert!(result.pagination.has_more);
}

#[tokio::test]
async fn test_concurrent_reads_share_one_connection() {
    let ws = Workspace::new(Some(&fixture("basic.json")));
    let reader = ws.reader(ReaderConfig::default());

    let (a, b, c) = tokio::join!(
        reader.get_sessions(),
        reader.get_session_by_id("s2"),
        reader.get_sessions()
    );
    assert!(a.success && b.success && c.success);

    let stats = reader.connections().stats();
    assert_eq!(stats.opened_total, 1);
    assert_eq!(stats.active_connections, 1);
}

// ============================================
// Failure handling
// ============================================

#[tokio::test]
async fn test_breaker_opens_after_five_failures_and_rejects_sixth() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join(DATABASE_FILE_NAME);
    std::fs::write(&db, b"NotASQLiteFile!\0 padding padding").unwrap();

    let reader = DatabaseReader::for_database(
        ReaderConfig {
            breaker: quick_breaker(),
            ..Default::default()
        },
        &db,
    );

    for attempt in 0..5 {
        assert_eq!(reader.breaker().state(), CircuitState::Closed, "attempt {}", attempt);
        let result = reader.get_sessions().await;
        assert!(!result.success);
    }
    assert_eq!(reader.breaker().state(), CircuitState::Open);

    let sixth = reader.get_sessions().await;
    assert!(sixth.error.unwrap().contains("circuit breaker is open"));

    let stats = reader.breaker().stats();
    assert_eq!(stats.total_failures, 5);
    assert_eq!(stats.total_rejections, 1);
    // Validation failed every time, so nothing was ever opened or pooled
    let connections = reader.connections().stats();
    assert_eq!(connections.opened_total, 0);
    assert_eq!(connections.active_connections, 0);
}

#[tokio::test]
async fn test_missing_workspace_database_is_resolution_failure() {
    let storage = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let reader = DatabaseReader::new(
        ReaderConfig {
            storage_dir: Some(storage.path().to_path_buf()),
            breaker: quick_breaker(),
            ..Default::default()
        },
        Box::new(FixedWorkspace::new(project.path())),
    );

    for _ in 0..10 {
        let result = reader.get_sessions().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("does not exist"));
    }
    assert_eq!(reader.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_self_test_reports_layers() {
    let ws = Workspace::new(Some(&fixture("basic.json")));
    let report = ws.reader(ReaderConfig::default()).self_test().await;

    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.layers.len(), 5);
    assert!(report.layers[3].detail.contains("2 stored sessions"));
}

// ============================================
// Workspace identity and discovery
// ============================================

#[test]
fn test_workspace_id_ignores_case_and_trailing_separator() {
    let a = workspace_id(Path::new("/Users/Dev/Projects/App"));
    let b = workspace_id(Path::new("/users/dev/projects/app/"));
    let c = workspace_id(Path::new("/users/dev/projects/./lib/../app"));
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    assert_ne!(a, workspace_id(Path::new("/users/dev/projects/other")));
}

#[tokio::test]
async fn test_discovery_orders_by_modification_time() {
    let storage = TempDir::new().unwrap();
    let older = TempDir::new().unwrap();
    let newer = TempDir::new().unwrap();

    let mut databases = Vec::new();
    for project in [older.path(), newer.path()] {
        let db = storage
            .path()
            .join(workspace_id(project))
            .join(DATABASE_FILE_NAME);
        write_state_db(&db, Some("[]"));
        databases.push(db);
    }
    // Not a database: must be skipped
    let junk = storage.path().join("0123456789abcdef0123456789abcdef");
    std::fs::create_dir_all(&junk).unwrap();
    std::fs::write(junk.join(DATABASE_FILE_NAME), b"garbage").unwrap();

    let now = SystemTime::now();
    File::options()
        .write(true)
        .open(&databases[0])
        .unwrap()
        .set_modified(now - Duration::from_secs(3600))
        .unwrap();
    File::options()
        .write(true)
        .open(&databases[1])
        .unwrap()
        .set_modified(now)
        .unwrap();

    let platform = Arc::new(PlatformResolver::new().with_storage_dir(storage.path().to_path_buf()));
    let resolver = WorkspaceResolver::new(platform);
    let found = resolver.discover().await.unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].workspace_id, workspace_id(newer.path()));
    assert_eq!(found[1].workspace_id, workspace_id(older.path()));
    assert!(found.iter().all(|w| w.is_valid));

    let by_id = resolver.resolve_by_id(&found[0].workspace_id).await.unwrap();
    assert_eq!(by_id.database_path, databases[1]);
    assert!(resolver
        .resolve_by_id("0123456789abcdef0123456789abcdef")
        .await
        .is_none());
}

#[tokio::test]
async fn test_resolution_cache_drops_vanished_database() {
    let ws = Workspace::new(Some("[]"));
    let platform =
        Arc::new(PlatformResolver::new().with_storage_dir(ws.storage.path().to_path_buf()));
    let resolver = WorkspaceResolver::new(platform);

    let info = resolver.resolve(ws.project.path()).await;
    assert!(info.is_valid);
    assert_eq!(resolver.cache_len(), 1);

    std::fs::remove_file(ws.database()).unwrap();
    let info = resolver.resolve(ws.project.path()).await;
    assert!(!info.is_valid);
    assert_eq!(resolver.cache_len(), 0);
}

#[tokio::test]
async fn test_error_classes_drive_breaker() {
    let ws = Workspace::new(Some("[]"));
    let reader = ws.reader(ReaderConfig::default());

    let err = reader
        .breaker()
        .execute(|| async { Err::<(), _>(Error::SessionNotFound("x".to_string())) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
    assert_eq!(reader.breaker().stats().total_failures, 0);
}
