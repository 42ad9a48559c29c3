//! Connection management
//!
//! Keeps at most one read-only SQLite handle per database path. Handles are
//! shared as `Arc<tokio::sync::Mutex<Connection>>`; holding the mutex is what
//! serializes overlapping use of one handle, since a `rusqlite::Connection`
//! must not be used from two call chains at once.
//!
//! ## Lifecycle of `get_connection`
//!
//! 1. Fail fast if an open attempt for this path failed within the cooldown.
//! 2. Reuse the pooled handle if it still answers `SELECT 1`.
//! 3. Validate the file (exists, regular, readable, SQLite signature).
//! 4. Open on the blocking pool with a timeout, apply pragmas, run a sanity query.
//! 5. Register the handle in the pool.

use super::validate_database_file;
use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// A pooled handle. Lock it to use it.
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

/// How long a path is refused after a failed open attempt
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

/// Pragmas for read-mostly access. `query_only` is added for read-only handles.
const READ_PRAGMAS: &str = "
    PRAGMA temp_store = MEMORY;
    PRAGMA cache_size = -16384;  -- 16MB cache
    PRAGMA mmap_size = 268435456;
";

/// Options applied to every connection a manager opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Open with `SQLITE_OPEN_READ_ONLY` and `query_only`
    pub read_only: bool,
    /// Bound on the open itself and on SQLite's busy wait
    pub timeout: Duration,
    /// Refuse paths that do not exist yet
    pub must_exist: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_only: true,
            timeout: Duration::from_secs(5),
            must_exist: true,
        }
    }
}

/// Pool statistics for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Handles currently pooled
    pub active_connections: usize,
    /// Paths still inside their failure cooldown
    pub throttled_paths: usize,
    /// Handles opened since creation
    pub opened_total: u64,
    /// Pooled handles handed out again
    pub reused_total: u64,
    /// Failed open attempts (validation, open, sanity, timeout)
    pub failed_total: u64,
    /// Handles removed from the pool
    pub closed_total: u64,
}

/// Opens, pools and disposes read-only connections.
pub struct ConnectionManager {
    config: ConnectionConfig,
    retry_cooldown: Duration,
    pool: Mutex<HashMap<PathBuf, SharedConnection>>,
    failed_attempts: Mutex<HashMap<PathBuf, Instant>>,
    open_guards: Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>,
    counters: Mutex<ConnectionStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            pool: Mutex::new(HashMap::new()),
            failed_attempts: Mutex::new(HashMap::new()),
            open_guards: Mutex::new(HashMap::new()),
            counters: Mutex::new(ConnectionStats::default()),
        }
    }

    /// Override the fail-fast window after a failed open.
    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get a healthy handle for `path`, opening one if needed.
    pub async fn get_connection(&self, path: &Path) -> Result<SharedConnection> {
        // One opener per path; later callers find the pooled handle.
        let guard = self.open_guard(path);
        let _opening = guard.lock().await;

        if let Some(remaining) = self.throttle_remaining(path) {
            tracing::warn!(
                path = %path.display(),
                retry_in_ms = remaining.as_millis() as u64,
                "Refusing connection attempt during failure cooldown"
            );
            return Err(Error::connection(
                path,
                format!(
                    "previous attempt failed; retry allowed in {}ms",
                    remaining.as_millis()
                ),
            ));
        }

        let pooled = lock(&self.pool).get(path).cloned();
        if let Some(existing) = pooled {
            if probe(&existing).await {
                lock(&self.counters).reused_total += 1;
                return Ok(existing);
            }
            tracing::warn!(path = %path.display(), "Pooled connection failed health check");
            self.close_connection(path);
        }

        if let Err(e) = self.check_file(path).await {
            lock(&self.counters).failed_total += 1;
            return Err(e);
        }

        let conn = match self.open(path).await {
            Ok(conn) => conn,
            Err(e) => {
                lock(&self.failed_attempts).insert(path.to_path_buf(), Instant::now());
                lock(&self.counters).failed_total += 1;
                tracing::warn!(path = %path.display(), error = %e, "Failed to open database");
                return Err(e);
            }
        };

        let shared: SharedConnection = Arc::new(tokio::sync::Mutex::new(conn));
        lock(&self.pool).insert(path.to_path_buf(), shared.clone());
        lock(&self.failed_attempts).remove(path);
        lock(&self.counters).opened_total += 1;
        tracing::info!(path = %path.display(), "Opened database connection");

        Ok(shared)
    }

    /// Run a blocking closure against the serialized handle for `path`.
    pub async fn with_connection<T, F>(&self, path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.get_connection(path).await?;
        let guard = conn.lock_owned().await;
        tokio::task::spawn_blocking(move || f(&*guard))
            .await
            .map_err(|e| Error::connection(path, format!("query task failed: {}", e)))?
    }

    /// Guard shared by callers currently opening `path`. Entries nobody
    /// holds are pruned when a new guard is created.
    fn open_guard(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = lock(&self.open_guards);
        if let Some(existing) = guards.get(path).and_then(Weak::upgrade) {
            return existing;
        }
        guards.retain(|_, guard| guard.strong_count() > 0);

        let guard = Arc::new(tokio::sync::Mutex::new(()));
        guards.insert(path.to_path_buf(), Arc::downgrade(&guard));
        guard
    }

    fn throttle_remaining(&self, path: &Path) -> Option<Duration> {
        let mut failed = lock(&self.failed_attempts);
        let at = *failed.get(path)?;
        let elapsed = at.elapsed();
        if elapsed < self.retry_cooldown {
            Some(self.retry_cooldown - elapsed)
        } else {
            failed.remove(path);
            None
        }
    }

    /// Whether a recent failure makes `path` fail fast right now.
    pub fn is_throttled(&self, path: &Path) -> bool {
        self.throttle_remaining(path).is_some()
    }

    async fn check_file(&self, path: &Path) -> Result<()> {
        if !self.config.must_exist && !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        validate_database_file(path).await.map(|_| ())
    }

    async fn open(&self, path: &Path) -> Result<Connection> {
        let config = self.config.clone();
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || open_and_prepare(&owned, &config));

        match tokio::time::timeout(self.config.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::connection(path, format!("open task failed: {}", e))),
            // The blocking task drops its half-open handle when it finishes
            Err(_) => Err(Error::connection(
                path,
                format!("open timed out after {}ms", self.config.timeout.as_millis()),
            )),
        }
    }

    /// Remove and close the handle for `path`. Safe to call repeatedly.
    ///
    /// Returns whether a handle was pooled.
    pub fn close_connection(&self, path: &Path) -> bool {
        let removed = lock(&self.pool).remove(path);
        {
            let mut guards = lock(&self.open_guards);
            if guards.get(path).is_some_and(|g| g.strong_count() == 0) {
                guards.remove(path);
            }
        }
        match removed {
            Some(conn) => {
                lock(&self.counters).closed_total += 1;
                release(path, conn);
                true
            }
            None => false,
        }
    }

    /// Close every pooled handle.
    pub fn close_all_connections(&self) {
        let drained: Vec<_> = lock(&self.pool).drain().collect();
        lock(&self.counters).closed_total += drained.len() as u64;
        for (path, conn) in drained {
            release(&path, conn);
        }
    }

    /// Close everything and forget retry bookkeeping.
    pub fn dispose(&self) {
        self.close_all_connections();
        lock(&self.failed_attempts).clear();
        lock(&self.open_guards).clear();
        tracing::debug!("Connection manager disposed");
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = lock(&self.counters).clone();
        stats.active_connections = lock(&self.pool).len();
        stats.throttled_paths = lock(&self.failed_attempts)
            .values()
            .filter(|at| at.elapsed() < self.retry_cooldown)
            .count();
        stats
    }

    pub fn is_pooled(&self, path: &Path) -> bool {
        lock(&self.pool).contains_key(path)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_all_connections();
    }
}

fn open_flags(config: &ConnectionConfig) -> OpenFlags {
    let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if config.read_only {
        flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
    } else {
        flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
        if !config.must_exist {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
    }
    flags
}

fn open_and_prepare(path: &Path, config: &ConnectionConfig) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, open_flags(config))
        .map_err(|e| Error::connection(path, format!("open failed: {}", e)))?;

    if let Err(e) = prepare(&conn, config) {
        close_quietly(path, conn);
        return Err(Error::connection(path, format!("sanity check failed: {}", e)));
    }
    Ok(conn)
}

fn prepare(conn: &Connection, config: &ConnectionConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(config.timeout)?;
    if config.read_only {
        conn.execute_batch("PRAGMA query_only = ON;")?;
    }
    conn.execute_batch(READ_PRAGMAS)?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(())
}

async fn probe(conn: &SharedConnection) -> bool {
    let guard = conn.clone().lock_owned().await;
    tokio::task::spawn_blocking(move || {
        guard
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    })
    .await
    .unwrap_or(false)
}

/// Close a handle that has left the pool. If a caller still holds it, the
/// handle closes when that caller drops it.
fn release(path: &Path, conn: SharedConnection) {
    match Arc::try_unwrap(conn) {
        Ok(mutex) => close_quietly(path, mutex.into_inner()),
        Err(_) => tracing::debug!(
            path = %path.display(),
            "Connection still borrowed; it closes when released"
        ),
    }
}

fn close_quietly(path: &Path, conn: Connection) {
    match conn.close() {
        Ok(()) => tracing::info!(path = %path.display(), "Closed database connection"),
        Err((_, e)) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Ignoring error while closing connection"
            )
        }
    }
}
