//! Database layer for chatvault
//!
//! This module provides read-only access to the editor's per-workspace
//! SQLite store:
//! - File validation (signature check before any open attempt)
//! - Connection pooling with per-path throttling
//! - The single session lookup against the key/value table

pub mod connection;
pub mod query;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStats, SharedConnection};
pub use query::{
    Pagination, QueryMetadata, QueryOptions, QueryResult, QueryStats, SessionQuery, SESSIONS_KEY,
};

use crate::error::{Error, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Every SQLite 3 file starts with this ASCII text (followed by a NUL byte).
pub const SQLITE_SIGNATURE: &[u8; 15] = b"SQLite format 3";

/// Name of the per-workspace database inside `<storage root>/<workspace id>/`
pub const DATABASE_FILE_NAME: &str = "state.vscdb";

/// Check that `path` is an existing, readable, regular file carrying the
/// SQLite signature.
///
/// Returns the file size on success.
pub async fn validate_database_file(path: &Path) -> Result<u64> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::invalid_database(path, "file does not exist"));
        }
        Err(e) => return Err(Error::invalid_database(path, format!("cannot stat: {}", e))),
    };

    if !meta.is_file() {
        return Err(Error::invalid_database(path, "not a regular file"));
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::invalid_database(path, format!("not readable: {}", e)))?;

    let mut header = [0u8; 15];
    if file.read_exact(&mut header).await.is_err() {
        return Err(Error::invalid_database(
            path,
            "file is shorter than the SQLite header",
        ));
    }
    if &header != SQLITE_SIGNATURE {
        return Err(Error::invalid_database(path, "missing SQLite signature"));
    }

    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_validate_real_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE_NAME);
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE ItemTable (key TEXT UNIQUE, value BLOB);")
            .unwrap();
        drop(conn);

        let size = validate_database_file(&path).await.unwrap();
        assert!(size > 0);
    }

    #[tokio::test]
    async fn test_validate_wrong_signature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE_NAME);
        std::fs::write(&path, b"NotASQLiteFile!\0 and some more bytes").unwrap();

        let err = validate_database_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("missing SQLite signature"));
    }

    #[tokio::test]
    async fn test_validate_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE_NAME);
        std::fs::write(&path, b"SQLite").unwrap();

        let err = validate_database_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("shorter"));
    }

    #[tokio::test]
    async fn test_validate_missing_and_directory() {
        let dir = TempDir::new().unwrap();

        let missing = validate_database_file(&dir.path().join("nope.vscdb"))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("does not exist"));

        let not_file = validate_database_file(dir.path()).await.unwrap_err();
        assert!(not_file.to_string().contains("not a regular file"));
    }
}
