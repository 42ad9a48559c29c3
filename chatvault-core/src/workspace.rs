//! Workspace identity resolution
//!
//! The editor namespaces per-workspace state under a directory named after a
//! digest of the workspace path. This module derives that digest, locates the
//! workspace's `state.vscdb`, and enumerates every workspace that has one.
//!
//! ## Identity
//!
//! ```text
//! /Users/Ada/Project/  ──canonicalize──►  /users/ada/project
//!                      ──sha256──────────► 9c1f…(64 hex)
//!                      ──truncate────────► 9c1f…(32 hex)  = workspace id
//! ```
//!
//! Canonicalization is lexical: the path does not need to exist, symlinks are
//! not followed, and the result is case-insensitive.

use crate::db::{validate_database_file, DATABASE_FILE_NAME};
use crate::error::{Error, Result};
use crate::platform::PlatformResolver;
use crate::types::WorkspaceInfo;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Length of a workspace id in hex characters
pub const WORKSPACE_ID_LEN: usize = 32;

/// Marker file the editor writes next to each workspace database
const WORKSPACE_MARKER: &str = "workspace.json";

// ============================================
// Host capability
// ============================================

/// Supplies the root directory of the workspace currently open in the host.
///
/// The core never asks the editor directly; the surrounding application
/// provides an implementation.
pub trait WorkspaceProvider: Send + Sync {
    /// Current workspace root, or `None` when no folder is open.
    fn workspace_root(&self) -> Option<PathBuf>;
}

/// A provider that always answers with the same (possibly absent) root.
#[derive(Debug, Clone, Default)]
pub struct FixedWorkspace(pub Option<PathBuf>);

impl FixedWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(Some(root.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl WorkspaceProvider for FixedWorkspace {
    fn workspace_root(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Treats the process working directory as the open workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentDirWorkspace;

impl WorkspaceProvider for CurrentDirWorkspace {
    fn workspace_root(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }
}

// ============================================
// Path canonicalization and hashing
// ============================================

fn looks_absolute(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    raw.starts_with('/')
        || raw.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Absolute, lexically normalized form of `path` with `/` separators and
/// no trailing separator. Case is preserved.
pub fn normalize_workspace_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let raw = if looks_absolute(&raw) {
        raw
    } else {
        match std::env::current_dir() {
            Ok(cwd) => format!("{}/{}", cwd.to_string_lossy().replace('\\', "/"), raw),
            Err(_) => raw,
        }
    };

    let rooted = raw.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                // Never pop a drive prefix
                if parts.last().is_some_and(|p| !p.ends_with(':')) {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Case-insensitive canonical form that is fed to the hash.
pub fn canonical_workspace_path(path: &Path) -> String {
    normalize_workspace_path(path).to_lowercase()
}

/// Deterministic 32-hex-character id for a workspace path.
pub fn workspace_id(path: &Path) -> String {
    let canonical = canonical_workspace_path(path);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(WORKSPACE_ID_LEN);
    id
}

/// Whether `id` has the shape of a workspace id.
pub fn is_workspace_id(id: &str) -> bool {
    id.len() == WORKSPACE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

// ============================================
// Resolver
// ============================================

/// Maps workspace paths to their databases, with a cache that is checked
/// against the file system on every hit.
pub struct WorkspaceResolver {
    platform: Arc<PlatformResolver>,
    cache: Mutex<HashMap<String, WorkspaceInfo>>,
}

impl WorkspaceResolver {
    pub fn new(platform: Arc<PlatformResolver>) -> Self {
        Self {
            platform,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, WorkspaceInfo>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a workspace directory to its database.
    ///
    /// Never fails: problems are reported through `is_valid` and `error`.
    pub async fn resolve(&self, workspace_path: &Path) -> WorkspaceInfo {
        let key = canonical_workspace_path(workspace_path);

        let cached = self.lock_cache().get(&key).cloned();
        if let Some(info) = cached {
            if tokio::fs::try_exists(&info.database_path)
                .await
                .unwrap_or(false)
            {
                tracing::debug!(workspace_id = %info.workspace_id, "Workspace cache hit");
                return info;
            }
            tracing::debug!(
                workspace_id = %info.workspace_id,
                "Cached workspace database vanished, re-resolving"
            );
            self.lock_cache().remove(&key);
        }

        let info = self.compute(workspace_path).await;
        if info.is_valid {
            self.lock_cache().insert(key, info.clone());
        }
        info
    }

    async fn compute(&self, workspace_path: &Path) -> WorkspaceInfo {
        let normalized = PathBuf::from(normalize_workspace_path(workspace_path));
        let id = workspace_id(workspace_path);

        let storage = match self.platform.storage_path().await {
            Ok(storage) => storage,
            Err(e) => {
                return WorkspaceInfo {
                    workspace_path: normalized,
                    workspace_id: id,
                    database_path: PathBuf::new(),
                    is_valid: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let database_path = storage.join(&id).join(DATABASE_FILE_NAME);
        let error = validate_database_file(&database_path)
            .await
            .err()
            .map(|e| e.to_string());

        WorkspaceInfo {
            workspace_path: normalized,
            workspace_id: id,
            database_path,
            is_valid: error.is_none(),
            error,
        }
    }

    /// Resolve the workspace the host reports as open.
    ///
    /// Fails when the host has no workspace; it never guesses one.
    pub async fn resolve_current(&self, provider: &dyn WorkspaceProvider) -> Result<WorkspaceInfo> {
        let root = provider
            .workspace_root()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Resolution("no workspace folder is open".to_string()))?;
        Ok(self.resolve(&root).await)
    }

    /// Look a workspace up by id alone. `None` when the id is malformed or
    /// its database is missing or invalid.
    pub async fn resolve_by_id(&self, id: &str) -> Option<WorkspaceInfo> {
        if !is_workspace_id(id) {
            return None;
        }
        let storage = self.platform.storage_path().await.ok()?;
        let dir = storage.join(id);
        let database_path = dir.join(DATABASE_FILE_NAME);
        validate_database_file(&database_path).await.ok()?;

        Some(WorkspaceInfo {
            workspace_path: read_workspace_marker(&dir).await.unwrap_or(dir),
            workspace_id: id.to_string(),
            database_path,
            is_valid: true,
            error: None,
        })
    }

    /// Every workspace under the storage root with a valid database, most
    /// recently modified first.
    pub async fn discover(&self) -> Result<Vec<WorkspaceInfo>> {
        let storage = self.platform.storage_path().await?;
        let pattern = format!(
            "{}/*/{}",
            glob::Pattern::escape(&storage.to_string_lossy()),
            DATABASE_FILE_NAME
        );

        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Resolution(format!("invalid discovery pattern: {}", e)))?;

        let mut found: Vec<(SystemTime, WorkspaceInfo)> = Vec::new();
        for database_path in entries.flatten() {
            let Some(dir) = database_path.parent().map(Path::to_path_buf) else {
                continue;
            };
            let id = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if let Err(e) = validate_database_file(&database_path).await {
                tracing::debug!(error = %e, "Skipping workspace during discovery");
                continue;
            }

            let modified = tokio::fs::metadata(&database_path)
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            found.push((
                modified,
                WorkspaceInfo {
                    workspace_path: read_workspace_marker(&dir).await.unwrap_or(dir),
                    workspace_id: id,
                    database_path,
                    is_valid: true,
                    error: None,
                },
            ));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0));
        tracing::debug!(count = found.len(), "Discovered workspaces");
        Ok(found.into_iter().map(|(_, info)| info).collect())
    }

    /// Drop every cached resolution.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }
}

/// Read the folder URI the editor recorded for a workspace directory.
async fn read_workspace_marker(dir: &Path) -> Option<PathBuf> {
    let content = tokio::fs::read_to_string(dir.join(WORKSPACE_MARKER))
        .await
        .ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    let uri = value
        .get("folder")
        .or_else(|| value.get("workspace"))?
        .as_str()?;
    folder_uri_to_path(uri)
}

/// `file:///c%3A/src/app` → `c:/src/app`, `file:///home/ada/app` → `/home/ada/app`
fn folder_uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    let decoded = urlencoding::decode(rest).ok()?.into_owned();
    let bytes = decoded.as_bytes();
    let path = if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' {
        decoded[1..].to_string()
    } else {
        decoded
    };
    Some(PathBuf::from(path))
}
