//! Core domain types for chatvault
//!
//! These types are the strict internal records produced by the access
//! pipeline. Raw session JSON from the editor never leaves the parser
//! untyped; everything downstream works with [`ParsedSession`].
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Workspace** | A project root directory as the editor understands it |
//! | **Workspace id** | 32-hex-character digest of the canonical workspace path |
//! | **Storage root** | Directory holding one `<workspace id>/` folder per workspace |
//! | **Session** | One recorded conversation made of ordered user/assistant messages |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================
// Platform
// ============================================

/// Operating systems the editor stores workspace state for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "darwin")]
    MacOs,
    #[serde(rename = "win32")]
    Windows,
    #[serde(rename = "linux")]
    Linux,
}

impl Platform {
    /// Short tag used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::MacOs => "darwin",
            Platform::Windows => "win32",
            Platform::Linux => "linux",
        }
    }

    /// Map a `std::env::consts::OS` value to a supported platform.
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "macos" => Some(Platform::MacOs),
            "windows" => Some(Platform::Windows),
            "linux" => Some(Platform::Linux),
            _ => None,
        }
    }

    pub fn separator(&self) -> char {
        match self {
            Platform::Windows => '\\',
            Platform::MacOs | Platform::Linux => '/',
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the editor keeps per-workspace state on this machine.
///
/// Computed once per [`PlatformResolver`](crate::platform::PlatformResolver)
/// and cached until `reset_cache()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformConfig {
    /// Platform tag
    pub platform: Platform,
    /// Editor installation folder, e.g. `~/.config/Code`
    pub base_storage_dir: PathBuf,
    /// `<base>/User/workspaceStorage`
    pub workspace_storage_dir: PathBuf,
    /// Native path separator
    pub separator: char,
}

// ============================================
// Workspace
// ============================================

/// Result of resolving a workspace directory to its database file.
///
/// Resolution failures are carried in `is_valid`/`error` rather than returned
/// as errors so callers can display what was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceInfo {
    /// Absolute workspace directory
    pub workspace_path: PathBuf,
    /// Lowercase hex digest of the canonical path (32 chars)
    pub workspace_id: String,
    /// `<storage root>/<workspace id>/state.vscdb`
    pub database_path: PathBuf,
    /// Whether the database file exists and carries the SQLite signature
    pub is_valid: bool,
    /// Why the database is not usable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================
// Sessions
// ============================================

/// Author of a message. Only these two roles are accepted from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unsupported role: {}", s)),
        }
    }
}

/// A validated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedMessage {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds, absent when missing or unparseable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A validated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSession {
    /// Never empty. Synthesized ids have the form `session-<epoch ms>-<index>`.
    pub id: String,
    pub messages: Vec<ParsedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ParsedSession {
    /// Aggregate counts, recomputed from `messages` on every call.
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata::from_messages(&self.messages)
    }

    /// Best recency marker: last modification, else creation.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_modified.or(self.created_at)
    }
}

/// Derived statistics for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub message_count: usize,
    pub total_characters: usize,
    pub user_message_count: usize,
    pub assistant_message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
}

impl SessionMetadata {
    pub fn from_messages(messages: &[ParsedMessage]) -> Self {
        let mut meta = SessionMetadata {
            message_count: messages.len(),
            ..Default::default()
        };

        for message in messages {
            meta.total_characters += message.content.chars().count();
            match message.role {
                Role::User => meta.user_message_count += 1,
                Role::Assistant => meta.assistant_message_count += 1,
            }
            if let Some(ts) = message.timestamp {
                meta.first_message_at = Some(meta.first_message_at.map_or(ts, |t| t.min(ts)));
                meta.last_message_at = Some(meta.last_message_at.map_or(ts, |t| t.max(ts)));
            }
        }

        meta
    }
}
