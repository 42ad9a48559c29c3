//! # chatvault-core
//!
//! Core library for chatvault - a reader for the chat history an editor keeps
//! in its per-workspace SQLite state database.
//!
//! This library provides:
//! - Platform detection of the editor's workspace storage root
//! - Workspace identity resolution (path → workspace id → database file)
//! - Read-only connection pooling with per-path throttling
//! - A circuit breaker with bounded retry and backoff
//! - A validating parser for the stored session JSON
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through five stages:
//! - **Identity:** workspace directory → 32-hex id → `<storage>/<id>/state.vscdb`
//! - **Connection:** validated, pooled, read-only handle per database
//! - **Query:** the `interactive.sessions` value from `ItemTable`
//! - **Parse:** untyped JSON → [`ParsedSession`] records
//! - **Facade:** [`DatabaseReader`] composes the above behind the breaker
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatvault_core::{Config, CurrentDirWorkspace, DatabaseReader};
//!
//! # async fn run() -> chatvault_core::Result<()> {
//! let config = Config::load()?;
//! let reader = DatabaseReader::from_config(&config, Box::new(CurrentDirWorkspace))?;
//!
//! let result = reader.get_sessions().await;
//! for session in &result.sessions {
//!     println!("{}: {} messages", session.id, session.messages.len());
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::Config;
pub use db::{ConnectionConfig, ConnectionManager, QueryOptions, SessionQuery};
pub use error::{Error, Result};
pub use parser::{ParseReport, ParserConfig, SessionParser};
pub use platform::PlatformResolver;
pub use reader::{DatabaseReader, HealthSnapshot, ReadResult, ReaderConfig, SelfTestReport};
pub use types::*;
pub use workspace::{
    workspace_id, CurrentDirWorkspace, FixedWorkspace, WorkspaceProvider, WorkspaceResolver,
};

// Public modules
pub mod breaker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod parser;
pub mod platform;
pub mod reader;
pub mod types;
pub mod workspace;
