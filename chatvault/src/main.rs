//! chatvault - read editor chat sessions from workspace state databases
//!
//! Every command prints pretty JSON to stdout and exits non-zero when the
//! underlying operation failed.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/chatvault/config.toml (~/.config/chatvault/config.toml)
//! - Logs: $XDG_STATE_HOME/chatvault/chatvault.log (~/.local/state/chatvault/chatvault.log)

use anyhow::{Context, Result};
use chatvault_core::parser::parse_timestamp_str;
use chatvault_core::{
    Config, CurrentDirWorkspace, DatabaseReader, FixedWorkspace, QueryOptions, WorkspaceProvider,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "chatvault")]
#[command(about = "Read editor chat sessions from workspace state databases")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/chatvault/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory (default: current directory)
    #[arg(short, long, global = true, conflicts_with = "db")]
    workspace: Option<PathBuf>,

    /// Read this state database directly instead of resolving a workspace
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Workspace storage root, overriding platform detection
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Reject a session at its first invalid message
    #[arg(long, global = true)]
    strict: bool,

    /// Read without the circuit breaker
    #[arg(long, global = true)]
    no_breaker: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions
    Sessions {
        /// Sessions to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum sessions to print
        #[arg(long)]
        limit: Option<usize>,

        /// Include totals and the creation time range of the stored sessions
        #[arg(long)]
        metadata: bool,
    },

    /// Show one session by id
    Show {
        /// Session id (`id` or `sessionId`)
        id: String,
    },

    /// Sessions active at or after a date (RFC 3339 or YYYY-MM-DD)
    Since { date: String },

    /// List every workspace with a chat database, most recent first
    Workspaces,

    /// Show how a directory maps to its workspace database
    Resolve {
        /// Directory to resolve (default: workspace directory)
        dir: Option<PathBuf>,
    },

    /// Show health of every layer
    Health,

    /// Exercise every layer in order and report the first failure
    SelfTest,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    // Initialize logging (to file; stdout carries command output)
    let _log_guard =
        chatvault_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let reader = build_reader(&args, &config);
    tracing::debug!("chatvault starting");

    let result = run(&args, &reader).await;
    reader.dispose();

    let ok = result?;
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_reader(args: &Args, config: &Config) -> DatabaseReader {
    let mut reader_config = config.reader_config();
    if let Some(dir) = &args.storage_dir {
        reader_config.storage_dir = Some(dir.clone());
    }
    if args.strict {
        reader_config.parser.strict = true;
    }
    if args.no_breaker {
        reader_config.use_breaker = false;
    }

    match &args.db {
        Some(db) => DatabaseReader::for_database(reader_config, db.clone()),
        None => DatabaseReader::new(reader_config, workspace_provider(args)),
    }
}

fn workspace_provider(args: &Args) -> Box<dyn WorkspaceProvider> {
    match &args.workspace {
        Some(dir) => Box::new(FixedWorkspace::new(dir.clone())),
        None => Box::new(CurrentDirWorkspace),
    }
}

/// Run the selected command, returning whether it succeeded.
async fn run(args: &Args, reader: &DatabaseReader) -> Result<bool> {
    match &args.command {
        Command::Sessions {
            offset,
            limit,
            metadata,
        } => {
            let options = QueryOptions {
                offset: *offset,
                limit: *limit,
                include_metadata: *metadata,
            };
            let result = reader.get_sessions_page(&options).await;
            print_json(&result)?;
            Ok(result.success)
        }
        Command::Show { id } => {
            let result = reader.get_session_by_id(id).await;
            print_json(&result)?;
            Ok(result.success)
        }
        Command::Since { date } => {
            let since = parse_timestamp_str(date).with_context(|| {
                format!("unrecognized date '{}'; use RFC 3339 or YYYY-MM-DD", date)
            })?;
            let result = reader.get_sessions_since(since).await;
            print_json(&result)?;
            Ok(result.success)
        }
        Command::Workspaces => {
            let workspaces = reader
                .discover_workspaces()
                .await
                .context("failed to discover workspaces")?;
            print_json(&workspaces)?;
            Ok(true)
        }
        Command::Resolve { dir } => {
            let dir = match dir.clone().or_else(|| workspace_provider(args).workspace_root()) {
                Some(dir) => dir,
                None => anyhow::bail!("no directory given and no current directory available"),
            };
            let info = reader.resolve_workspace(&dir).await;
            print_json(&info)?;
            Ok(info.is_valid)
        }
        Command::Health => {
            print_json(&reader.health().await)?;
            Ok(true)
        }
        Command::SelfTest => {
            let report = reader.self_test().await;
            print_json(&report)?;
            Ok(report.success)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{}", rendered);
    Ok(())
}
