//! feedback-loop: command line side of the feedback rendezvous.
//!
//! ## Subcommands
//!
//! - `ask`: Publish a request and block until a human answers it
//! - `listen`: Prompt for pending requests in this terminal
//! - `respond`: Answer a request by id
//! - `list`, `sweep`, `purge`: Inspect and maintain the shared directory

mod admin;
mod ask;
mod listen;
mod logging;
mod respond;
mod signals;

use clap::{Parser, Subcommand};
use loop_core::{LoopConfig, StorageConfig, StorageScope};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "feedback-loop")]
#[command(about = "Hand decisions from a command-line agent to a human and wait for the answer")]
#[command(version)]
struct Cli {
    /// Shared directory to use (overrides FEEDBACK_LOOP_ROOT)
    #[arg(long, value_name = "DIR", conflicts_with = "project")]
    root: Option<PathBuf>,

    /// Use `<DIR>/.feedback-loop` instead of the per-user directory
    #[arg(long, value_name = "DIR")]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a request and wait for the response
    Ask(ask::AskArgs),

    /// Listen for requests and prompt in this terminal
    Listen {
        /// Only handle requests for projects under these directories
        #[arg(long = "workspace", value_name = "DIR")]
        workspaces: Vec<PathBuf>,

        /// Run a single poll and exit
        #[arg(long)]
        once: bool,
    },

    /// Write the response for a request
    Respond(respond::RespondArgs),

    /// Show pending requests
    List,

    /// Remove stale and orphaned locks
    Sweep,

    /// Delete a request, its response, its images and its lock
    Purge {
        #[arg(value_name = "ID")]
        id: String,
    },
}

impl Cli {
    fn storage(&self) -> Result<StorageConfig, String> {
        if let Some(root) = &self.root {
            return Ok(StorageConfig::with_root(root.clone()));
        }
        let scope = match &self.project {
            Some(project) => StorageScope::Project(project.clone()),
            None => StorageScope::Home,
        };
        StorageConfig::resolve(&scope).map_err(String::from)
    }
}

fn main() {
    let cli = Cli::parse();

    let storage = match cli.storage() {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("feedback-loop: {}", e);
            std::process::exit(1);
        }
    };

    let interactive = matches!(cli.command, Commands::Listen { .. });
    let _logging_guard = logging::init(&storage.logs_dir(), interactive);

    let config = LoopConfig::load(&storage.config_file()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Using default configuration");
        LoopConfig::default()
    });

    let result = match cli.command {
        Commands::Ask(args) => ask::run(&storage, &config, args),
        Commands::Listen { workspaces, once } => listen::run(&storage, &config, &workspaces, once),
        Commands::Respond(args) => respond::run(&storage, args),
        Commands::List => admin::list(&storage),
        Commands::Sweep => admin::sweep(&storage, &config),
        Commands::Purge { id } => admin::purge(&storage, &config, &id),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "feedback-loop failed");
        eprintln!("feedback-loop: {}", e);
        std::process::exit(1);
    }
}
