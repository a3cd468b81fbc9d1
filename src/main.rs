//! repodoc - incremental documentation for source trees
//!
//! Entry point for the `repodoc` command.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use repodoc::config::CONFIG_FILE_NAME;
use repodoc::generation::build_generator;
use repodoc::hierarchy::find;
use repodoc::observability::init_tracing;
use repodoc::{Config, Engine};
use tokio::signal;

/// Keep generated documentation in sync with a source tree
#[derive(Parser, Debug)]
#[command(name = "repodoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository root to document
    #[arg(short, long, env = "REPODOC_ROOT")]
    root: Option<PathBuf>,

    /// Configuration file (defaults to repodoc.toml in the root)
    #[arg(short, long, env = "REPODOC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REPODOC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging output
    #[arg(long, env = "REPODOC_LOG_JSON")]
    json_logs: bool,

    /// Use an offline placeholder generator instead of the network backend
    #[arg(long, env = "REPODOC_DRY_RUN")]
    dry_run: bool,

    /// Maximum concurrent generation jobs
    #[arg(long, env = "REPODOC_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Caller levels invalidated by a change
    #[arg(long, env = "REPODOC_PROPAGATION_DEPTH")]
    propagation_depth: Option<usize>,

    /// Model passed to the generation backend
    #[arg(long, env = "REPODOC_MODEL")]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible backend
    #[arg(long, env = "REPODOC_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Scan the tree and regenerate stale documentation (default)
    Update,
    /// Show what is stale without generating anything
    Status,
    /// Print the stored record of the first entity with this name
    Lookup {
        /// Entity name to search for
        name: String,
    },
    /// Update now and again whenever a source file changes
    Watch,
}

impl Cli {
    /// Defaults, then the TOML file, then flags and environment.
    fn load_config(&self) -> anyhow::Result<Config> {
        let root = self.root.clone().unwrap_or_else(|| PathBuf::from("."));
        let file = self
            .config
            .clone()
            .or_else(|| Some(root.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()));

        let mut config = match &file {
            Some(path) => Config::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };
        if self.root.is_some() || file.is_none() {
            config.repo_root = root;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if let Some(depth) = self.propagation_depth {
            config.propagation_depth = depth;
        }
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if let Some(base_url) = &self.base_url {
            config.base_url.clone_from(base_url);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_tracing(&config.log_level, cli.json_logs);
    tracing::debug!(?config, "Configuration loaded");

    let command = cli.command.clone().unwrap_or(Command::Update);
    if let Command::Lookup { name } = &command {
        return lookup(&config, name);
    }

    let generator = build_generator(&config, cli.dry_run || command == Command::Status)
        .context("configuring generation backend")?;
    let engine = Engine::new(config, generator).context("invalid configuration")?;

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    tracing::info!(
        root = %engine.config().repo_root.display(),
        "repodoc v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    match command {
        Command::Update => {
            let summary = engine.scan_and_update().await.context("update failed")?;
            print!("{summary}");
            Ok(if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status => {
            let report = engine.status().await.context("status failed")?;
            print!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch => {
            engine.watch().await.context("watch failed")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Lookup { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn lookup(config: &Config, name: &str) -> anyhow::Result<ExitCode> {
    let store = repodoc::hierarchy::HierarchyStore::new(config.hierarchy_path());
    let document = store
        .load_document()
        .context("reading hierarchy")?
        .context("no hierarchy found; run `repodoc update` first")?;

    match find(&document, name) {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(record)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("no entity named '{name}'");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping after in-flight jobs");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping after in-flight jobs");
        }
    }
}
