use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Level};
use tracing_subscriber::{fmt, EnvFilter};

mod app;
mod auth;
mod config;
mod error;
mod models;
mod session;
mod ssh_service;
mod transfer;

use app::App;
use config::ConfigManager;

#[derive(Debug, Parser)]
#[command(
    name = "autossh",
    version,
    about = "Log in to and copy files from the servers in your config",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Config file (JSON, or TOML by extension)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Server id or alias to connect to
    #[arg(value_name = "ID")]
    target: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured servers
    List {
        /// Only servers whose name, alias, host or user contains this
        filter: Option<String>,
    },
    /// Open an interactive shell
    Connect {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Copy files, remote paths written as ID:PATH
    Cp {
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Sources followed by the target; a lone source goes to the temp dir
        #[arg(value_name = "PATH", required = true, num_args = 1..)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config_manager = ConfigManager::new(cli.config)?;
    init_logging(config_manager.config_dir())?;
    debug!("Starting with config {}", config_manager.config_path().display());

    let app = App::new(config_manager)?;
    match (cli.command, cli.target) {
        (Some(Command::List { filter }), _) => {
            app.list(filter.as_deref());
            Ok(true)
        }
        (Some(Command::Connect { id }), _) | (None, Some(id)) => {
            connect(&app, &id).await?;
            Ok(true)
        }
        (Some(Command::Cp { recursive, paths }), _) => app.copy(&paths, recursive).await,
        (None, None) => {
            app.list(None);
            Ok(true)
        }
    }
}

fn init_logging(base: &Path) -> Result<()> {
    let log_dir = base.join("logs");
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    }

    let log_file = log_dir.join(format!(
        "autossh_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = File::create(&log_file)
        .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

    fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(EnvFilter::from_default_env().add_directive("autossh=debug".parse()?))
        .with_ansi(false)
        .with_writer(file)
        .init();

    Ok(())
}

async fn connect(app: &App, id: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));
    let result = app.connect(id, cancel).await;
    watcher.abort();
    result
}

/// Ctrl-C or SIGTERM from outside ends the session through its normal
/// teardown. Inside the session Ctrl-C is a keystroke for the remote side.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    debug!("Termination signal received");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_id_and_subcommands() {
        let cli = Cli::try_parse_from(["autossh", "3"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.target.as_deref(), Some("3"));

        let cli = Cli::try_parse_from(["autossh", "-c", "my.json", "connect", "web"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("my.json")));
        assert!(matches!(cli.command, Some(Command::Connect { ref id }) if id == "web"));

        let cli = Cli::try_parse_from(["autossh", "cp", "-r", "dir", "db:/srv"]).unwrap();
        match cli.command {
            Some(Command::Cp { recursive, paths }) => {
                assert!(recursive);
                assert_eq!(paths, vec!["dir", "db:/srv"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Cli::try_parse_from(["autossh", "cp"]).is_err());
    }
}
