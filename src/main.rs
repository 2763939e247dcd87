//! Kit daemon - CLI entry point.
//!
//! This binary provides the command-line interface for the kit daemon. It
//! supports running in foreground or daemonized mode and managing the
//! configuration document.

use clap::{Parser, Subcommand};
use kit_daemon::config;
use kit_daemon::daemon::{self, DaemonOptions};
use kit_daemon::paths::PathRoots;
use std::process::ExitCode;

/// Supervision daemon for git-backed sub-applications
#[derive(Parser)]
#[command(name = "kitd")]
#[command(version, about = "Supervision daemon for git-backed sub-applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the kitd CLI
#[derive(Subcommand)]
enum Commands {
    /// Start the daemon process
    Daemon {
        /// Run as a background daemon (detached from terminal)
        #[arg(long)]
        daemonize: bool,
    },

    /// Manage the configuration document
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for the `config` subcommand.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the configuration document path
    Path,
    /// Create a default configuration document
    Init {
        /// Overwrite an existing document
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { daemonize } => {
            if let Err(e) = daemon::run(DaemonOptions { daemonize }) {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Commands::Config { action } => handle_config(action),
    }
}

fn handle_config(action: ConfigAction) -> ExitCode {
    let roots = match PathRoots::discover() {
        Ok(roots) => roots,
        Err(e) => {
            eprintln!("Error: cannot locate executable directory: {e}");
            return ExitCode::FAILURE;
        }
    };
    match action {
        ConfigAction::Path => {
            println!("{}", roots.exe_dir.join(config::CONFIG_FILE).display());
            ExitCode::SUCCESS
        }
        ConfigAction::Init { force } => match config::write_default(&roots.exe_dir, force) {
            Ok(path) => {
                println!("Created {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
