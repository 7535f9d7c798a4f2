//! # websync
//!
//! Command-line front end for the websync library.
//!
//! - `websync clone <url> <path>` resets `<path>` and clones into it
//! - `websync pull <path>` pulls the configured branch
//! - `websync add <path> <file>...` / `websync rm <path> <file>...` stage changes
//! - `websync push <path> -m <msg>` commits what is staged and pushes it
//! - `websync status <path>` prints HEAD
//! - `websync home` prints the directory holding `config.toml`
//!
//! Every command except `clone` opens the checkout, which pulls first.
//! Logging goes to stderr and is controlled by `RUST_LOG`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use websync::{cmd_add, cmd_clone, cmd_pull, cmd_push, cmd_rm, cmd_status, load_config, paths};

/// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(
    name = "websync",
    version,
    about = "websync - keep a local directory in sync with a remote git repository",
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (default: $(websync home)/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Reset a directory and clone the remote into it
    Clone { url: String, path: PathBuf },
    /// Fetch and integrate the remote branch
    Pull { path: PathBuf },
    /// Stage files for the next commit
    Add {
        path: PathBuf,
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Remove files from the index and working tree
    Rm {
        path: PathBuf,
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Commit staged changes and push them
    Push {
        path: PathBuf,
        #[arg(short, long)]
        message: String,
    },
    /// Print the current HEAD commit
    Status { path: PathBuf },
    /// Print the websync config directory
    Home,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("websync=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = || load_config(cli.config.as_deref());

    match cli.cmd {
        Cmd::Clone { url, path } => cmd_clone(&url, &path, config()?),
        Cmd::Pull { path } => cmd_pull(&path, config()?),
        Cmd::Add { path, files } => cmd_add(&path, &files, config()?),
        Cmd::Rm { path, files } => cmd_rm(&path, &files, config()?),
        Cmd::Push { path, message } => cmd_push(&path, &message, config()?),
        Cmd::Status { path } => cmd_status(&path, config()?),
        Cmd::Home => {
            println!("{}", paths()?.home.display());
            Ok(())
        }
    }
}
