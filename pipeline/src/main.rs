//! Offline checks for pipeline configuration and replay files.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use pipeline::exit_codes;
use pipeline::io::config::load_config;
use pipeline::io::replay_file::load_replay;
use pipeline::logging;
use pipeline::schedule::replay::render_outline;

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Constraint-driven pipeline planner and execution engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a configuration file and check it for invalid values.
    ValidateConfig {
        /// Path to the TOML configuration.
        path: PathBuf,
    },
    /// Parse a replay file and print its normalized outline.
    CheckReplay {
        /// Path to the replay file.
        path: PathBuf,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::ValidateConfig { path } => cmd_validate_config(&path),
        Command::CheckReplay { path } => cmd_check_replay(&path),
    }
}

fn cmd_validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("config file {} does not exist", path.display());
    }
    let cfg = load_config(path)?;
    println!(
        "ok: planner {:?}, engine {:?} with {} worker(s)",
        cfg.planner,
        cfg.engine.kind,
        cfg.engine.worker_count()
    );
    Ok(())
}

fn cmd_check_replay(path: &Path) -> Result<()> {
    let entries = load_replay(path)?;
    print!("{}", render_outline(&entries));
    Ok(())
}
