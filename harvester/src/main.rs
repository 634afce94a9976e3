//! Checkpointed scrape-and-store controller.
//!
//! Meant to be invoked by an external scheduler (cron, systemd timer). Each
//! `harvester run` performs exactly one cycle and records its outcome under
//! `.harvester/` in the deployment root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvester::cycle::{CycleOptions, EnvironmentError, ensure_layout, is_environment_error, run_cycle};
use harvester::exit_codes;
use harvester::io::agent::CommandAgent;
use harvester::io::checkpoint_store::CheckpointStore;
use harvester::io::config::{HarvesterConfig, load_config, write_config};
use harvester::io::paths::HarvestPaths;
use harvester::io::retry::ThreadSleeper;
use harvester::logging;
use tracing::error;

const AGENT_CONFIG_PLACEHOLDER: &str = "{}\n";

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Checkpointed scrape-and-store controller"
)]
struct Cli {
    /// Deployment root containing `.harvester/`.
    #[arg(long, env = "HARVESTER_ROOT", default_value = ".", global = true)]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scrape-and-store cycle.
    Run {
        /// Run even if the checkpoint reports a healthy system.
        #[arg(short, long)]
        force: bool,
    },
    /// Create `.harvester/` with a default config if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the current checkpoint as JSON.
    Status,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            if is_environment_error(&err) {
                error!(err = %format!("{err:#}"), "cycle not started");
            }
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = HarvestPaths::new(cli.root);
    match cli.command {
        Command::Run { force } => cmd_run(&paths, force),
        Command::Init { force } => cmd_init(&paths, force),
        Command::Status => cmd_status(&paths),
    }
}

fn cmd_run(paths: &HarvestPaths, force: bool) -> Result<i32> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create {}", paths.logs_dir.display()))?;
    logging::init(Some(&paths.system_log_path))?;

    let cfg = load_config(&paths.config_path).context(EnvironmentError)?;
    let agent = CommandAgent::from_config(&cfg.agent, paths);
    let report = run_cycle(paths, &cfg, &agent, &mut ThreadSleeper, CycleOptions { force })?;

    let session = report
        .session_path
        .as_deref()
        .map_or_else(|| "-".to_string(), |path| path.display().to_string());
    println!(
        "{} attempts={} storage={} session={}",
        if report.success() { "success" } else { "failure" },
        report.outcome.attempts,
        report.outcome.storage,
        session
    );
    Ok(exit_codes::OK)
}

fn cmd_init(paths: &HarvestPaths, force: bool) -> Result<i32> {
    logging::init(None)?;
    ensure_layout(paths)?;
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create {}", paths.logs_dir.display()))?;

    let cfg = if force || !paths.config_path.exists() {
        let cfg = HarvesterConfig::default();
        write_config(&paths.config_path, &cfg)
            .with_context(|| format!("write {}", paths.config_path.display()))?;
        cfg
    } else {
        load_config(&paths.config_path)?
    };

    let agent_config = paths.resolve(&cfg.agent.config_path);
    write_if_missing(&agent_config, AGENT_CONFIG_PLACEHOLDER)?;

    println!("{}", paths.harvester_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &HarvestPaths) -> Result<i32> {
    logging::init(None)?;
    let checkpoint = CheckpointStore::new(&paths.checkpoint_path).load();
    let json = serde_json::to_string_pretty(&checkpoint).context("serialize checkpoint")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
