//! spool - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use spool::demo;
use spool::runtime::{Runtime, Snapshot};
use spool::util::config::{load_config, RuntimeConfig, SnapshotFormat};
use spool::util::logger::{self, LogLevel};
use spool::vm::Interpreter;
use spool::{NAME, VERSION};

/// Persistable cooperative script threads
#[derive(Parser, Debug)]
#[command(name = "spool")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Runtime configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the built-in counter demo
    Demo {
        /// Number of ticks to run
        #[arg(short, long, default_value_t = 5)]
        ticks: u32,

        /// Write a snapshot here afterwards
        #[arg(short, long, value_name = "FILE")]
        save: Option<PathBuf>,
    },

    /// Load a snapshot and keep ticking
    Resume {
        /// Snapshot to load
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,

        /// Number of ticks to run
        #[arg(short, long, default_value_t = 5)]
        ticks: u32,

        /// Write a snapshot here afterwards
        #[arg(short, long, value_name = "FILE")]
        save: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_with_level(LogLevel::from_verbosity(args.verbose));

    let config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    match args.command {
        Commands::Demo { ticks, save } => {
            let mut runtime = Runtime::with_config(config);
            demo::install(&mut runtime).context("Failed to start demo threads")?;
            run_ticks(&mut runtime, ticks);
            if let Some(path) = save {
                save_snapshot(&runtime, &path)?;
            }
        }
        Commands::Resume { snapshot, ticks, save } => {
            let text = std::fs::read_to_string(&snapshot)
                .with_context(|| format!("Failed to read snapshot: {}", snapshot.display()))?;
            let format = format_for(&snapshot, config.snapshot_format);
            let decoded = Snapshot::decode(format, &text)
                .with_context(|| format!("Failed to decode snapshot: {}", snapshot.display()))?;
            let mut runtime = Runtime::load(&decoded, demo::natives(), config, Rc::new(Interpreter::new()))
                .context("Failed to restore snapshot")?;
            run_ticks(&mut runtime, ticks);
            if let Some(path) = save {
                save_snapshot(&runtime, &path)?;
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn run_ticks(
    runtime: &mut Runtime,
    ticks: u32,
) {
    for tick in 0..ticks {
        let report = runtime.update();
        tracing::debug!(tick, changed = report.changed, "tick done");
        for err in &report.errors {
            eprintln!("tick {}: {}", tick, err);
        }
    }
}

fn save_snapshot(
    runtime: &Runtime,
    path: &Path,
) -> Result<()> {
    let format = format_for(path, runtime.config().snapshot_format);
    let text = runtime
        .save()
        .and_then(|snapshot| snapshot.encode(format))
        .context("Failed to save snapshot")?;
    std::fs::write(path, text).with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
    eprintln!("Saved snapshot to {}", path.display());
    Ok(())
}

/// `.json` files are JSON; anything else uses the configured format
fn format_for(
    path: &Path,
    configured: SnapshotFormat,
) -> SnapshotFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => SnapshotFormat::Json,
        Some("ron") => SnapshotFormat::Ron,
        _ => configured,
    }
}
