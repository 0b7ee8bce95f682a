//! `replaygram`: inspects story catalogs and replays headless feed sessions.

mod bridge;
mod simulate;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use engine::{CatalogProvider, EngineConfig, FeedDataProvider};
use tracing_subscriber::EnvFilter;

use simulate::SimulationOptions;

#[derive(Parser)]
#[command(name = "replaygram")]
#[command(about = "Branching short-video feed engine")]
#[command(version)]
struct Cli {
    /// Log engine decisions at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the feed's entry-point record ids
    Entries {
        /// JSON catalog file; the built-in sample story when omitted
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// JSON engine config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print one validated record as JSON
    Inspect {
        /// Record id or storage path
        record: String,

        #[arg(long)]
        catalog: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Replay a headless feed session and print every engine event
    Simulate {
        #[arg(long)]
        catalog: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Branch index to pick when prompts appear (repeatable, used in order)
        #[arg(long = "choose")]
        choices: Vec<usize>,

        /// Simulated playback length in seconds
        #[arg(long, default_value = "12")]
        seconds: f64,

        /// Playback sampling step in milliseconds
        #[arg(long, default_value = "250")]
        step_ms: u64,

        /// Scroll to the second item after this many seconds
        #[arg(long)]
        scroll_after: Option<f64>,

        /// Signed-in viewer id
        #[arg(long)]
        viewer: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Entries { catalog, config } => {
            let config = load_config(config.as_deref())?;
            let catalog = load_catalog(catalog.as_deref(), &config)?;
            let mut stdout = io::stdout().lock();
            for record_id in catalog.list_entry_points()? {
                writeln!(stdout, "{record_id}")?;
            }
        }

        Commands::Inspect {
            record,
            catalog,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let catalog = load_catalog(catalog.as_deref(), &config)?;
            let record = catalog
                .get_record(&record)
                .with_context(|| format!("load record {record:?}"))?;
            let json = serde_json::to_string_pretty(&record).context("serialize record")?;
            println!("{json}");
        }

        Commands::Simulate {
            catalog,
            config,
            choices,
            seconds,
            step_ms,
            scroll_after,
            viewer,
        } => {
            if step_ms == 0 {
                bail!("--step-ms must be positive");
            }
            let config = load_config(config.as_deref())?;
            let catalog = load_catalog(catalog.as_deref(), &config)?;
            let options = SimulationOptions {
                seconds,
                step: Duration::from_millis(step_ms),
                choices,
                scroll_after,
                viewer,
            };
            let mut stdout = io::stdout().lock();
            simulate::run(catalog, &config, options, &mut stdout)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_catalog(path: Option<&Path>, config: &EngineConfig) -> Result<CatalogProvider> {
    match path {
        Some(path) => CatalogProvider::from_json_file(path, config)
            .with_context(|| format!("load catalog {}", path.display())),
        None => CatalogProvider::seeded(config).context("seed sample catalog"),
    }
}
