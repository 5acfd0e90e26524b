//! Candlefold CLI: ingest daily bars and inspect the store.
//!
//! Commands:
//! - `ingest`: fetch, normalize, resample and write every instrument
//! - `store status`: list stored partitions with their date ranges

use anyhow::{Context, Result};
use candlefold_core::data::{
    load_instruments, CircuitBreaker, DataProvider, InstrumentList, SyntheticProvider,
    YahooProvider,
};
use candlefold_core::sink::{BarSink, MemorySink, ParquetStore, WriteMode};
use candlefold_runner::{Pipeline, PipelineConfig, RunSummary};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "candlefold",
    about = "Candlefold: daily OHLCV ingestion and multi-timeframe resampling"
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch daily bars for every instrument and write all timeframes.
    Ingest {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Instrument list (CSV with a Ticker column, or TOML).
        #[arg(long)]
        instruments: Option<PathBuf>,

        /// Exchange suffix appended to bare symbols (e.g. JK).
        #[arg(long)]
        suffix: Option<String>,

        /// Store root directory.
        #[arg(long)]
        store: Option<PathBuf>,

        /// Worker threads.
        #[arg(long)]
        workers: Option<usize>,

        /// Instruments per batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Append instead of upserting on (instrument, timeframe, date).
        #[arg(long, default_value_t = false)]
        append: bool,

        /// Use deterministic synthetic data instead of Yahoo Finance.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Run the whole pipeline but keep records in memory.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Write the run summary as JSON to this path.
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },
    /// Store inspection commands.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// List stored partitions, row counts and date ranges.
    Status {
        /// Store root directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        store: PathBuf,
    },
}

/// Everything `ingest` takes from the command line.
struct IngestArgs {
    config: Option<PathBuf>,
    instruments: Option<PathBuf>,
    suffix: Option<String>,
    store: Option<PathBuf>,
    workers: Option<usize>,
    batch_size: Option<usize>,
    append: bool,
    synthetic: bool,
    dry_run: bool,
    summary_json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Ingest {
            config,
            instruments,
            suffix,
            store,
            workers,
            batch_size,
            append,
            synthetic,
            dry_run,
            summary_json,
        } => run_ingest(IngestArgs {
            config,
            instruments,
            suffix,
            store,
            workers,
            batch_size,
            append,
            synthetic,
            dry_run,
            summary_json,
        }),
        Commands::Store { action } => match action {
            StoreAction::Status { store } => run_store_status(&store),
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &IngestArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(path) = &args.instruments {
        config.instruments_file = Some(path.clone());
    }
    if let Some(suffix) = &args.suffix {
        config.exchange_suffix = Some(suffix.clone());
    }
    if let Some(root) = &args.store {
        config.store.root = root.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if args.append {
        config.store.write_mode = WriteMode::Append;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// The configured instrument list, or the built-in list when it is missing
/// or unreadable.
fn resolve_instruments(config: &PipelineConfig) -> InstrumentList {
    let suffix = config.exchange_suffix.as_deref();
    let Some(path) = &config.instruments_file else {
        info!("no instrument file configured, using built-in list");
        return InstrumentList::fallback(suffix);
    };

    match load_instruments(path, suffix) {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => {
            warn!(path = %path.display(), "instrument file is empty, using built-in list");
            InstrumentList::fallback(suffix)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read instrument file, using built-in list");
            InstrumentList::fallback(suffix)
        }
    }
}

fn run_ingest(args: IngestArgs) -> Result<()> {
    let config = load_config(&args)?;
    let instruments: Vec<String> = resolve_instruments(&config)
        .iter()
        .map(str::to_string)
        .collect();

    let provider: Box<dyn DataProvider> = if args.synthetic {
        Box::new(SyntheticProvider::new())
    } else {
        let circuit_breaker = Arc::new(CircuitBreaker::default_provider());
        Box::new(YahooProvider::new(circuit_breaker).context("building Yahoo Finance client")?)
    };

    let mode = config.store.write_mode;
    let sink: Box<dyn BarSink> = if args.dry_run {
        Box::new(MemorySink::new(mode))
    } else {
        Box::new(ParquetStore::new(&config.store.root, mode))
    };

    let summary = Pipeline::new(provider.as_ref(), sink.as_ref(), config)
        .run(&instruments)
        .context("ingestion run failed to start")?;

    print_summary(&summary, args.dry_run);

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary).context("serializing run summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        println!("Summary written to: {}", path.display());
    }

    if summary.total > 0 && summary.successful == 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!();
    println!("=== Ingestion Summary ===");
    println!("{summary}");
    if dry_run {
        println!();
        println!("Dry run: nothing was written to the store.");
    }
    println!();
}

fn run_store_status(root: &Path) -> Result<()> {
    if !root.exists() {
        println!("Store directory does not exist: {}", root.display());
        return Ok(());
    }

    let store = ParquetStore::new(root, WriteMode::default());
    let partitions = store
        .status()
        .with_context(|| format!("scanning store {}", root.display()))?;

    if partitions.is_empty() {
        println!("Store is empty: {}", root.display());
        return Ok(());
    }

    let total_rows: usize = partitions
        .iter()
        .filter_map(|p| p.meta.as_ref())
        .map(|m| m.row_count)
        .sum();

    println!("Store: {}", root.display());
    println!("Partitions: {}", partitions.len());
    println!("Rows: {total_rows}");
    println!();
    println!(
        "{:<8} {:<12} {:<25} {:>8} {:<20}",
        "Frame", "Instrument", "Date Range", "Rows", "Ingested"
    );
    println!("{}", "-".repeat(77));
    for p in &partitions {
        match &p.meta {
            Some(meta) => println!(
                "{:<8} {:<12} {:<25} {:>8} {:<20}",
                p.timeframe.as_str(),
                p.instrument,
                format!("{} to {}", meta.start_date, meta.end_date),
                meta.row_count,
                meta.ingested_at.format("%Y-%m-%d %H:%M:%S"),
            ),
            None => println!(
                "{:<8} {:<12} {:<25} {:>8} {:<20}",
                p.timeframe.as_str(),
                p.instrument,
                "(no meta)",
                "-",
                "-"
            ),
        }
    }

    Ok(())
}
