//! Validation agent: polls the raw mailbox on a fixed interval, runs each
//! report through the decision pipeline, and appends accepted records to a
//! JSONL export file. The capture agent is a separate process; the two
//! meet only in the data directory.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use ffl_core::{FuelRecord, PipelineConfig};
use ffl_pipeline::{ExportSink, Processor, Stores};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ffl-validator")]
#[command(about = "Fuel-report validation agent", long_about = None)]
struct Args {
    /// Directory holding the mailbox and all document stores.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Optional JSON config file; defaults apply for anything omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Accepted-record export file (one JSON object per line).
    #[arg(long, default_value = "data/records.jsonl")]
    export: PathBuf,
    /// Run a single cycle and exit instead of polling.
    #[arg(long, default_value_t = false)]
    once: bool,
}

struct JsonlSink {
    path: PathBuf,
}

impl ExportSink for JsonlSink {
    fn append(&mut self, record: &FuelRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;
    if let Some(parent) = args.export.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let stores = Stores::open(&args.data_dir, &config).context("opening stores")?;
    let sink = JsonlSink {
        path: args.export.clone(),
    };
    let mut processor = Processor::new(stores, config, sink);

    info!(data_dir = %args.data_dir.display(), "validator starting");

    if args.once {
        let cycle = processor.run_cycle(Utc::now())?;
        info!(accepted = cycle.accepted, rejected = cycle.rejected,
              escalated = cycle.escalated, "single cycle complete");
        processor.stores.watermark.store(Utc::now())?;
        return Ok(());
    }

    let poll = std::time::Duration::from_secs(processor.config().poll_interval_secs);
    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match processor.run_cycle(Utc::now()) {
                    Ok(cycle) if cycle.total() > 0 => {
                        info!(accepted = cycle.accepted, rejected = cycle.rejected,
                              escalated = cycle.escalated, "cycle complete");
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    // The watermark must land even if the last cycle failed, so restart
    // recovery knows how far this run got.
    processor.stores.watermark.store(Utc::now())?;
    info!("validator stopped; watermark written");
    Ok(())
}
