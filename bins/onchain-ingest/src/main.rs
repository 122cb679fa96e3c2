//! onchain-ingest: command-line front end for the ingestion pipeline.
//!
//! Loads [`IngestConfig`], talks to the node over JSON-RPC, and drives
//! range backfills, tip catch-up, progress reporting and golden-day QA.
//!
//! Exit codes: 1 configuration error, 2 ingest or source failure,
//! 3 QA failure.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use onchain_core::ledger::HeightLedger;
use onchain_core::traits::ChainSource;
use onchain_ingest::error::{ConfigError, QaError};
use onchain_ingest::progress::{ProgressReport, file_counts};
use onchain_ingest::{IngestConfig, MarkerLedger, RpcClient, SyncDriver, qa};
use tracing::{error, info, warn};

const EXIT_CONFIG: i32 = 1;
const EXIT_INGEST: i32 = 2;
const EXIT_QA: i32 = 3;

/// Reorg-safe blockchain ingestion into height-partitioned Parquet.
#[derive(Parser)]
#[command(name = "onchain-ingest", version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to config/ingest.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overriding the configured level (RUST_LOG wins over both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json"), overriding the configured one.
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data root and check that the node answers.
    Init,
    /// Ingest an explicit height range.
    Backfill {
        /// First height (inclusive).
        #[arg(long)]
        from: u64,
        /// Last height (inclusive). Clamped to limits.max_blocks_per_run heights.
        #[arg(long)]
        to: u64,
    },
    /// Ingest from the last committed height toward the node's tip.
    Catchup {
        /// Most heights to ingest in this run.
        #[arg(long, default_value_t = 2000)]
        max_blocks: u64,
    },
    /// Summarize committed heights, gaps and dataset files.
    Progress {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Compare ingested data for UTC days with the golden references.
    Verify {
        /// Days to check (YYYY-MM-DD). Defaults to qa.golden_days.
        dates: Vec<NaiveDate>,
    },
    /// Print the effective configuration.
    Info,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match IngestConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(EXIT_CONFIG);
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.as_deref().unwrap_or(&config.log.format);
    init_logging(level, format);

    if let Err(e) = run(cli.command, &config).await {
        error!("{e:#}");
        process::exit(exit_code(&e));
    }
}

async fn run(command: Command, config: &IngestConfig) -> Result<()> {
    match command {
        Command::Init => init(config).await,
        Command::Backfill { from, to } => {
            let mut driver = open_driver(config)?;
            let report = driver
                .sync_range(from, to)
                .await
                .with_context(|| format!("backfill {from}..={to}"))?;
            println!("{report}");
            Ok(())
        }
        Command::Catchup { max_blocks } => {
            let mut driver = open_driver(config)?;
            let report = driver.sync_from_tip(max_blocks).await.context("catchup")?;
            if report.is_idle() {
                println!("already at tip (next height {})", report.start);
            } else {
                println!("{report}");
            }
            Ok(())
        }
        Command::Progress { json } => progress(config, json).await,
        Command::Verify { dates } => verify(config, dates),
        Command::Info => {
            let text = serde_json::to_string_pretty(config).context("rendering configuration")?;
            println!("{text}");
            for var in [&config.rpc.user_env, &config.rpc.pass_env] {
                let state = if std::env::var_os(var).is_some() { "set" } else { "not set" };
                println!("{var}: {state}");
            }
            Ok(())
        }
    }
}

fn client(config: &IngestConfig) -> Result<RpcClient> {
    let credentials = config.credentials()?;
    Ok(RpcClient::from_config(&config.rpc, Some(credentials))?)
}

fn open_driver(config: &IngestConfig) -> Result<SyncDriver<RpcClient, MarkerLedger>> {
    let source = client(config)?;
    SyncDriver::open(config, source)
        .with_context(|| format!("opening data root {}", config.data_root.display()))
}

async fn init(config: &IngestConfig) -> Result<()> {
    let ledger = MarkerLedger::open(&config.data_root)
        .with_context(|| format!("initializing data root {}", config.data_root.display()))?;
    let source = client(config)?;
    let tip = source
        .tip_height()
        .await
        .with_context(|| format!("querying node at {}", source.url()))?;
    info!(url = source.url(), tip, "node reachable");
    println!("node:        {}", source.url());
    println!("tip:         {tip}");
    println!("data root:   {}", config.data_root.display());
    println!("next height: {}", ledger.next_height());
    Ok(())
}

async fn progress(config: &IngestConfig, json: bool) -> Result<()> {
    let ledger = MarkerLedger::open(&config.data_root)
        .with_context(|| format!("opening data root {}", config.data_root.display()))?;
    let heights = ledger.heights()?;
    let files = file_counts(&config.data_root)?;

    // Progress is still useful offline; the tip is best-effort.
    let tip = match client(config) {
        Ok(source) => match source.tip_height().await {
            Ok(tip) => Some(tip),
            Err(e) => {
                warn!(error = %e, "tip unavailable");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "no RPC client; tip unknown");
            None
        }
    };

    let report = ProgressReport::new(&heights, files, tip);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn verify(config: &IngestConfig, dates: Vec<NaiveDate>) -> Result<()> {
    let dates = if dates.is_empty() { config.qa.golden_days.clone() } else { dates };
    if dates.is_empty() {
        return Err(ConfigError::NoGoldenDays.into());
    }

    let mut failure = None;
    for date in dates {
        match qa::verify_day(&config.data_root, &config.qa.golden_refs, date, config.qa.tolerance_pct) {
            Ok(outcome) => println!(
                "PASS {date} blocks={} transactions={} coinbase_sats={} (tolerance {}%)",
                outcome.measured.blocks,
                outcome.measured.transactions,
                outcome.measured.coinbase_sats,
                outcome.tolerance_pct
            ),
            Err(e) => {
                println!("FAIL {date}: {e}");
                failure.get_or_insert(e);
            }
        }
    }
    match failure {
        Some(e) => Err(e).context("golden-day verification failed"),
        None => Ok(()),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else if err.downcast_ref::<QaError>().is_some() {
        EXIT_QA
    } else {
        EXIT_INGEST
    }
}

/// Initialize tracing subscriber with the given filter and output format.
///
/// `format = "json"` emits one JSON object per event; anything else is text.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init();
    }
}
