//! Error types for the ingest pipeline.
use std::path::PathBuf;

use arrow::error::ArrowError;
use onchain_core::error::{DecodeError, LedgerError, SourceError};
use parquet::errors::ParquetError;
use thiserror::Error;

/// Failure persisting a dataset file. Never retried.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("i/o: {0}")] Io(#[from] std::io::Error),
    #[error("arrow: {0}")] Arrow(#[from] ArrowError),
    #[error("parquet: {0}")] Parquet(#[from] ParquetError),
    #[error("zstd level {0} outside 1..=22")] InvalidCompressionLevel(i32),
    #[error("height bucket size must be positive")] InvalidBucketSize,
}

/// Anything that aborts a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)] Source(#[from] SourceError),
    #[error(transparent)] Decode(#[from] DecodeError),
    #[error("writer: {0}")] Writer(#[from] WriterError),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error("invalid range: start {start} > end {end}")] InvalidRange { start: u64, end: u64 },
    #[error("block budget must be positive")] InvalidBudget,
    #[error("more than {limit} rewinds in one run; source chain is unstable")] RewindLimit { limit: u32 },
}

/// Invalid or incomplete configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("loading configuration: {0}")] Load(#[from] config::ConfigError),
    #[error("{field} must be positive")] NotPositive { field: &'static str },
    #[error("zstd_level {0} outside 1..=22")] CompressionLevel(i32),
    #[error("tolerance_pct {0} must be a finite, non-negative number")] Tolerance(f64),
    #[error("environment variable {0} with RPC credentials is not set")] MissingCredentials(String),
    #[error("building RPC client: {0}")] Client(String),
    #[error("no dates given and qa.golden_days is empty")] NoGoldenDays,
}

/// Failure reading back dataset files.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("i/o at {path}: {source}")] Io { path: PathBuf, source: std::io::Error },
    #[error("parquet at {path}: {source}")] Parquet { path: PathBuf, source: ParquetError },
    #[error("arrow at {path}: {source}")] Arrow { path: PathBuf, source: ArrowError },
    #[error("{path}: column `{column}` missing or of unexpected type")] Column { path: PathBuf, column: &'static str },
}

/// Golden-day verification failures.
#[derive(Error, Debug)]
pub enum QaError {
    #[error("reading references {path}: {source}")] Io { path: PathBuf, source: std::io::Error },
    #[error("parsing references {path}: {source}")] Parse { path: PathBuf, source: serde_json::Error },
    #[error("no reference entry for {0}")] MissingReference(String),
    #[error("no {0} files under the data root")] NoData(String),
    #[error(transparent)] Scan(#[from] ScanError),
    #[error("{date}: {}", .violations.join("; "))] OutsideTolerance { date: String, violations: Vec<String> },
}
