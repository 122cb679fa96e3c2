//! Golden-day verification.
//!
//! For one UTC day, counts block and transaction rows whose `time_utc`
//! falls in the day and sums the value of coinbase outputs belonging to that
//! day's transactions, then compares each figure with a stored reference.
//!
//! Reference file format:
//!
//! ```json
//! {"2024-04-20": {"blocks": 144, "transactions": 650000, "coinbase_sats": 90000000000, "tolerance_pct": 0.1}}
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use arrow::array::{BooleanArray, Int64Array, StringArray, TimestampMicrosecondArray};
use chrono::{NaiveDate, TimeDelta};
use onchain_core::types::Dataset;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::QaError;
use crate::scan::{column, dataset_files, read_batches};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoldenReference {
    pub blocks: u64,
    pub transactions: u64,
    pub coinbase_sats: i64,
    /// Overrides the configured tolerance for this day.
    #[serde(default)]
    pub tolerance_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayMetrics {
    pub blocks: u64,
    pub transactions: u64,
    pub coinbase_sats: i64,
}

/// A day that passed verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaOutcome {
    pub date: NaiveDate,
    pub measured: DayMetrics,
    pub reference: GoldenReference,
    pub tolerance_pct: f64,
}

/// Relative deviation of `measured` from `reference`, in percent.
///
/// A zero reference yields 0 when the measurement is also zero, else 100.
pub fn delta_pct(measured: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        if measured == 0.0 { 0.0 } else { 100.0 }
    } else {
        (measured - reference).abs() / reference.abs() * 100.0
    }
}

pub fn load_references(path: &Path) -> Result<BTreeMap<NaiveDate, GoldenReference>, QaError> {
    let text = fs::read_to_string(path)
        .map_err(|source| QaError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text).map_err(|source| QaError::Parse { path: path.to_path_buf(), source })
}

fn require_files(root: &Path, dataset: Dataset) -> Result<Vec<PathBuf>, QaError> {
    let files = dataset_files(root, dataset)?;
    if files.is_empty() {
        return Err(QaError::NoData(dataset.name().to_string()));
    }
    Ok(files)
}

/// Measure `date` from the datasets under `root`.
pub fn measure_day(root: &Path, date: NaiveDate) -> Result<DayMetrics, QaError> {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    let (lo, hi) = (
        start.timestamp_micros(),
        (start + TimeDelta::days(1)).timestamp_micros(),
    );
    let in_day = |micros: i64| (lo..hi).contains(&micros);

    let mut metrics = DayMetrics::default();

    for path in require_files(root, Dataset::Blocks)? {
        for batch in read_batches(&path)? {
            let times: &TimestampMicrosecondArray = column(&batch, &path, "time_utc")?;
            metrics.blocks += times.values().iter().filter(|t| in_day(**t)).count() as u64;
        }
    }

    let mut day_txids = HashSet::new();
    for path in require_files(root, Dataset::Transactions)? {
        for batch in read_batches(&path)? {
            let times: &TimestampMicrosecondArray = column(&batch, &path, "time_utc")?;
            let txids: &StringArray = column(&batch, &path, "txid")?;
            for (i, t) in times.values().iter().enumerate() {
                if in_day(*t) {
                    metrics.transactions += 1;
                    day_txids.insert(txids.value(i).to_owned());
                }
            }
        }
    }

    let mut coinbase_txids = HashSet::new();
    for path in require_files(root, Dataset::Inputs)? {
        for batch in read_batches(&path)? {
            let txids: &StringArray = column(&batch, &path, "txid")?;
            let coinbase: &BooleanArray = column(&batch, &path, "coinbase")?;
            for i in 0..batch.num_rows() {
                if coinbase.value(i) && day_txids.contains(txids.value(i)) {
                    coinbase_txids.insert(txids.value(i).to_owned());
                }
            }
        }
    }

    for path in require_files(root, Dataset::Outputs)? {
        for batch in read_batches(&path)? {
            let txids: &StringArray = column(&batch, &path, "txid")?;
            let values: &Int64Array = column(&batch, &path, "value_sats")?;
            for i in 0..batch.num_rows() {
                if coinbase_txids.contains(txids.value(i)) {
                    metrics.coinbase_sats += values.value(i);
                }
            }
        }
    }

    Ok(metrics)
}

/// Measure `date` and compare it with its entry in `references`.
///
/// `default_tolerance_pct` applies when the entry carries no tolerance.
pub fn verify_day(
    root: &Path,
    references: &Path,
    date: NaiveDate,
    default_tolerance_pct: f64,
) -> Result<QaOutcome, QaError> {
    let refs = load_references(references)?;
    let reference = *refs
        .get(&date)
        .ok_or_else(|| QaError::MissingReference(date.to_string()))?;
    let tolerance_pct = reference.tolerance_pct.unwrap_or(default_tolerance_pct);
    let measured = measure_day(root, date)?;

    let checks = [
        ("blocks", measured.blocks as f64, reference.blocks as f64),
        ("transactions", measured.transactions as f64, reference.transactions as f64),
        ("coinbase_sats", measured.coinbase_sats as f64, reference.coinbase_sats as f64),
    ];
    let violations: Vec<String> = checks
        .iter()
        .map(|(name, m, r)| (name, delta_pct(*m, *r)))
        .filter(|(_, delta)| *delta > tolerance_pct)
        .map(|(name, delta)| format!("{name} delta={delta:.4}% > {tolerance_pct}%"))
        .collect();

    if !violations.is_empty() {
        warn!(%date, ?measured, violations = violations.len(), "golden day outside tolerance");
        return Err(QaError::OutsideTolerance { date: date.to_string(), violations });
    }
    info!(%date, ?measured, tolerance_pct, "golden day within tolerance");
    Ok(QaOutcome { date, measured, reference, tolerance_pct })
}
