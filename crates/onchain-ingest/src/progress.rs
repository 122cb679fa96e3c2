//! Ingestion progress: committed heights, holes, and files on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use onchain_core::types::Dataset;
use serde::Serialize;

use crate::error::ScanError;
use crate::scan::dataset_files;

/// Inclusive ranges of heights missing between the lowest and highest
/// committed height. `heights` must be sorted ascending.
///
/// ```
/// use onchain_ingest::progress::gaps;
/// assert_eq!(gaps(&[0, 1, 4, 5, 9]), vec![(2, 3), (6, 8)]);
/// ```
pub fn gaps(heights: &[u64]) -> Vec<(u64, u64)> {
    heights
        .windows(2)
        .filter(|pair| pair[1] > pair[0] + 1)
        .map(|pair| (pair[0] + 1, pair[1] - 1))
        .collect()
}

/// Number of committed files per dataset.
pub fn file_counts(root: &Path) -> Result<BTreeMap<Dataset, usize>, ScanError> {
    Dataset::ALL
        .into_iter()
        .map(|dataset| dataset_files(root, dataset).map(|files| (dataset, files.len())))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub markers: usize,
    pub min_height: Option<u64>,
    pub max_height: Option<u64>,
    pub gaps: Vec<(u64, u64)>,
    pub files: BTreeMap<Dataset, usize>,
    /// Node tip, when it could be queried.
    pub tip: Option<u64>,
}

impl ProgressReport {
    /// Build from the ledger's sorted heights and on-disk file counts.
    pub fn new(heights: &[u64], files: BTreeMap<Dataset, usize>, tip: Option<u64>) -> Self {
        Self {
            markers: heights.len(),
            min_height: heights.first().copied(),
            max_height: heights.last().copied(),
            gaps: gaps(heights),
            files,
            tip,
        }
    }

    /// Heights up to the tip that are not yet committed.
    pub fn remaining(&self) -> Option<u64> {
        self.tip.map(|tip| (tip + 1).saturating_sub(self.markers as u64))
    }

    /// Share of heights up to the tip that are committed, in percent.
    pub fn percent_complete(&self) -> Option<f64> {
        self.tip.map(|tip| self.markers as f64 / (tip + 1) as f64 * 100.0)
    }
}

fn height_or_dash(h: Option<u64>) -> String {
    h.map_or_else(|| "-".to_string(), |h| h.to_string())
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "markers:     {}", self.markers)?;
        writeln!(f, "min height:  {}", height_or_dash(self.min_height))?;
        writeln!(f, "max height:  {}", height_or_dash(self.max_height))?;
        if let (Some(tip), Some(remaining), Some(pct)) =
            (self.tip, self.remaining(), self.percent_complete())
        {
            writeln!(f, "tip:         {tip}")?;
            writeln!(f, "remaining:   {remaining}")?;
            writeln!(f, "complete:    {pct:.2}%")?;
        }
        for (dataset, count) in &self.files {
            writeln!(f, "{:<12} {count} files", format!("{dataset}:"))?;
        }
        if self.gaps.is_empty() {
            write!(f, "gaps:        none")
        } else {
            let ranges: Vec<String> = self
                .gaps
                .iter()
                .map(|(lo, hi)| if lo == hi { lo.to_string() } else { format!("{lo}-{hi}") })
                .collect();
            write!(f, "gaps:        {}", ranges.join(", "))
        }
    }
}
