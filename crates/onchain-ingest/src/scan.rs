//! Read-side helpers over the partitioned dataset tree.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use onchain_core::constants::{DATASET_EXT, SCHEMA_VERSION_KEY};
use onchain_core::types::Dataset;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::ScanError;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ScanError + '_ {
    move |source| ScanError::Io { path: path.to_path_buf(), source }
}

/// Every committed file of `dataset` under `root`, sorted by path.
///
/// In-flight temporary files are ignored.
pub fn dataset_files(root: &Path, dataset: Dataset) -> Result<Vec<PathBuf>, ScanError> {
    let dir = root.join(dataset.name());
    let buckets = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(&dir)(e)),
    };

    let mut files = Vec::new();
    for bucket in buckets {
        let bucket = bucket.map_err(io_err(&dir))?.path();
        let is_bucket = bucket
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("height="));
        if !is_bucket || !bucket.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&bucket).map_err(io_err(&bucket))? {
            let path = entry.map_err(io_err(&bucket))?.path();
            let committed = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                n.starts_with("part-") && n.ends_with(&format!(".{DATASET_EXT}"))
            });
            if committed {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// All record batches in one Parquet file.
pub fn read_batches(path: &Path) -> Result<Vec<RecordBatch>, ScanError> {
    let file = File::open(path).map_err(io_err(path))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|source| ScanError::Parquet { path: path.to_path_buf(), source })?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ScanError::Arrow { path: path.to_path_buf(), source })
}

/// Schema version stamped into a file's metadata, if any.
pub fn schema_version(path: &Path) -> Result<Option<String>, ScanError> {
    let file = File::open(path).map_err(io_err(path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|source| ScanError::Parquet { path: path.to_path_buf(), source })?;
    Ok(builder.schema().metadata().get(SCHEMA_VERSION_KEY).cloned())
}

/// Typed column `name` of `batch`.
pub fn column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    path: &Path,
    name: &'static str,
) -> Result<&'a A, ScanError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<A>())
        .ok_or_else(|| ScanError::Column { path: path.to_path_buf(), column: name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU64;

    use arrow::array::{Int64Array, StringArray};
    use chrono::{TimeZone, Utc};
    use onchain_core::constants::SCHEMA_VERSION;
    use onchain_core::types::{BlockHash, BlockRecord};
    use tempfile::TempDir;

    use crate::writer::PartitionedWriter;

    fn block(height: u64) -> BlockRecord {
        BlockRecord {
            height,
            hash: BlockHash::new(format!("h{height}")),
            time_utc: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            version: 1,
            merkle_root: "m".into(),
            nonce: 1,
            bits: "b".into(),
            size: 1,
            weight: 4,
            tx_count: 0,
        }
    }

    #[test]
    fn missing_dataset_has_no_files() {
        let tmp = TempDir::new().unwrap();
        assert!(dataset_files(tmp.path(), Dataset::Outputs).unwrap().is_empty());
    }

    #[test]
    fn files_round_trip_with_metadata() {
        let tmp = TempDir::new().unwrap();
        let w = PartitionedWriter::new(tmp.path(), NonZeroU64::new(2).unwrap(), 6).unwrap();
        for h in 0..3 {
            w.flush(w.bucket_of(h), &[block(h)], h).unwrap();
        }
        fs::write(w.bucket_dir(Dataset::Blocks, 0).join(".part-x.parquet.tmp"), b"junk").unwrap();

        let files = dataset_files(tmp.path(), Dataset::Blocks).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[2], w.file_path(Dataset::Blocks, 2));

        let batches = read_batches(&files[1]).unwrap();
        let heights: &Int64Array = column(&batches[0], &files[1], "height").unwrap();
        let hashes: &StringArray = column(&batches[0], &files[1], "hash").unwrap();
        assert_eq!(heights.value(0), 1);
        assert_eq!(hashes.value(0), "h1");
        assert!(column::<StringArray>(&batches[0], &files[1], "height").is_err());

        assert_eq!(schema_version(&files[0]).unwrap().as_deref(), Some(SCHEMA_VERSION));
    }
}
