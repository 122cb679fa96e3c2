//! Height-partitioned Parquet writer.
//!
//! Files land at `root/<dataset>/height=<bucket>/part-<token>.parquet`,
//! where the token encodes the height whose processing triggered the
//! flush. Every write goes through [`write_atomic`], so a reader never
//! observes a partial file and a failed write leaves nothing behind.

use std::fs::{self, File};
use std::io;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use onchain_core::constants::DATASET_EXT;
use onchain_core::types::{Dataset, bucket_height};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::WriterError;
use crate::schema::Columnar;

/// Writes record batches into the partitioned dataset tree.
#[derive(Debug, Clone)]
pub struct PartitionedWriter {
    root: PathBuf,
    bucket_size: NonZeroU64,
    zstd: ZstdLevel,
}

impl PartitionedWriter {
    /// Create a writer rooted at `root`.
    ///
    /// # Errors
    ///
    /// [`WriterError::InvalidCompressionLevel`] if `zstd_level` is outside 1..=22.
    pub fn new(
        root: impl Into<PathBuf>,
        bucket_size: NonZeroU64,
        zstd_level: i32,
    ) -> Result<Self, WriterError> {
        if !(1..=22).contains(&zstd_level) {
            return Err(WriterError::InvalidCompressionLevel(zstd_level));
        }
        let zstd = ZstdLevel::try_new(zstd_level)?;
        Ok(Self { root: root.into(), bucket_size, zstd })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_size(&self) -> NonZeroU64 {
        self.bucket_size
    }

    /// Bucket that `height` belongs to.
    pub fn bucket_of(&self, height: u64) -> u64 {
        bucket_height(height, self.bucket_size)
    }

    pub fn dataset_dir(&self, dataset: Dataset) -> PathBuf {
        self.root.join(dataset.name())
    }

    pub fn bucket_dir(&self, dataset: Dataset, bucket: u64) -> PathBuf {
        self.dataset_dir(dataset).join(format!("height={bucket}"))
    }

    /// Final path of the file flushed for `dataset` at `height`.
    pub fn file_path(&self, dataset: Dataset, height: u64) -> PathBuf {
        self.bucket_dir(dataset, self.bucket_of(height))
            .join(format!("part-{}.{DATASET_EXT}", dataset.file_token(height)))
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(self.zstd))
            .set_dictionary_enabled(true)
            .build()
    }

    /// Persist `rows` as the file for `token_height` in `bucket`.
    ///
    /// Returns the written path, or `None` when `rows` is empty. An existing
    /// file for the same token is replaced atomically.
    pub fn flush<R: Columnar>(
        &self,
        bucket: u64,
        rows: &[R],
        token_height: u64,
    ) -> Result<Option<PathBuf>, WriterError> {
        if rows.is_empty() {
            return Ok(None);
        }
        let batch = R::to_batch(rows)?;
        let path = self
            .bucket_dir(R::DATASET, bucket)
            .join(format!("part-{}.{DATASET_EXT}", R::DATASET.file_token(token_height)));
        let props = self.properties();

        write_atomic(&path, |file: &mut File| -> Result<(), WriterError> {
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
            Ok(())
        })?;

        debug!(dataset = %R::DATASET, bucket, rows = rows.len(), path = %path.display(), "flushed");
        Ok(Some(path))
    }

    /// Delete the file flushed for `dataset` at `height`, if any.
    ///
    /// Best-effort: a missing file is fine, other failures are logged and
    /// reported as `false`.
    pub fn remove_height(&self, dataset: Dataset, height: u64) -> bool {
        let path = self.file_path(dataset, height);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(dataset = %dataset, height, path = %path.display(), "removed superseded file");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(dataset = %dataset, height, path = %path.display(), error = %e, "could not remove file");
                false
            }
        }
    }
}
