//! Height-by-height sync driver.
//!
//! Drives one run: walks heights upward, fetches each block, checks
//! continuity against the committed chain, decodes, writes every dataset
//! and only then marks the height done. Heights are strictly sequential;
//! a reorg moves the cursor back to the fork point and the loop re-validates
//! from there one height at a time.
//!
//! Per-height flow:
//!
//! ```text
//! Pending -> Fetched -> Validated -> Decoded -> Buffered -> Flushed -> MarkedDone
//!                           |
//!                           +-(mismatch)-> RolledBack -> Pending(resume_height)
//! ```
//!
//! Any error aborts the run. Because markers trail flushes and files are
//! replaced atomically, an aborted run is resumed by simply running again.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;

use onchain_core::constants::{
    DEFAULT_IO_BATCH_SIZE, DEFAULT_MAX_BLOCKS_PER_RUN, DEFAULT_MAX_REWINDS_PER_RUN,
};
use onchain_core::decode::decode_block;
use onchain_core::ledger::HeightLedger;
use onchain_core::traits::ChainSource;
use onchain_core::types::{
    BlockHash, BlockRecord, InputRecord, OutputRecord, RecordCounts, TransactionRecord,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, LimitsConfig};
use crate::error::{SyncError, WriterError};
use crate::markers::MarkerLedger;
use crate::reorg::{Continuity, ReorgResolver};
use crate::schema::Columnar;
use crate::writer::PartitionedWriter;

/// Per-run bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLimits {
    /// Widest height span a single range call covers.
    pub max_blocks_per_run: u64,
    /// Buffered input/output rows that force a flush.
    pub io_batch_size: usize,
    /// Reorg rewinds tolerated before the run gives up.
    pub max_rewinds: u32,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_blocks_per_run: DEFAULT_MAX_BLOCKS_PER_RUN,
            io_batch_size: DEFAULT_IO_BATCH_SIZE,
            max_rewinds: DEFAULT_MAX_REWINDS_PER_RUN,
        }
    }
}

impl From<&LimitsConfig> for SyncLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_blocks_per_run: limits.max_blocks_per_run,
            io_batch_size: limits.io_batch_size,
            max_rewinds: limits.max_rewinds_per_run,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// First height requested.
    pub start: u64,
    /// Last height requested after clamping. Below `start` when there was
    /// nothing to do.
    pub end: u64,
    /// Heights committed in this run (since the last rewind).
    pub committed: u64,
    /// Rows written per dataset in this run (since the last rewind).
    pub counts: RecordCounts,
    pub rewinds: u32,
    /// Ledger maximum when the run finished.
    pub max_height: Option<u64>,
}

impl SyncReport {
    fn idle(start: u64, end: u64, max_height: Option<u64>) -> Self {
        Self { start, end, committed: 0, counts: RecordCounts::default(), rewinds: 0, max_height }
    }

    pub fn is_idle(&self) -> bool {
        self.committed == 0 && self.counts.is_zero() && self.rewinds == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "heights {}..={} committed={} {} rewinds={}",
            self.start, self.end, self.committed, self.counts, self.rewinds
        )
    }
}

/// Rows waiting for one (dataset, bucket) file.
struct Pending<R> {
    rows: Vec<R>,
    /// Height whose rows were appended last; names the flushed file.
    last_height: u64,
}

/// Buffered rows per bucket for one dataset.
struct Buffer<R>(BTreeMap<u64, Pending<R>>);

impl<R: Columnar> Buffer<R> {
    fn new() -> Self {
        Self(BTreeMap::new())
    }

    fn push(&mut self, bucket: u64, height: u64, rows: Vec<R>) -> usize {
        let pending = self
            .0
            .entry(bucket)
            .or_insert_with(|| Pending { rows: Vec::new(), last_height: height });
        pending.rows.extend(rows);
        pending.last_height = height;
        pending.rows.len()
    }

    fn flush(
        &mut self,
        writer: &PartitionedWriter,
        bucket: u64,
        counts: &mut RecordCounts,
    ) -> Result<(), WriterError> {
        if let Some(pending) = self.0.remove(&bucket) {
            writer.flush(bucket, &pending.rows, pending.last_height)?;
            counts.add(R::DATASET, pending.rows.len() as u64);
        }
        Ok(())
    }

    fn flush_all(
        &mut self,
        writer: &PartitionedWriter,
        counts: &mut RecordCounts,
    ) -> Result<(), WriterError> {
        let buckets: Vec<u64> = self.0.keys().copied().collect();
        for bucket in buckets {
            self.flush(writer, bucket, counts)?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

struct Buffers {
    blocks: Buffer<BlockRecord>,
    transactions: Buffer<TransactionRecord>,
    inputs: Buffer<InputRecord>,
    outputs: Buffer<OutputRecord>,
}

impl Buffers {
    fn new() -> Self {
        Self {
            blocks: Buffer::new(),
            transactions: Buffer::new(),
            inputs: Buffer::new(),
            outputs: Buffer::new(),
        }
    }

    fn flush_all(
        &mut self,
        writer: &PartitionedWriter,
        counts: &mut RecordCounts,
    ) -> Result<(), WriterError> {
        self.blocks.flush_all(writer, counts)?;
        self.transactions.flush_all(writer, counts)?;
        self.inputs.flush_all(writer, counts)?;
        self.outputs.flush_all(writer, counts)
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.transactions.clear();
        self.inputs.clear();
        self.outputs.clear();
    }
}

/// Owns the source, ledger, and writer for a run.
pub struct SyncDriver<S, L> {
    source: S,
    ledger: L,
    writer: PartitionedWriter,
    limits: SyncLimits,
}

impl<S: ChainSource> SyncDriver<S, MarkerLedger> {
    /// Driver over the marker ledger and dataset tree under `config.data_root`.
    pub fn open(config: &IngestConfig, source: S) -> Result<Self, SyncError> {
        let bucket_size =
            NonZeroU64::new(config.height_bucket_size).ok_or(WriterError::InvalidBucketSize)?;
        let writer = PartitionedWriter::new(&config.data_root, bucket_size, config.zstd_level)?;
        let ledger = MarkerLedger::open(&config.data_root)?;
        Ok(Self::new(source, ledger, writer, SyncLimits::from(&config.limits)))
    }
}

impl<S: ChainSource, L: HeightLedger> SyncDriver<S, L> {
    pub fn new(source: S, ledger: L, writer: PartitionedWriter, limits: SyncLimits) -> Self {
        Self { source, ledger, writer, limits }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn writer(&self) -> &PartitionedWriter {
        &self.writer
    }

    pub fn limits(&self) -> SyncLimits {
        self.limits
    }

    /// Ingest heights `start..=end`, clamped to `max_blocks_per_run` heights.
    ///
    /// Already-committed heights are skipped. A reorg may move processing
    /// below `start`; the run still ends at the clamped `end`.
    pub async fn sync_range(&mut self, start: u64, end: u64) -> Result<SyncReport, SyncError> {
        if start > end {
            return Err(SyncError::InvalidRange { start, end });
        }
        let span = self.limits.max_blocks_per_run.max(1);
        let end = end.min(start.saturating_add(span - 1));
        info!(start, end, "sync range");

        let mut buffers = Buffers::new();
        let mut counts = RecordCounts::default();
        let mut committed = 0u64;
        let mut rewinds = 0u32;
        let mut cursor = start;

        while cursor <= end {
            let height = cursor;
            if self.ledger.is_done(height)? {
                debug!(height, "already committed, skipping");
                cursor += 1;
                continue;
            }

            let hash = self.source.hash_at(height).await?;
            let raw = self.source.block_at(&hash).await?;

            let declared_parent = raw.previous_block_hash.as_deref().map(BlockHash::from);
            let continuity = ReorgResolver::new(&self.source, &mut self.ledger, &self.writer)
                .resolve(height, declared_parent.as_ref())
                .await?;
            if let Continuity::Rewound { resume_height, removed } = continuity {
                rewinds += 1;
                if rewinds > self.limits.max_rewinds {
                    return Err(SyncError::RewindLimit { limit: self.limits.max_rewinds });
                }
                warn!(height, resume_height, removed = removed.len(), rewinds, "rewinding sync cursor");
                buffers.clear();
                counts = RecordCounts::default();
                committed = 0;
                cursor = resume_height;
                continue;
            }

            let decoded = decode_block(height, &raw)?;
            let (n_tx, n_in, n_out) =
                (decoded.transactions.len(), decoded.inputs.len(), decoded.outputs.len());
            let bucket = self.writer.bucket_of(height);

            buffers.blocks.push(bucket, height, vec![decoded.block]);
            buffers.blocks.flush(&self.writer, bucket, &mut counts)?;
            buffers.transactions.push(bucket, height, decoded.transactions);
            buffers.transactions.flush(&self.writer, bucket, &mut counts)?;

            let buffered = buffers.inputs.push(bucket, height, decoded.inputs);
            if n_in > 0 || buffered >= self.limits.io_batch_size {
                buffers.inputs.flush(&self.writer, bucket, &mut counts)?;
            }
            let buffered = buffers.outputs.push(bucket, height, decoded.outputs);
            if n_out > 0 || buffered >= self.limits.io_batch_size {
                buffers.outputs.flush(&self.writer, bucket, &mut counts)?;
            }

            self.ledger.mark_done(height, &hash)?;
            committed += 1;
            info!(height, hash = %hash, txs = n_tx, inputs = n_in, outputs = n_out, "committed height");
            cursor += 1;
        }

        buffers.flush_all(&self.writer, &mut counts)?;

        let report = SyncReport {
            start,
            end,
            committed,
            counts,
            rewinds,
            max_height: self.ledger.max_height(),
        };
        info!(%report, "sync range finished");
        Ok(report)
    }

    /// Ingest up to `max_blocks` heights past the ledger's maximum, stopping
    /// at the node's tip.
    pub async fn sync_from_tip(&mut self, max_blocks: u64) -> Result<SyncReport, SyncError> {
        if max_blocks == 0 {
            return Err(SyncError::InvalidBudget);
        }
        let tip = self.source.tip_height().await?;
        let start = self.ledger.next_height();
        if start > tip {
            info!(start, tip, "already caught up with tip");
            return Ok(SyncReport::idle(start, tip, self.ledger.max_height()));
        }
        let budget = self.limits.max_blocks_per_run.min(max_blocks);
        let end = tip.min(start.saturating_add(budget - 1));
        info!(start, end, tip, "syncing toward tip");
        self.sync_range(start, end).await
    }
}
