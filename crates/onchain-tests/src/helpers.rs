//! Shared fixtures: a scripted chain source, block builders, and readers
//! for what a run left on disk.

use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{Int64Array, StringArray};
use async_trait::async_trait;
use onchain_core::error::SourceError;
use onchain_core::raw::{RawBlock, RawInput, RawOutput, RawScriptPubKey, RawTransaction};
use onchain_core::traits::ChainSource;
use onchain_core::types::{BlockHash, Dataset};
use onchain_ingest::config::IngestConfig;
use onchain_ingest::scan::{column, dataset_files, read_batches};
use onchain_ingest::{MarkerLedger, PartitionedWriter, SyncDriver, SyncLimits};
use parking_lot::Mutex;

/// 2009-01-03 18:15:05 UTC. Blocks are spaced ten minutes apart from here,
/// so the first 34 heights share one UTC day.
pub const GENESIS_TIME: i64 = 1_231_006_505;
pub const BLOCK_SPACING_SECS: i64 = 600;
pub const SUBSIDY: &str = "50.00000000";
pub const SUBSIDY_SATS: i64 = 5_000_000_000;

/// Hash of the block at `height` on branch `branch`. 64 characters.
pub fn block_hash(height: u64, branch: char) -> String {
    format!("{branch}{height:063x}")
}

pub fn coinbase_txid(height: u64, branch: char) -> String {
    format!("cb-{branch}-{height}")
}

pub fn spend_txid(height: u64, branch: char) -> String {
    format!("tx-{branch}-{height}")
}

fn output(value: &str, address: String) -> RawOutput {
    RawOutput {
        value: Some(value.to_string()),
        script_pub_key: Some(RawScriptPubKey {
            script_type: Some("pubkeyhash".into()),
            address: Some(address),
            addresses: None,
        }),
    }
}

/// Block at `height` on `branch` linking to `prev`.
///
/// Height 0 carries only a coinbase. Every later block also spends the
/// previous height's coinbase into two outputs.
pub fn make_block(height: u64, prev: Option<String>, branch: char) -> RawBlock {
    let coinbase = RawTransaction {
        txid: Some(coinbase_txid(height, branch)),
        size: 134,
        version: 1,
        inputs: vec![RawInput {
            coinbase: Some(format!("04{height:08x}")),
            sequence: u32::MAX,
            ..Default::default()
        }],
        outputs: vec![output(SUBSIDY, format!("miner-{branch}-{height}"))],
        ..Default::default()
    };
    let mut transactions = vec![coinbase];

    if let Some(parent) = height.checked_sub(1) {
        transactions.push(RawTransaction {
            txid: Some(spend_txid(height, branch)),
            size: 226,
            version: 2,
            inputs: vec![RawInput {
                txid: Some(coinbase_txid(parent, branch)),
                vout: Some(0),
                sequence: u32::MAX - 1,
                ..Default::default()
            }],
            outputs: vec![
                output("25.00000000", format!("alice-{height}")),
                output("24.99990000", format!("change-{height}")),
            ],
            ..Default::default()
        });
    }

    RawBlock {
        hash: Some(block_hash(height, branch)),
        previous_block_hash: prev,
        time: Some(GENESIS_TIME + height as i64 * BLOCK_SPACING_SECS),
        version: 1,
        merkle_root: format!("merkle-{branch}-{height}"),
        nonce: height as u32,
        bits: "1d00ffff".into(),
        size: 285,
        weight: None,
        transactions,
    }
}

/// `len` linked blocks on `branch`, starting at genesis.
pub fn make_chain(len: u64, branch: char) -> Vec<RawBlock> {
    extend_chain(Vec::new(), len, branch)
}

/// `base` up to (not including) `fork_height`, then `branch` blocks up to `len`.
pub fn fork_chain(base: &[RawBlock], fork_height: u64, len: u64, branch: char) -> Vec<RawBlock> {
    let kept = base.iter().take(fork_height as usize).cloned().collect();
    extend_chain(kept, len, branch)
}

fn extend_chain(mut blocks: Vec<RawBlock>, len: u64, branch: char) -> Vec<RawBlock> {
    for height in blocks.len() as u64..len {
        let prev = blocks.last().and_then(|b: &RawBlock| b.hash.clone());
        blocks.push(make_block(height, prev, branch));
    }
    blocks
}

fn not_found(method: &str, message: &str) -> SourceError {
    SourceError::Rpc { method: method.into(), code: -5, message: message.into() }
}

/// In-memory chain source whose canonical chain can be replaced at will.
#[derive(Default)]
pub struct FakeChain {
    blocks: Mutex<Vec<RawBlock>>,
    /// When set, every served block declares a parent nobody has.
    orphan_parents: Mutex<bool>,
    block_fetches: AtomicU64,
}

impl FakeChain {
    pub fn new(blocks: Vec<RawBlock>) -> Arc<Self> {
        Arc::new(Self { blocks: Mutex::new(blocks), ..Default::default() })
    }

    /// Swap in a new canonical chain, as a node does after a reorg.
    pub fn replace_chain(&self, blocks: Vec<RawBlock>) {
        *self.blocks.lock() = blocks;
    }

    /// Mutate the stored block at `height`.
    pub fn edit_block(&self, height: u64, edit: impl FnOnce(&mut RawBlock)) {
        if let Some(block) = self.blocks.lock().get_mut(height as usize) {
            edit(block);
        }
    }

    pub fn set_orphan_parents(&self, on: bool) {
        *self.orphan_parents.lock() = on;
    }

    /// `getblock` calls served so far.
    pub fn block_fetches(&self) -> u64 {
        self.block_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn hash_at(&self, height: u64) -> Result<BlockHash, SourceError> {
        self.blocks
            .lock()
            .get(height as usize)
            .and_then(|b| b.hash.clone())
            .map(BlockHash::from)
            .ok_or_else(|| not_found("getblockhash", "Block height out of range"))
    }

    async fn block_at(&self, hash: &BlockHash) -> Result<RawBlock, SourceError> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        let mut block = self
            .blocks
            .lock()
            .iter()
            .find(|b| b.hash.as_deref() == Some(hash.as_str()))
            .cloned()
            .ok_or_else(|| not_found("getblock", "Block not found"))?;
        if *self.orphan_parents.lock() {
            block.previous_block_hash = Some("orphan".into());
        }
        Ok(block)
    }

    async fn tip_height(&self) -> Result<u64, SourceError> {
        Ok((self.blocks.lock().len() as u64).saturating_sub(1))
    }
}

/// Limits used by most tests: a roomy range, a small io batch, a few rewinds.
pub fn test_limits() -> SyncLimits {
    SyncLimits { max_blocks_per_run: 1_000, io_batch_size: 16, max_rewinds: 8 }
}

/// Configuration rooted at `root` with two heights per bucket.
pub fn test_config(root: &Path) -> IngestConfig {
    let mut config = IngestConfig { data_root: root.to_path_buf(), height_bucket_size: 2, ..Default::default() };
    config.limits.io_batch_size = 16;
    config.limits.max_rewinds_per_run = 8;
    config
}

pub fn test_writer(root: &Path) -> PartitionedWriter {
    let bucket = NonZeroU64::new(2).unwrap();
    PartitionedWriter::new(root, bucket, 3).unwrap()
}

/// Driver over the on-disk marker ledger under `root`.
pub fn disk_driver(root: &Path, chain: &Arc<FakeChain>) -> SyncDriver<Arc<FakeChain>, MarkerLedger> {
    SyncDriver::open(&test_config(root), Arc::clone(chain)).unwrap()
}

/// Every file under `root` with its bytes, keyed by path relative to `root`.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let Ok(entries) = fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Snapshot entries belonging to `height`'s dataset files.
pub fn files_for_height(
    snapshot: &BTreeMap<PathBuf, Vec<u8>>,
    height: u64,
) -> BTreeMap<PathBuf, Vec<u8>> {
    let tokens: Vec<String> = Dataset::ALL.iter().map(|d| d.file_token(height)).collect();
    snapshot
        .iter()
        .filter(|(path, _)| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            tokens.iter().any(|t| name == format!("part-{t}.parquet"))
        })
        .map(|(p, b)| (p.clone(), b.clone()))
        .collect()
}

/// Block hash stored in the blocks dataset, per height.
pub fn stored_block_hashes(root: &Path) -> BTreeMap<u64, String> {
    let mut out = BTreeMap::new();
    for path in dataset_files(root, Dataset::Blocks).unwrap() {
        for batch in read_batches(&path).unwrap() {
            let heights: &Int64Array = column(&batch, &path, "height").unwrap();
            let hashes: &StringArray = column(&batch, &path, "hash").unwrap();
            for i in 0..batch.num_rows() {
                let previous = out.insert(heights.value(i) as u64, hashes.value(i).to_string());
                assert!(previous.is_none(), "height {} stored twice", heights.value(i));
            }
        }
    }
    out
}

/// Every txid in `dataset`, sorted.
pub fn stored_txids(root: &Path, dataset: Dataset) -> Vec<String> {
    let mut out = Vec::new();
    for path in dataset_files(root, dataset).unwrap() {
        for batch in read_batches(&path).unwrap() {
            let txids: &StringArray = column(&batch, &path, "txid").unwrap();
            out.extend(txids.iter().flatten().map(str::to_string));
        }
    }
    out.sort();
    out
}
