//! Relational record types produced by decoding one block.
//!
//! A block at height `h` decomposes into exactly one [`BlockRecord`] and any
//! number of [`TransactionRecord`], [`InputRecord`] and [`OutputRecord`]
//! rows. Each kind lives in its own [`Dataset`].

use std::fmt;
use std::num::NonZeroU64;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_HEIGHT_WIDTH;

/// Block identifier as reported by the chain source (hex for Bitcoin Core).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_owned())
    }
}

impl From<String> for BlockHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

impl AsRef<str> for BlockHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One of the four partitioned datasets.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Blocks,
    Transactions,
    Inputs,
    Outputs,
}

impl Dataset {
    /// Every dataset, in flush order.
    pub const ALL: [Dataset; 4] = [Self::Blocks, Self::Transactions, Self::Inputs, Self::Outputs];

    /// Directory name under the data root.
    pub fn name(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Transactions => "transactions",
            Self::Inputs => "inputs",
            Self::Outputs => "outputs",
        }
    }

    /// Deterministic file token for a flush triggered at `height`.
    ///
    /// Re-flushing the same height yields the same token, so the new file
    /// replaces the old one instead of accumulating next to it.
    ///
    /// ```
    /// use onchain_core::types::Dataset;
    /// assert_eq!(Dataset::Blocks.file_token(7), "blocks-h000000000007");
    /// ```
    pub fn file_token(self, height: u64) -> String {
        format!("{}-h{:0width$}", self.name(), height, width = TOKEN_HEIGHT_WIDTH)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First height of the bucket containing `height`.
///
/// ```
/// use std::num::NonZeroU64;
/// use onchain_core::types::bucket_height;
/// let size = NonZeroU64::new(1000).unwrap();
/// assert_eq!(bucket_height(0, size), 0);
/// assert_eq!(bucket_height(1999, size), 1000);
/// ```
pub fn bucket_height(height: u64, bucket_size: NonZeroU64) -> u64 {
    height - height % bucket_size.get()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub height: u64,
    pub hash: BlockHash,
    pub time_utc: DateTime<Utc>,
    pub version: i32,
    pub merkle_root: String,
    pub nonce: u32,
    pub bits: String,
    pub size: i32,
    pub weight: i32,
    pub tx_count: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Unique within a block only; a reorg can bring the same txid back at another height.
    pub txid: String,
    pub height: u64,
    pub time_utc: DateTime<Utc>,
    pub size: i32,
    pub weight: i32,
    pub version: i32,
    pub locktime: u32,
    pub vin_count: i32,
    pub vout_count: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InputRecord {
    pub txid: String,
    pub idx: i32,
    pub coinbase: bool,
    /// `None` for coinbase inputs.
    pub prev_txid: Option<String>,
    pub prev_vout: Option<i32>,
    pub sequence: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutputRecord {
    pub txid: String,
    pub idx: i32,
    /// Value in sats.
    pub value_sats: i64,
    pub script_type: String,
    pub addresses: Vec<String>,
    /// Always false at ingest; spend status is resolved downstream.
    pub is_spent: bool,
}

/// Every record derived from one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedBlock {
    pub block: BlockRecord,
    pub transactions: Vec<TransactionRecord>,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
}

/// Rows written per dataset during one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub blocks: u64,
    pub transactions: u64,
    pub inputs: u64,
    pub outputs: u64,
}

impl RecordCounts {
    pub fn get(&self, dataset: Dataset) -> u64 {
        match dataset {
            Dataset::Blocks => self.blocks,
            Dataset::Transactions => self.transactions,
            Dataset::Inputs => self.inputs,
            Dataset::Outputs => self.outputs,
        }
    }

    pub fn add(&mut self, dataset: Dataset, rows: u64) {
        let slot = match dataset {
            Dataset::Blocks => &mut self.blocks,
            Dataset::Transactions => &mut self.transactions,
            Dataset::Inputs => &mut self.inputs,
            Dataset::Outputs => &mut self.outputs,
        };
        *slot += rows;
    }

    pub fn total(&self) -> u64 {
        Dataset::ALL.iter().map(|d| self.get(*d)).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for RecordCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks={} transactions={} inputs={} outputs={}",
            self.blocks, self.transactions, self.inputs, self.outputs
        )
    }
}
