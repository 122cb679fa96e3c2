//! Height ledger interface and in-memory implementation.
//!
//! The ledger records which heights have been fully persisted and the block
//! hash each was committed with. A height is marked only after every
//! dataset for it has been flushed, so "marked" implies "on disk".
//!
//! The [`MemoryLedger`] is suitable for testing; the ingest crate provides
//! a marker-file ledger for production.

use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::types::BlockHash;

/// Durable record of completed heights.
///
/// Single writer: callers hold `&mut` for mutations and never share a
/// ledger root between concurrent runs.
pub trait HeightLedger: Send {
    /// Whether `height` has been committed.
    fn is_done(&self, height: u64) -> Result<bool, LedgerError>;

    /// Hash `height` was committed with.
    ///
    /// `None` if the height is not done, or was marked by an older writer
    /// that did not record hashes.
    fn hash_for(&self, height: u64) -> Result<Option<BlockHash>, LedgerError>;

    /// Commit `height` with `hash`. Re-marking overwrites the stored hash.
    fn mark_done(&mut self, height: u64, hash: &BlockHash) -> Result<(), LedgerError>;

    /// Highest committed height, `None` when empty.
    fn max_height(&self) -> Option<u64>;

    /// Forget every height `>= height`. Returns the removed heights, ascending.
    fn clear_from(&mut self, height: u64) -> Result<Vec<u64>, LedgerError>;

    /// Every committed height, ascending.
    fn heights(&self) -> Result<Vec<u64>, LedgerError>;

    /// First height a tip-following run should fetch.
    fn next_height(&self) -> u64 {
        self.max_height().map_or(0, |h| h + 1)
    }
}

/// In-memory ledger backed by a `BTreeMap`.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    marks: BTreeMap<u64, Option<BlockHash>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `height` done without a hash, as a legacy writer would have.
    pub fn mark_done_without_hash(&mut self, height: u64) {
        self.marks.insert(height, None);
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

impl HeightLedger for MemoryLedger {
    fn is_done(&self, height: u64) -> Result<bool, LedgerError> {
        Ok(self.marks.contains_key(&height))
    }

    fn hash_for(&self, height: u64) -> Result<Option<BlockHash>, LedgerError> {
        Ok(self.marks.get(&height).cloned().flatten())
    }

    fn mark_done(&mut self, height: u64, hash: &BlockHash) -> Result<(), LedgerError> {
        self.marks.insert(height, Some(hash.clone()));
        Ok(())
    }

    fn max_height(&self) -> Option<u64> {
        self.marks.keys().next_back().copied()
    }

    fn clear_from(&mut self, height: u64) -> Result<Vec<u64>, LedgerError> {
        let removed = self.marks.split_off(&height);
        Ok(removed.into_keys().collect())
    }

    fn heights(&self) -> Result<Vec<u64>, LedgerError> {
        Ok(self.marks.keys().copied().collect())
    }
}
