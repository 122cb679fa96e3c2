//! Chain reorganization detection and rollback.
//!
//! Before a block at height `h` is decoded, its declared parent hash is
//! compared with the hash committed for `h - 1`. A mismatch means the node
//! has switched to a competing branch. The resolver then walks backward
//! through committed heights until the node's current canonical hash agrees
//! with the ledger again, and rolls back everything above that point.
//!
//! Rollback removes ledger markers first and dataset files second, so an
//! interruption in between leaves orphan files without markers; those are
//! overwritten when the heights are re-ingested.

use onchain_core::ledger::HeightLedger;
use onchain_core::traits::ChainSource;
use onchain_core::types::{BlockHash, Dataset};
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::writer::PartitionedWriter;

/// Outcome of checking one height against the committed chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuity {
    /// Parent matches (or nothing committed to compare against).
    Linked,
    /// Heights `>= resume_height` were rolled back; processing restarts there.
    Rewound { resume_height: u64, removed: Vec<u64> },
}

/// Borrows the driver's source, ledger, and writer for one check.
pub struct ReorgResolver<'a, S: ?Sized, L: ?Sized> {
    source: &'a S,
    ledger: &'a mut L,
    writer: &'a PartitionedWriter,
}

impl<'a, S, L> ReorgResolver<'a, S, L>
where
    S: ChainSource + ?Sized,
    L: HeightLedger + ?Sized,
{
    pub fn new(source: &'a S, ledger: &'a mut L, writer: &'a PartitionedWriter) -> Self {
        Self { source, ledger, writer }
    }

    /// Check `height`'s declared parent and roll back on divergence.
    ///
    /// A block that declares no parent is treated as linked; only genesis
    /// legitimately lacks one, and the source is trusted for consensus.
    pub async fn resolve(
        &mut self,
        height: u64,
        declared_parent: Option<&BlockHash>,
    ) -> Result<Continuity, SyncError> {
        let Some(parent) = height.checked_sub(1) else {
            return Ok(Continuity::Linked);
        };
        let Some(committed) = self.ledger.hash_for(parent)? else {
            return Ok(Continuity::Linked);
        };
        let Some(declared) = declared_parent else {
            debug!(height, "block declares no parent; skipping continuity check");
            return Ok(Continuity::Linked);
        };
        if *declared == committed {
            return Ok(Continuity::Linked);
        }

        warn!(
            height,
            committed = %committed,
            declared = %declared,
            "parent hash mismatch; chain reorganized"
        );
        let resume_height = match self.find_fork_point(parent).await? {
            Some(ancestor) => {
                info!(ancestor, "found last common ancestor");
                ancestor + 1
            }
            None => {
                error!(height, "no common ancestor with committed history; rolling back to genesis");
                0
            }
        };
        let removed = self.roll_back(resume_height)?;
        Ok(Continuity::Rewound { resume_height, removed })
    }

    /// Highest height `<= from` whose committed hash the node still agrees
    /// with. `None` if there is none down to genesis.
    ///
    /// Heights without a recorded hash are stepped over without a network call.
    pub async fn find_fork_point(&self, from: u64) -> Result<Option<u64>, SyncError> {
        let mut cursor = Some(from);
        while let Some(height) = cursor {
            if let Some(recorded) = self.ledger.hash_for(height)? {
                let canonical = self.source.hash_at(height).await?;
                if canonical == recorded {
                    return Ok(Some(height));
                }
                debug!(height, recorded = %recorded, canonical = %canonical, "height diverged");
            }
            cursor = height.checked_sub(1);
        }
        Ok(None)
    }

    /// Forget every height `>= resume_height` and delete its dataset files.
    pub fn roll_back(&mut self, resume_height: u64) -> Result<Vec<u64>, SyncError> {
        let removed = self.ledger.clear_from(resume_height)?;
        for &height in &removed {
            for dataset in Dataset::ALL {
                self.writer.remove_height(dataset, height);
            }
        }
        warn!(
            resume_height,
            removed = removed.len(),
            "rolled back committed heights"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    use async_trait::async_trait;
    use onchain_core::error::SourceError;
    use onchain_core::ledger::MemoryLedger;
    use onchain_core::raw::RawBlock;
    use tempfile::TempDir;

    /// Canonical hashes only; blocks are never fetched by the resolver.
    struct Hashes(HashMap<u64, BlockHash>);

    #[async_trait]
    impl ChainSource for Hashes {
        async fn hash_at(&self, height: u64) -> Result<BlockHash, SourceError> {
            self.0.get(&height).cloned().ok_or(SourceError::Rpc {
                method: "getblockhash".into(),
                code: -5,
                message: "out of range".into(),
            })
        }

        async fn block_at(&self, _hash: &BlockHash) -> Result<RawBlock, SourceError> {
            unreachable!("resolver never fetches blocks")
        }

        async fn tip_height(&self) -> Result<u64, SourceError> {
            Ok(self.0.keys().copied().max().unwrap_or(0))
        }
    }

    fn chain(prefix: &str, fork_at: u64, len: u64) -> Hashes {
        Hashes(
            (0..len)
                .map(|h| {
                    let branch = if h < fork_at { "a" } else { prefix };
                    (h, BlockHash::new(format!("{branch}-{h}")))
                })
                .collect(),
        )
    }

    fn ledger_on_a(len: u64) -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        for h in 0..len {
            ledger.mark_done(h, &BlockHash::new(format!("a-{h}"))).unwrap();
        }
        ledger
    }

    fn writer(tmp: &TempDir) -> PartitionedWriter {
        PartitionedWriter::new(tmp.path(), NonZeroU64::new(10).unwrap(), 3).unwrap()
    }

    #[tokio::test]
    async fn genesis_and_first_run_are_linked() {
        let tmp = TempDir::new().unwrap();
        let w = writer(&tmp);
        let source = chain("b", 0, 3);
        let mut ledger = MemoryLedger::new();
        let mut resolver = ReorgResolver::new(&source, &mut ledger, &w);
        assert_eq!(resolver.resolve(0, None).await.unwrap(), Continuity::Linked);
        let other = BlockHash::from("zzz");
        assert_eq!(resolver.resolve(5, Some(&other)).await.unwrap(), Continuity::Linked);
    }

    #[tokio::test]
    async fn matching_parent_is_linked() {
        let tmp = TempDir::new().unwrap();
        let w = writer(&tmp);
        let source = chain("a", 0, 4);
        let mut ledger = ledger_on_a(3);
        let parent = BlockHash::from("a-2");
        let mut resolver = ReorgResolver::new(&source, &mut ledger, &w);
        assert_eq!(resolver.resolve(3, Some(&parent)).await.unwrap(), Continuity::Linked);
        assert_eq!(ledger.max_height(), Some(2));
    }

    #[tokio::test]
    async fn divergence_rewinds_to_fork_point() {
        let tmp = TempDir::new().unwrap();
        let w = writer(&tmp);
        let source = chain("b", 2, 6);
        let mut ledger = ledger_on_a(5);
        let parent = BlockHash::from("b-4");
        let outcome = ReorgResolver::new(&source, &mut ledger, &w)
            .resolve(5, Some(&parent))
            .await
            .unwrap();
        assert_eq!(outcome, Continuity::Rewound { resume_height: 2, removed: vec![2, 3, 4] });
        assert_eq!(ledger.max_height(), Some(1));
    }

    #[tokio::test]
    async fn total_divergence_rolls_back_to_genesis() {
        let tmp = TempDir::new().unwrap();
        let w = writer(&tmp);
        let source = chain("b", 0, 4);
        let mut ledger = ledger_on_a(3);
        let parent = BlockHash::from("b-2");
        let outcome = ReorgResolver::new(&source, &mut ledger, &w)
            .resolve(3, Some(&parent))
            .await
            .unwrap();
        assert_eq!(outcome, Continuity::Rewound { resume_height: 0, removed: vec![0, 1, 2] });
        assert_eq!(ledger.max_height(), None);
    }

    #[tokio::test]
    async fn walk_skips_heights_without_hash() {
        let tmp = TempDir::new().unwrap();
        let w = writer(&tmp);
        let source = chain("b", 2, 6);
        let mut ledger = ledger_on_a(5);
        ledger.clear_from(3).unwrap();
        ledger.mark_done_without_hash(3);
        ledger.mark_done(4, &BlockHash::from("a-4")).unwrap();

        let resolver = ReorgResolver::new(&source, &mut ledger, &w);
        assert_eq!(resolver.find_fork_point(4).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn roll_back_deletes_dataset_files() {
        use chrono::{TimeZone, Utc};
        use onchain_core::types::BlockRecord;

        let tmp = TempDir::new().unwrap();
        let w = writer(&tmp);
        for h in 0..3u64 {
            let record = BlockRecord {
                height: h,
                hash: BlockHash::new(format!("a-{h}")),
                time_utc: Utc.timestamp_opt(0, 0).unwrap(),
                version: 1,
                merkle_root: String::new(),
                nonce: 0,
                bits: String::new(),
                size: 0,
                weight: 0,
                tx_count: 0,
            };
            w.flush(0, &[record], h).unwrap();
        }
        let source = chain("a", 0, 3);
        let mut ledger = ledger_on_a(3);
        let removed = ReorgResolver::new(&source, &mut ledger, &w).roll_back(1).unwrap();
        assert_eq!(removed, vec![1, 2]);
        assert!(w.file_path(Dataset::Blocks, 0).exists());
        assert!(!w.file_path(Dataset::Blocks, 1).exists());
        assert!(!w.file_path(Dataset::Blocks, 2).exists());
    }
}
