//! Trait interfaces between the ingestion components.
//!
//! - [`ChainSource`]: read access to a chain-data node (implemented by the RPC client)
//!
//! The height ledger contract lives in [`crate::ledger`] next to its
//! in-memory implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::raw::RawBlock;
use crate::types::BlockHash;

/// Read-only view of the canonical chain as the node currently sees it.
///
/// Implementations apply their own retry policy; an error returned here is
/// final for the caller.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the canonical block at `height`.
    async fn hash_at(&self, height: u64) -> Result<BlockHash, SourceError>;

    /// Full block, transactions decoded, for `hash`.
    async fn block_at(&self, hash: &BlockHash) -> Result<RawBlock, SourceError>;

    /// Height of the current tip.
    async fn tip_height(&self) -> Result<u64, SourceError>;
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for &T {
    async fn hash_at(&self, height: u64) -> Result<BlockHash, SourceError> {
        (**self).hash_at(height).await
    }

    async fn block_at(&self, hash: &BlockHash) -> Result<RawBlock, SourceError> {
        (**self).block_at(hash).await
    }

    async fn tip_height(&self) -> Result<u64, SourceError> {
        (**self).tip_height().await
    }
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn hash_at(&self, height: u64) -> Result<BlockHash, SourceError> {
        (**self).hash_at(height).await
    }

    async fn block_at(&self, hash: &BlockHash) -> Result<RawBlock, SourceError> {
        (**self).block_at(hash).await
    }

    async fn tip_height(&self) -> Result<u64, SourceError> {
        (**self).tip_height().await
    }
}
