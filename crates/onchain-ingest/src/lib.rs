//! # onchain-ingest
//! Chain client, Parquet writer, ledger, sync driver.
//!
//! Composes the ingestion pipeline:
//! - [`rpc::RpcClient`]: JSON-RPC chain source with retry/backoff
//! - [`markers::MarkerLedger`]: marker-file height ledger
//! - [`writer::PartitionedWriter`]: atomic, height-bucketed Parquet files
//! - [`reorg::ReorgResolver`]: fork-point search and rollback
//! - [`sync::SyncDriver`]: range and tip-following runs
//! - [`config::IngestConfig`]: file + environment configuration
//! - [`progress`] and [`qa`]: read-side reporting and golden-day checks

pub mod atomic;
pub mod config;
pub mod error;
pub mod markers;
pub mod progress;
pub mod qa;
pub mod reorg;
pub mod retry;
pub mod rpc;
pub mod scan;
pub mod schema;
pub mod sync;
pub mod writer;

pub use config::IngestConfig;
pub use markers::MarkerLedger;
pub use rpc::RpcClient;
pub use sync::{SyncDriver, SyncLimits, SyncReport};
pub use writer::PartitionedWriter;
