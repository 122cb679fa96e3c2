//! # onchain-core
//! Foundation types and traits for onchain ingestion.
//!
//! - [`raw`]: block payloads as served by the chain source
//! - [`types`]: the four relational record kinds and dataset naming
//! - [`decode`]: pure mapping from a raw block to records
//! - [`ledger`]: the [`HeightLedger`](ledger::HeightLedger) contract and an in-memory impl
//! - [`traits`]: the [`ChainSource`](traits::ChainSource) contract

pub mod constants;
pub mod decode;
pub mod error;
pub mod ledger;
pub mod raw;
pub mod traits;
pub mod types;
