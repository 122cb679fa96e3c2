//! End-to-end test suite for onchain ingestion.
//!
//! Drives the real sync driver, ledger and Parquet writer against a
//! scripted in-memory chain that can be swapped mid-test to simulate
//! reorganizations of any depth.

pub mod helpers;
