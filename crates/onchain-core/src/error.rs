//! Error types shared by every ingestion component.
use std::path::PathBuf;

use thiserror::Error;

use crate::constants::RETRYABLE_RPC_CODES;

/// Failure talking to the chain-data source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("transport failure calling {method}: {message}")] Transport { method: String, message: String },
    #[error("RPC error calling {method}: code={code} message={message}")] Rpc { method: String, code: i64, message: String },
    #[error("malformed response from {method}: {message}")] Malformed { method: String, message: String },
    #[error("{method} failed after {attempts} attempts: {last}")] RetriesExhausted { method: String, attempts: u32, last: Box<SourceError> },
}

impl SourceError {
    /// Whether the call may succeed if repeated unchanged.
    ///
    /// Transport faults and a short whitelist of "node busy" RPC codes are
    /// transient; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Rpc { code, .. } => RETRYABLE_RPC_CODES.contains(code),
            Self::Malformed { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// A raw block that cannot be turned into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("block at height {height} is missing required field `{field}`")] MissingField { height: u64, field: &'static str },
    #[error("block at height {height} has invalid {field}: {value}")] InvalidValue { height: u64, field: &'static str, value: String },
}

/// Failure reading or updating the height ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger i/o at {path}: {source}")] Io { path: PathBuf, source: std::io::Error },
    #[error("ledger state at {path} is corrupt: {source}")] State { path: PathBuf, source: serde_json::Error },
}
