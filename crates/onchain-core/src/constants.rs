//! Ingestion constants. All monetary values in sats (1 coin = 10^8 sats).

pub const SATS_PER_COIN: i64 = 100_000_000;

/// Schema version stamped into every dataset file's metadata.
pub const SCHEMA_VERSION: &str = "ingest.v1";

/// Metadata key carrying [`SCHEMA_VERSION`].
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Directory (under the data root) holding per-height markers.
pub const MARKER_DIR: &str = "_markers";

/// Cached ledger summary inside [`MARKER_DIR`].
pub const LEDGER_STATE_FILE: &str = "state.json";

/// Extension of a completed-height marker.
pub const MARKER_EXT: &str = "done";

/// Extension of dataset files.
pub const DATASET_EXT: &str = "parquet";

/// Width of the zero-padded height in a file token.
pub const TOKEN_HEIGHT_WIDTH: usize = 12;

/// RPC error codes the node uses for "busy, try again".
///
/// -28: warming up, -10: in initial block download, -8: height out of range
/// (seen briefly near the tip while the node catches up).
pub const RETRYABLE_RPC_CODES: &[i64] = &[-28, -10, -8];

/// Verbosity for `getblock` that includes decoded transactions.
pub const FULL_BLOCK_VERBOSITY: u8 = 2;

pub const DEFAULT_HEIGHT_BUCKET_SIZE: u64 = 1_000;
pub const DEFAULT_MAX_BLOCKS_PER_RUN: u64 = 2_000;
pub const DEFAULT_IO_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_MAX_REWINDS_PER_RUN: u32 = 64;
pub const DEFAULT_ZSTD_LEVEL: i32 = 6;
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8332";
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RPC_MAX_ATTEMPTS: u32 = 5;
