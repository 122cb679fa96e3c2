//! Marker-file [`HeightLedger`].
//!
//! Layout under the data root:
//!
//! ```text
//! _markers/
//!   0.done          # content: committed block hash
//!   1.done
//!   state.json      # {"max_height": 1}, -1 when empty
//! ```
//!
//! Markers and the state file are both written atomically. `state.json` is
//! a cache: if it is missing on open, or names a height whose marker is
//! gone, it is rebuilt from the marker set. Rollback lowers the cached max
//! before unlinking markers, so after a crash it can only lag the markers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use onchain_core::constants::{LEDGER_STATE_FILE, MARKER_DIR, MARKER_EXT};
use onchain_core::error::LedgerError;
use onchain_core::ledger::HeightLedger;
use onchain_core::types::BlockHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::atomic::write_bytes_atomic;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct LedgerState {
    max_height: i64,
}

impl LedgerState {
    fn from_max(max: Option<u64>) -> Self {
        Self { max_height: max.map_or(-1, |h| h as i64) }
    }

    fn max(self) -> Option<u64> {
        u64::try_from(self.max_height).ok()
    }
}

/// Directory of `<height>.done` files plus a cached max height.
#[derive(Debug)]
pub struct MarkerLedger {
    dir: PathBuf,
    max_height: Option<u64>,
}

impl MarkerLedger {
    /// Open (or create) the ledger under `data_root/_markers`.
    pub fn open(data_root: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = data_root.as_ref().join(MARKER_DIR);
        fs::create_dir_all(&dir).map_err(|source| LedgerError::Io { path: dir.clone(), source })?;

        let mut ledger = Self { dir, max_height: None };
        let state_path = ledger.state_path();
        match fs::read(&state_path) {
            Ok(bytes) => {
                let state: LedgerState = serde_json::from_slice(&bytes)
                    .map_err(|source| LedgerError::State { path: state_path.clone(), source })?;
                ledger.max_height = state.max();
                if let Some(max) = ledger.max_height {
                    if !ledger.is_done(max)? {
                        warn!(cached = max, "ledger state names a missing marker");
                        ledger.rebuild_state()?;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => ledger.rebuild_state()?,
            Err(source) => return Err(LedgerError::Io { path: state_path, source }),
        }
        Ok(ledger)
    }

    fn rebuild_state(&mut self) -> Result<(), LedgerError> {
        self.max_height = self.heights()?.last().copied();
        self.write_state()?;
        debug!(max_height = ?self.max_height, "rebuilt ledger state from markers");
        Ok(())
    }

    /// Directory holding the marker files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, height: u64) -> PathBuf {
        self.dir.join(format!("{height}.{MARKER_EXT}"))
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(LEDGER_STATE_FILE)
    }

    fn write_state(&self) -> Result<(), LedgerError> {
        let path = self.state_path();
        let bytes = serde_json::to_vec(&LedgerState::from_max(self.max_height))
            .map_err(|source| LedgerError::State { path: path.clone(), source })?;
        write_bytes_atomic(&path, &bytes).map_err(|source| LedgerError::Io { path, source })
    }
}

/// Height encoded in a marker file name, if it is one.
fn marker_height(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(MARKER_EXT)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

impl HeightLedger for MarkerLedger {
    fn is_done(&self, height: u64) -> Result<bool, LedgerError> {
        let path = self.marker_path(height);
        path.try_exists().map_err(|source| LedgerError::Io { path, source })
    }

    fn hash_for(&self, height: u64) -> Result<Option<BlockHash>, LedgerError> {
        let path = self.marker_path(height);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let hash = content.trim();
                Ok((!hash.is_empty()).then(|| BlockHash::from(hash)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LedgerError::Io { path, source }),
        }
    }

    fn mark_done(&mut self, height: u64, hash: &BlockHash) -> Result<(), LedgerError> {
        let path = self.marker_path(height);
        write_bytes_atomic(&path, hash.as_str().as_bytes())
            .map_err(|source| LedgerError::Io { path, source })?;
        if self.max_height.is_none_or(|max| height > max) {
            self.max_height = Some(height);
            self.write_state()?;
        }
        Ok(())
    }

    fn max_height(&self) -> Option<u64> {
        self.max_height
    }

    fn clear_from(&mut self, height: u64) -> Result<Vec<u64>, LedgerError> {
        let (kept, doomed): (Vec<u64>, Vec<u64>) =
            self.heights()?.into_iter().partition(|&h| h < height);

        // State first: an interrupted rollback must not leave a max above
        // the surviving markers.
        self.max_height = kept.last().copied();
        self.write_state()?;

        let mut removed = Vec::with_capacity(doomed.len());
        for h in doomed {
            let path = self.marker_path(h);
            match fs::remove_file(&path) {
                Ok(()) => removed.push(h),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(LedgerError::Io { path, source }),
            }
        }
        Ok(removed)
    }

    fn heights(&self) -> Result<Vec<u64>, LedgerError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|source| LedgerError::Io { path: self.dir.clone(), source })?;
        let mut heights = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LedgerError::Io { path: self.dir.clone(), source })?;
            if let Some(h) = entry.file_name().to_str().and_then(marker_height) {
                heights.push(h);
            }
        }
        heights.sort_unstable();
        Ok(heights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_names_parse() {
        assert_eq!(marker_height("12.done"), Some(12));
        assert_eq!(marker_height("0.done"), Some(0));
        assert_eq!(marker_height("state.json"), None);
        assert_eq!(marker_height(".done"), None);
        assert_eq!(marker_height("-1.done"), None);
        assert_eq!(marker_height(".12.done.tmp"), None);
    }

    #[test]
    fn state_round_trips_negative_sentinel() {
        assert_eq!(serde_json::to_string(&LedgerState::from_max(None)).unwrap(), r#"{"max_height":-1}"#);
        assert_eq!(LedgerState { max_height: -1 }.max(), None);
        assert_eq!(LedgerState { max_height: 9 }.max(), Some(9));
    }
}
