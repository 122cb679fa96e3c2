//! Write-then-rename file replacement.
//!
//! Content goes to a uniquely named temporary file in the target's own
//! directory (so the rename never crosses a filesystem), is fsynced, and is
//! then renamed over the target. The directory is fsynced after the rename
//! so the new entry survives power loss. A reader sees either the old file
//! or the complete new one. On any failure the temporary file is dropped,
//! which deletes it.

use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Replace `target` with whatever `write` puts into the provided file.
///
/// Creates the parent directory if needed.
pub fn write_atomic<E, F>(target: &Path, write: F) -> Result<(), E>
where
    E: From<io::Error>,
    F: FnOnce(&mut File) -> Result<(), E>,
{
    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let prefix = match target.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => ".tmp.".to_owned(),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;

    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| E::from(e.error))?;
    sync_dir(dir)?;
    Ok(())
}

/// Flush a directory's entries to disk.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directories cannot be opened for syncing here; renames are left to the OS.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// [`write_atomic`] for an in-memory byte buffer.
pub fn write_bytes_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(target, |file: &mut File| {
        use std::io::Write as _;
        file.write_all(bytes)
    })
}
