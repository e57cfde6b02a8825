//! Write-new-then-swap helpers for on-disk artifacts.
//!
//! A staged file lives next to its target with a `.tmp` suffix. Committing
//! renames it over the target, so readers only ever see a complete old copy
//! or a complete new one.

use std::{
    ffi::OsString,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::Result;

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to the staging path for `path` and flush it to disk.
pub(crate) fn write_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

pub(crate) fn commit(staged: &Path, path: &Path) -> Result<()> {
    std::fs::rename(staged, path)?;
    Ok(())
}

/// Remove a staged file left behind by a failed write.
pub(crate) fn discard(staged: &Path) {
    if let Err(e) = std::fs::remove_file(staged)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            path = %staged.display(),
            error = %e,
            "could not remove staged file"
        );
    }
}
