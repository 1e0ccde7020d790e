use crate::migrate::store::BankStore;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

const CURRENT_MARKER: &str = "current";

/// The `current` entry beside a production directory.
pub fn marker_path(prod_path: &Path) -> Option<PathBuf> {
    prod_path.parent().map(|parent| parent.join(CURRENT_MARKER))
}

/// True when anything sits at `path`, including a dangling symlink.
pub fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Point the bank at `session_id` when a `current` marker sits beside
/// `prod_path`. Returns whether the pointer moved.
pub fn resolve(
    store: &mut dyn BankStore,
    bank: &str,
    prod_path: &Path,
    session_id: i64,
) -> Result<bool> {
    let Some(marker) = marker_path(prod_path) else {
        return Ok(false);
    };
    if !entry_exists(&marker) {
        return Ok(false);
    }
    store.set_current(bank, session_id)?;
    Ok(true)
}
