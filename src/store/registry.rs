//! Process-wide registry of open store directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::{const_mutex, Mutex};

use crate::error::{Result, SniperError};

/// Canonical paths of directories held by a live `Store`
static OPEN_STORES: Mutex<BTreeSet<PathBuf>> = const_mutex(BTreeSet::new());

/// Claim on a store directory, released on drop
#[derive(Debug)]
pub(crate) struct Registration {
    dir: PathBuf,
}

impl Registration {
    /// Claim `dir` (canonical), failing if another store holds it
    pub(crate) fn acquire(dir: &Path) -> Result<Self> {
        let mut open = OPEN_STORES.lock();
        if !open.insert(dir.to_path_buf()) {
            return Err(SniperError::StoreOpen(dir.to_path_buf()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        OPEN_STORES.lock().remove(&self.dir);
    }
}

/// Run `f` while no store holds `dir` (canonical); opens of `dir` wait for it
pub(crate) fn while_closed<T, F>(dir: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let open = OPEN_STORES.lock();
    if open.contains(dir) {
        return Err(SniperError::StoreOpen(dir.to_path_buf()));
    }
    f()
}
