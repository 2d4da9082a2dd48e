//! Backup and restore
//!
//! A backup directory has the same layout as a store directory: a manifest
//! plus one file per shard, so it can be restored by plain copy. An empty
//! `BACKUP` marker file tells a backup apart from a store, so a later backup
//! may overwrite it while a store directory is never clobbered.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{Result, SniperError};

use super::manifest::Manifest;
use super::registry::{self, Registration};
use super::Store;

/// Marks a directory written by [`Store::backup_to`]; never copied by a restore
pub const BACKUP_MARKER: &str = "BACKUP";

impl Store {
    /// Back up into the configured backup directory (default `<data_dir>.backup`)
    ///
    /// Returns the directory written to.
    pub fn backup(&self) -> Result<std::path::PathBuf> {
        let dest = self.config.resolved_backup_dir()?;
        self.backup_to(&dest)?;
        Ok(dest)
    }

    /// Copy every shard file, one shard at a time, into `dest`
    ///
    /// Each shard is copied under its read lock, so the copy of a shard is a
    /// point-in-time image of it; writers to that shard wait for the copy.
    ///
    /// `dest` must be empty or hold an earlier backup, and is claimed for the
    /// duration of the copy: a directory held by an open `Store` fails with
    /// `StoreOpen` and cannot be opened until the backup finishes.
    pub fn backup_to(&self, dest: impl AsRef<Path>) -> Result<()> {
        fs::create_dir_all(dest.as_ref())?;
        let dest = fs::canonicalize(dest.as_ref())?;
        if dest == self.data_dir {
            return Err(SniperError::Config(format!(
                "backup destination {:?} is the store directory",
                dest
            )));
        }

        let _claim = Registration::acquire(&dest)?;
        ensure_backup_target(&dest)?;
        fs::write(dest.join(BACKUP_MARKER), b"")?;
        Manifest::new(self.shards.len()).store(&dest)?;

        let mut bytes = 0u64;
        for shard in self.shards.iter() {
            bytes += shard.copy_to(&Self::shard_path_with_dir(&dest, shard.id()))?;
        }

        info!(dest = ?dest, shards = self.shards.len(), bytes, "backup complete");
        Ok(())
    }
}

/// Refuse to overwrite anything but an empty directory or an earlier backup
fn ensure_backup_target(dest: &Path) -> Result<()> {
    if dest.join(BACKUP_MARKER).is_file() || fs::read_dir(dest)?.next().is_none() {
        return Ok(());
    }
    Err(SniperError::Config(format!(
        "backup destination {:?} is neither empty nor an earlier backup",
        dest
    )))
}

/// Restore the backup in `backup` into `target`
///
/// `target` must be absent or empty and not held by an open `Store`. The
/// manifest is written last, so an interrupted restore is refused on open.
pub fn restore_store(backup: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
    let backup = backup.as_ref();
    let manifest = Manifest::load(backup)?.ok_or_else(|| {
        SniperError::CorruptState(format!("no manifest in backup {:?}", backup))
    })?;

    fs::create_dir_all(target.as_ref())?;
    let target = fs::canonicalize(target.as_ref())?;

    registry::while_closed(&target, || {
        if fs::read_dir(&target)?.next().is_some() {
            return Err(SniperError::Config(format!(
                "restore target {:?} is not empty",
                target
            )));
        }

        for id in 0..manifest.shard_count as usize {
            fs::copy(
                Store::shard_path_with_dir(backup, id),
                Store::shard_path_with_dir(&target, id),
            )?;
        }
        manifest.store(&target)
    })?;

    info!(from = ?backup, to = ?target, shards = manifest.shard_count, "store restored");
    Ok(())
}
