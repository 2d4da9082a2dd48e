//! Store Module
//!
//! The public entry point: owns the fixed array of shards and routes every
//! operation to the shard picked by the key's digest.
//!
//! ## Responsibilities
//! - Create or reopen a store directory and rebuild every shard
//! - Route Get/Set/Delete/Incr/Decr by `digest % shard_count`
//! - Aggregate counts and walk across shards, one shard at a time
//! - Run the background sync worker for interval durability
//! - Backup, restore and delete whole store directories

mod backup;
mod manifest;
mod registry;
mod syncer;

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, SniperError};
use crate::hash;
use crate::shard::{Direction, RebuildStats, Shard};

pub use backup::{restore_store, BACKUP_MARKER};
pub use manifest::{Manifest, FORMAT_VERSION, MANIFEST_FILENAME};

use registry::Registration;
use syncer::SyncWorker;

/// An open store
///
/// ## Concurrency Model: sharded Single-Writer / Multiple-Reader
///
/// - Each shard has its own RwLock; operations on keys in different shards
///   never contend.
/// - Within a shard, Get runs concurrently with other Gets; Set/Delete/Incr/
///   Decr are exclusive.
/// - Count, Walk, Backup and Sync visit shards one after another, each under
///   that shard's own lock. Their result is not a snapshot of the whole store.
pub struct Store {
    /// Store configuration
    config: Config,

    /// Canonical store directory
    data_dir: PathBuf,

    /// Shards, indexed by `digest % len`; shared with the sync worker
    shards: Arc<[Shard]>,

    /// Present for `SyncStrategy::Interval`
    syncer: Option<SyncWorker>,

    /// Keeps other `Store`s in this process off the directory
    _registration: Registration,
}

impl Store {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const SHARD_PREFIX: &'static str = "shard_";
    const SHARD_EXTENSION: &'static str = "kv";

    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Create the data directory if it doesn't exist
    /// 2. Claim the directory for this process
    /// 3. Fix the shard count (manifest, else config)
    /// 4. Open every shard, rebuilding its index by scanning its file
    /// 5. Start the background sync worker if configured
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let data_dir = fs::canonicalize(&config.data_dir)?;
        let registration = Registration::acquire(&data_dir)?;

        let shard_count = Self::resolve_shard_count(&config, &data_dir)?;

        let mut shards = Vec::with_capacity(shard_count);
        let mut recovered = RebuildStats::default();
        for id in 0..shard_count {
            let path = Self::shard_path_with_dir(&data_dir, id);
            let (shard, stats) = Shard::open(id, &path, config.sync_on_write())?;

            recovered.live += stats.live;
            recovered.free += stats.free;
            recovered.duplicates += stats.duplicates;
            recovered.truncated_bytes += stats.truncated_bytes;
            recovered.padded_bytes += stats.padded_bytes;
            shards.push(shard);
        }
        let shards: Arc<[Shard]> = shards.into();

        let syncer = match config.sync_strategy {
            SyncStrategy::Interval(interval) if !interval.is_zero() => {
                Some(SyncWorker::spawn(Arc::clone(&shards), interval)?)
            }
            _ => None,
        };

        info!(
            dir = ?data_dir,
            shards = shard_count,
            keys = recovered.live,
            free_slots = recovered.free,
            duplicates = recovered.duplicates,
            truncated_bytes = recovered.truncated_bytes,
            padded_bytes = recovered.padded_bytes,
            "store opened"
        );

        Ok(Self {
            config,
            data_dir,
            shards,
            syncer,
            _registration: registration,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder().data_dir(path.as_ref()).build();
        Self::open(config)
    }

    /// Get the value stored for `key`
    ///
    /// Fails with `KeyNotFound` if absent and `Collision` if the key's digest
    /// belongs to a different key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let digest = hash::digest(key);
        self.shard_for_digest(digest)
            .lookup(digest, key)?
            .ok_or(SniperError::KeyNotFound)
    }

    /// Set `key` to `value` (last write wins)
    ///
    /// Fails with `Collision`, leaving the stored record untouched, if the
    /// key's digest belongs to a different key.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let digest = hash::digest(key);
        self.shard_for_digest(digest).upsert(digest, key, value)
    }

    /// Delete `key`, returning whether it was present
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let digest = hash::digest(key);
        self.shard_for_digest(digest).remove(digest, key)
    }

    /// Add `delta` to the counter at `key` (absent counts as 0), wrapping on overflow
    pub fn incr(&self, key: &[u8], delta: u64) -> Result<u64> {
        let digest = hash::digest(key);
        self.shard_for_digest(digest)
            .incr_decr(digest, key, delta, Direction::Incr)
    }

    /// Subtract `delta` from the counter at `key` (absent counts as 0), wrapping below zero
    pub fn decr(&self, key: &[u8], delta: u64) -> Result<u64> {
        let digest = hash::digest(key);
        self.shard_for_digest(digest)
            .incr_decr(digest, key, delta, Direction::Decr)
    }

    /// Number of live keys across all shards
    pub fn count(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    /// Visit every live key/value pair until the visitor returns `Break`
    ///
    /// Shards are visited in index order; order within a shard is unspecified.
    pub fn walk<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    {
        for shard in self.shards.iter() {
            if shard.walk(&mut visitor)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Force every modified shard file to stable storage
    pub fn sync(&self) -> Result<()> {
        for shard in self.shards.iter() {
            shard.sync()?;
        }
        Ok(())
    }

    /// Close the store gracefully
    ///
    /// Stops the sync worker, then syncs every shard file to disk.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut syncer) = self.syncer.take() {
            syncer.stop();
        }
        self.sync()?;

        info!(dir = ?self.data_dir, keys = self.count(), "store closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the canonical data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard `key` routes to
    pub fn shard_index(&self, key: &[u8]) -> usize {
        hash::shard_for(hash::digest(key), self.shards.len())
    }

    /// Get a shard by index
    pub fn shard(&self, index: usize) -> Option<&Shard> {
        self.shards.get(index)
    }

    /// Total bytes of slots across all shard files
    pub fn file_size(&self) -> u64 {
        self.shards.iter().map(Shard::file_size).sum()
    }

    /// Reclaimed slots waiting for reuse across all shards
    pub fn free_slots(&self) -> usize {
        self.shards.iter().map(Shard::free_slots).sum()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn shard_for_digest(&self, digest: u32) -> &Shard {
        &self.shards[hash::shard_for(digest, self.shards.len())]
    }

    /// Shard count persisted in the manifest, or the configured one for a new store
    fn resolve_shard_count(config: &Config, dir: &Path) -> Result<usize> {
        let requested = config.resolved_shard_count()?;

        if let Some(manifest) = Manifest::load(dir)? {
            let persisted = manifest.shard_count as usize;
            if persisted != requested {
                warn!(
                    requested,
                    persisted, "shard count is fixed by the existing store, ignoring config"
                );
            }
            return Ok(persisted);
        }

        if Self::has_shard_files(dir)? {
            return Err(SniperError::CorruptState(format!(
                "shard files without a manifest in {:?}",
                dir
            )));
        }
        Manifest::new(requested).store(dir)?;
        Ok(requested)
    }

    fn has_shard_files(dir: &Path) -> Result<bool> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && Self::parse_shard_id(&path).is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Generate shard path given a directory and ID
    fn shard_path_with_dir(dir: &Path, id: usize) -> PathBuf {
        dir.join(format!("{}{:05}.{}", Self::SHARD_PREFIX, id, Self::SHARD_EXTENSION))
    }

    /// Parse shard ID from filename
    /// "shard_00042.kv" → Some(42)
    fn parse_shard_id(path: &Path) -> Option<usize> {
        if path.extension()? != Self::SHARD_EXTENSION {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix(Self::SHARD_PREFIX)?;
        id_str.parse().ok()
    }
}

/// Remove all on-disk state of the store at `path`
///
/// A missing directory is not an error. Fails with `StoreOpen` while a
/// `Store` in this process holds the directory.
pub fn delete_store(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(());
    }
    let dir = fs::canonicalize(path)?;

    registry::while_closed(&dir, || {
        fs::remove_dir_all(&dir)?;
        Ok(())
    })?;

    info!(dir = ?dir, "store deleted");
    Ok(())
}
