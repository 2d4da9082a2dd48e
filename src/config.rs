//! Configuration for sniperkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SniperError};
use crate::pow2;

/// Upper bound on the number of shards (one open file per shard)
pub const MAX_SHARDS: usize = 1 << 16;

/// Main configuration for a sniperkv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST           (format version + shard count)
    ///     ├── shard_00000.kv
    ///     ├── shard_00001.kv
    ///     └── ...
    pub data_dir: PathBuf,

    /// Requested number of shards, rounded up to a power of two on open.
    /// Ignored when reopening a directory whose manifest already fixes it.
    pub shard_count: usize,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: when shard files are forced to stable storage
    pub sync_strategy: SyncStrategy,

    /// Destination for [`Store::backup`](crate::Store::backup).
    /// `None` means the sibling directory `<data_dir>.backup`.
    pub backup_dir: Option<PathBuf>,
}

/// Shard file sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync the shard file after every mutation (safest, slowest)
    EveryWrite,

    /// fsync dirty shard files from a background thread on a fixed interval
    Interval(Duration),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sniper_data"),
            shard_count: 256,
            sync_strategy: SyncStrategy::Interval(Duration::from_secs(1)),
            backup_dir: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Shard count after power-of-two rounding
    pub fn resolved_shard_count(&self) -> Result<usize> {
        let (_, count) = pow2::size_for(self.shard_count as u64);
        if count == 0 {
            return Err(SniperError::Config("shard count must be at least 1".to_string()));
        }
        if count > MAX_SHARDS as u64 {
            return Err(SniperError::Config(format!(
                "shard count {} exceeds maximum {}",
                self.shard_count, MAX_SHARDS
            )));
        }
        Ok(count as usize)
    }

    /// Directory that [`Store::backup`](crate::Store::backup) writes to
    pub fn resolved_backup_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.backup_dir {
            return Ok(dir.clone());
        }
        let name = self.data_dir.file_name().ok_or_else(|| {
            SniperError::Config(format!(
                "cannot derive a backup directory from {:?}",
                self.data_dir
            ))
        })?;
        let mut name = name.to_os_string();
        name.push(".backup");
        Ok(self.data_dir.with_file_name(name))
    }

    /// A zero interval behaves like `EveryWrite`
    pub(crate) fn sync_on_write(&self) -> bool {
        match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::Interval(interval) => interval.is_zero(),
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all shard files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the requested shard count (rounded up to a power of two)
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the sync interval; zero means sync on every write
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_strategy = if interval.is_zero() {
            SyncStrategy::EveryWrite
        } else {
            SyncStrategy::Interval(interval)
        };
        self
    }

    /// Set the backup destination directory
    pub fn backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backup_dir = Some(path.into());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
