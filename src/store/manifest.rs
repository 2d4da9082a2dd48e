//! Store manifest
//!
//! Records the shard count a directory was created with, so a reopen routes
//! every key to the shard file that holds it.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::MAX_SHARDS;
use crate::error::{Result, SniperError};

pub const MANIFEST_FILENAME: &str = "MANIFEST";
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub shard_count: u32,
}

impl Manifest {
    pub fn new(shard_count: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            shard_count: shard_count as u32,
        }
    }

    /// Read the manifest in `dir`, `None` if there is none
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(dir.join(MANIFEST_FILENAME)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest =
            bincode::deserialize(&bytes).map_err(|e| SniperError::Serialization(e.to_string()))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(SniperError::CorruptState(format!(
                "unsupported format version {} in {:?}",
                manifest.format_version, dir
            )));
        }
        let count = manifest.shard_count as usize;
        if count == 0 || !count.is_power_of_two() || count > MAX_SHARDS {
            return Err(SniperError::CorruptState(format!(
                "invalid shard count {} in {:?}",
                count, dir
            )));
        }
        Ok(Some(manifest))
    }

    /// Write the manifest into `dir` (temp file + rename)
    pub fn store(&self, dir: &Path) -> Result<()> {
        let bytes = bincode::serialize(self).map_err(|e| SniperError::Serialization(e.to_string()))?;

        let tmp = dir.join(MANIFEST_TMP_FILENAME);
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dir.join(MANIFEST_FILENAME))?;
        Ok(())
    }
}
