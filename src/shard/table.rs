//! Shard implementation
//!
//! Digest-keyed index over a slot file, guarded by one RwLock.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::addr;
use crate::error::{Result, SniperError};
use crate::file;

use super::free_list::FreeList;
use super::rebuild::{self, RebuildStats};
use super::record::{self, Record};
use super::STATUS_FREE;

/// Chunk size used when copying a shard file for backup
const COPY_CHUNK: usize = 1 << 20;

/// Direction of a counter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incr,
    Decr,
}

/// One independently locked partition of the store
///
/// ## Concurrency:
/// - `state`: RwLock. `lookup`, `walk` and `copy_to` share it and read the
///   file with positional reads; `upsert`, `remove` and `incr_decr` hold it
///   exclusively for their whole read-compare-allocate-write sequence.
/// - `dirty`: set by writes, cleared by `sync` (lock-free)
pub struct Shard {
    id: usize,
    path: PathBuf,
    sync_on_write: bool,
    dirty: AtomicBool,
    state: RwLock<ShardState>,
}

struct ShardState {
    file: File,
    /// digest -> packed (offset, class)
    index: FxHashMap<u32, u32>,
    free: FreeList,
    /// End of the last slot; always equal to the file length
    watermark: u64,
    next_seq: u64,
}

/// A slot handed out by the allocator
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    class: u8,
    /// Beyond the watermark, so it still has to be appended
    fresh: bool,
}

impl Shard {
    /// Open or create the shard file at `path` and rebuild its index
    pub fn open(id: usize, path: &Path, sync_on_write: bool) -> Result<(Self, RebuildStats)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let rebuilt = rebuild::scan(&file)?;
        debug!(
            shard = id,
            live = rebuilt.stats.live,
            free = rebuilt.stats.free,
            bytes = rebuilt.watermark,
            "shard rebuilt"
        );

        let shard = Self {
            id,
            path: path.to_path_buf(),
            sync_on_write,
            dirty: AtomicBool::new(false),
            state: RwLock::new(ShardState {
                file,
                index: rebuilt.index,
                free: rebuilt.free,
                watermark: rebuilt.watermark,
                next_seq: rebuilt.next_seq,
            }),
        };
        Ok((shard, rebuilt.stats))
    }

    /// Value stored for `key`, `None` if the digest is unmapped.
    ///
    /// Fails with `Collision` if the digest belongs to another key.
    pub fn lookup(&self, digest: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        Ok(state.lookup(digest, key)?.map(|record| record.value))
    }

    /// Insert or overwrite `key`
    pub fn upsert(&self, digest: u32, key: &[u8], value: &[u8]) -> Result<()> {
        let class = record::class_for(key, value)?;

        let mut state = self.state.write();
        state.upsert(self.id, digest, key, value, class)?;
        self.after_write(&state)
    }

    /// Remove `key`, reporting whether it was present
    pub fn remove(&self, digest: u32, key: &[u8]) -> Result<bool> {
        let mut state = self.state.write();

        let Some(word) = state.index.get(&digest).copied() else {
            return Ok(false);
        };
        state.check_key(digest, word, key)?;
        state.release(addr::offset(word), addr::class(word))?;
        state.index.remove(&digest);

        self.after_write(&state)?;
        Ok(true)
    }

    /// Add or subtract `delta` from the counter at `key` (absent = 0), wrapping
    pub fn incr_decr(
        &self,
        digest: u32,
        key: &[u8],
        delta: u64,
        direction: Direction,
    ) -> Result<u64> {
        let mut state = self.state.write();

        let current = match state.lookup(digest, key)? {
            Some(record) => decode_counter(&record.value)?,
            None => 0,
        };
        let next = match direction {
            Direction::Incr => current.wrapping_add(delta),
            Direction::Decr => current.wrapping_sub(delta),
        };

        let value = next.to_be_bytes();
        let class = record::class_for(key, &value)?;
        state.upsert(self.id, digest, key, &value, class)?;
        self.after_write(&state)?;
        Ok(next)
    }

    /// Visit every live record until the visitor breaks.
    ///
    /// The digests are snapshotted first; each record is then read under the
    /// read lock and handed to the visitor after the lock is released, so the
    /// visitor may call back into the store. Records removed after the
    /// snapshot are skipped.
    pub fn walk<F>(&self, visitor: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    {
        let digests: Vec<u32> = self.state.read().index.keys().copied().collect();

        for digest in digests {
            let record = {
                let state = self.state.read();
                match state.index.get(&digest) {
                    Some(&word) => record::read_record(&state.file, addr::offset(word))?,
                    None => continue,
                }
            };
            if visitor(&record.key, &record.value).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Force the shard file to stable storage if it changed since the last sync
    pub fn sync(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let state = self.state.read();
        if let Err(e) = state.file.sync_data() {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Copy the shard file to `dest` as of now, returning the bytes copied.
    ///
    /// Holds the read lock for the whole copy: writers to this shard wait,
    /// other shards are unaffected.
    pub fn copy_to(&self, dest: &Path) -> Result<u64> {
        let state = self.state.read();
        state.file.sync_data()?;

        let mut out = BufWriter::new(File::create(dest)?);
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut offset = 0u64;
        while offset < state.watermark {
            let n = (state.watermark - offset).min(COPY_CHUNK as u64) as usize;
            file::read_exact_at(&state.file, &mut buf[..n], offset)?;
            out.write_all(&buf[..n])?;
            offset += n as u64;
        }

        let out = out.into_inner().map_err(|e| SniperError::Io(e.into_error()))?;
        out.sync_all()?;
        Ok(state.watermark)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> usize {
        self.id
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of slots in the backing file
    pub fn file_size(&self) -> u64 {
        self.state.read().watermark
    }

    /// Reclaimed slots waiting for reuse
    pub fn free_slots(&self) -> usize {
        self.state.read().free.len()
    }

    /// Reclaimed slots of one size class
    pub fn free_slots_in_class(&self, class: u8) -> usize {
        self.state.read().free.class_len(class)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn after_write(&self, state: &ShardState) -> Result<()> {
        if self.sync_on_write {
            state.file.sync_data()?;
        } else {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl ShardState {
    fn lookup(&self, digest: u32, key: &[u8]) -> Result<Option<Record>> {
        let Some(&word) = self.index.get(&digest) else {
            return Ok(None);
        };
        let record = record::read_record(&self.file, addr::offset(word))?;
        if record.key != key {
            return Err(SniperError::Collision { digest });
        }
        Ok(Some(record))
    }

    /// Fail with `Collision` unless the record behind `word` belongs to `key`
    fn check_key(&self, digest: u32, word: u32, key: &[u8]) -> Result<()> {
        let stored = record::read_key(&self.file, addr::offset(word))?;
        if stored != key {
            return Err(SniperError::Collision { digest });
        }
        Ok(())
    }

    fn upsert(
        &mut self,
        shard: usize,
        digest: u32,
        key: &[u8],
        value: &[u8],
        class: u8,
    ) -> Result<()> {
        let Some(word) = self.index.get(&digest).copied() else {
            let offset = self.place(shard, class, key, value)?;
            self.index.insert(digest, addr::pack(offset, class));
            return Ok(());
        };

        self.check_key(digest, word, key)?;
        let (offset, slot_class) = (addr::offset(word), addr::class(word));

        if class <= slot_class {
            // Fits the current slot: overwrite in place, slot keeps its class
            let slot = Slot {
                offset,
                class: slot_class,
                fresh: false,
            };
            return self.write_record(slot, key, value);
        }

        // The new copy carries the higher seq, so once it is written it is
        // the record rebuild keeps. Index it before touching the old slot.
        let new_offset = self.place(shard, class, key, value)?;
        self.index.insert(digest, addr::pack(new_offset, class));
        if let Err(e) = self.release(offset, slot_class) {
            warn!(
                shard,
                offset,
                error = %e,
                "could not free relocated slot, rebuild will reclaim it"
            );
        }
        debug!(shard, from = slot_class, to = class, "record relocated");
        Ok(())
    }

    /// Allocate a slot of `class` and write the record into it
    fn place(&mut self, shard: usize, class: u8, key: &[u8], value: &[u8]) -> Result<u64> {
        let slot = self.allocate(shard, class)?;
        if let Err(e) = self.write_record(slot, key, value) {
            if !slot.fresh {
                self.free.push(slot.class, slot.offset);
            }
            return Err(e);
        }
        Ok(slot.offset)
    }

    /// Reuse a free slot of exactly `class`, else append at the watermark
    fn allocate(&mut self, shard: usize, class: u8) -> Result<Slot> {
        if let Some(offset) = self.free.pop(class) {
            return Ok(Slot {
                offset,
                class,
                fresh: false,
            });
        }

        let slot_len = 1u64 << class;
        if self.watermark + slot_len > addr::ADDRESSABLE_BYTES {
            return Err(SniperError::ShardFull { shard });
        }
        Ok(Slot {
            offset: self.watermark,
            class,
            fresh: true,
        })
    }

    fn write_record(&mut self, slot: Slot, key: &[u8], value: &[u8]) -> Result<()> {
        let buf = record::encode(slot.class, self.next_seq, key, value, slot.fresh);
        let (_, written) = file::write_at_pos(&self.file, &buf, Some(slot.offset))?;

        self.next_seq += 1;
        if slot.fresh {
            self.watermark += written as u64;
        }
        Ok(())
    }

    /// Mark the slot free on disk and hand it to the free-list
    fn release(&mut self, offset: u64, class: u8) -> Result<()> {
        file::write_at_pos(&self.file, &[STATUS_FREE], Some(offset))?;
        self.free.push(class, offset);
        Ok(())
    }
}

fn decode_counter(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| SniperError::InvalidCounter(value.len()))?;
    Ok(u64::from_be_bytes(bytes))
}
