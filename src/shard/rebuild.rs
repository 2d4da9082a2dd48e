//! Shard Rebuild
//!
//! Reconstructs a shard's index and free-list by scanning its file.
//!
//! This will:
//! 1. Walk the file slot by slot using each header's size class
//! 2. Index every live record by the digest of its key (CRC checked)
//! 3. Feed every free slot into the free-list
//! 4. Resolve duplicate live copies of one key by write sequence
//! 5. Truncate a torn append at the end of the file, or zero-fill its
//!    padding when the record itself made it to disk
//!
//! Any repair is synced before the shard is handed out.

use std::fs::File;
use std::io::{BufReader, Read};

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::addr;
use crate::error::{Result, SniperError};
use crate::file;
use crate::hash;

use super::free_list::FreeList;
use super::record::{self, RecordHeader};
use super::{HEADER_SIZE, STATUS_FREE};

const SCAN_BUFFER: usize = 1 << 20;

/// Result of a shard rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Live records indexed
    pub live: usize,

    /// Free slots recovered into the free-list
    pub free: usize,

    /// Stale live copies freed in favour of a newer write of the same key
    pub duplicates: usize,

    /// Bytes of partial slot cut from the end of the file
    pub truncated_bytes: u64,

    /// Zero padding restored after a complete final record
    pub padded_bytes: u64,
}

impl RebuildStats {
    /// True if the scan rewrote any part of the file
    pub fn repaired(&self) -> bool {
        self.duplicates > 0 || self.truncated_bytes > 0 || self.padded_bytes > 0
    }
}

/// How a final slot that runs past the end of the file is handled
enum Tail {
    /// Header and payload are incomplete: an append cut short
    Torn,
    /// Header and payload are on disk, only padding is missing
    Unpadded,
}

/// In-memory shard state recovered from disk
pub(crate) struct Rebuilt {
    pub index: FxHashMap<u32, u32>,
    pub free: FreeList,
    pub watermark: u64,
    pub next_seq: u64,
    pub stats: RebuildStats,
}

/// Scan `file` from the start and rebuild its index and free-list
pub(crate) fn scan(file: &File) -> Result<Rebuilt> {
    let mut len = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(SCAN_BUFFER, file);

    let mut index: FxHashMap<u32, u32> = FxHashMap::default();
    let mut seqs: FxHashMap<u32, u64> = FxHashMap::default();
    let mut free = FreeList::new();
    let mut stats = RebuildStats::default();
    let mut next_seq = 0u64;
    let mut offset = 0u64;
    let mut header_buf = [0u8; HEADER_SIZE];

    while len - offset >= HEADER_SIZE as u64 {
        reader.read_exact(&mut header_buf)?;
        let header = RecordHeader::decode(&header_buf);
        header.validate(offset)?;

        let slot_len = header.slot_len();
        let slot_end = offset + slot_len;
        let mut pad_to = None;
        if slot_end > len {
            match classify_tail(&header, offset, len)? {
                Tail::Torn => break,
                Tail::Unpadded => pad_to = Some(slot_end),
            }
        }

        let consumed = if header.is_live() {
            let mut payload = vec![0u8; header.payload_len() as usize];
            reader.read_exact(&mut payload)?;
            let record = header.decode_payload(payload, offset)?;
            next_seq = next_seq.max(header.seq + 1);

            // checksum passed, so the short slot is a real record
            if let Some(end) = pad_to {
                warn!(offset, padded = end - len, "restoring padding of final slot");
                file.set_len(end)?;
                stats.padded_bytes = end - len;
                len = end;
            }

            let digest = hash::digest(&record.key);
            let word = addr::pack(offset, header.class);
            match index.insert(digest, word) {
                None => {
                    seqs.insert(digest, header.seq);
                    stats.live += 1;
                }
                Some(previous) => {
                    let previous_seq = seqs.get(&digest).copied().unwrap_or_default();
                    let previous_key = record::read_key(file, addr::offset(previous))?;
                    if previous_key != record.key {
                        return Err(SniperError::CorruptState(format!(
                            "live records at offsets {} and {} share digest {:#010x}",
                            addr::offset(previous),
                            offset,
                            digest
                        )));
                    }

                    let (stale, newest_seq) = if header.seq > previous_seq {
                        (previous, header.seq)
                    } else {
                        index.insert(digest, previous);
                        (word, previous_seq)
                    };
                    seqs.insert(digest, newest_seq);

                    warn!(
                        offset = addr::offset(stale),
                        digest, "freeing stale copy left by an interrupted relocation"
                    );
                    file::write_at_pos(file, &[STATUS_FREE], Some(addr::offset(stale)))?;
                    free.push(addr::class(stale), addr::offset(stale));
                    stats.duplicates += 1;
                    stats.free += 1;
                }
            }
            HEADER_SIZE as u64 + header.payload_len()
        } else {
            free.push(header.class, offset);
            stats.free += 1;
            HEADER_SIZE as u64
        };

        reader.seek_relative((slot_len - consumed) as i64)?;
        offset += slot_len;
    }

    if offset < len {
        let truncated = len - offset;
        warn!(offset, truncated, "truncating partial slot at end of shard file");
        file.set_len(offset)?;
        stats.truncated_bytes = truncated;
    }

    if stats.repaired() {
        file.sync_data()?;
    }

    Ok(Rebuilt {
        index,
        free,
        watermark: offset,
        next_seq,
        stats,
    })
}

/// Decide whether a final slot overrunning the file is a torn append.
///
/// Appends always write live records, so a free header here is corruption.
/// A live record whose header and payload fit is left for the checksum to
/// judge; a corrupt class byte fails it.
fn classify_tail(header: &RecordHeader, offset: u64, len: u64) -> Result<Tail> {
    if !header.is_live() {
        return Err(SniperError::CorruptState(format!(
            "free slot of {} bytes at offset {} runs past end of file ({} bytes)",
            header.slot_len(),
            offset,
            len
        )));
    }
    if offset + HEADER_SIZE as u64 + header.payload_len() > len {
        return Ok(Tail::Torn);
    }
    Ok(Tail::Unpadded)
}
