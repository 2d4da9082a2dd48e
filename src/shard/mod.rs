//! Shard Module
//!
//! One independently locked partition of the key space: an in-memory index,
//! an append-mostly backing file and a free-list of reclaimed slots.
//!
//! ## Responsibilities
//! - Map key digests to packed (offset, size class) words
//! - Detect digest collisions by reading the stored key back
//! - Allocate power-of-two slots, reusing freed ones before appending
//! - Rebuild the index and free-list by scanning the file on open
//!
//! ## File Format
//! A shard file is a sequence of slots. Every slot is `2^class` bytes
//! (class 5..=31) and starts with a 20 byte header:
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Slot (2^class bytes)                                             │
//! │ ┌────────┬───────┬─────────┬─────────┬─────────┬─────────┐       │
//! │ │Status 1│Class 1│KeyLen 2 │ValLen 4 │ Seq 8   │ CRC 4   │       │
//! │ └────────┴───────┴─────────┴─────────┴─────────┴─────────┘       │
//! │ ┌──────────────┬────────────────────┬──────────────────────────┐ │
//! │ │     Key      │       Value        │   Padding (zeroes)       │ │
//! │ └──────────────┴────────────────────┴──────────────────────────┘ │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Slot ...                                                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//! - Status is `0x4C` ('L', live) or `0x46` ('F', free). Deleting a record
//!   only rewrites this byte.
//! - CRC32 covers header bytes 1..16, the key and the value.
//! - Seq is a per-shard write counter. It breaks the tie when a crash leaves
//!   two live copies of one key behind (relocated record written, old slot
//!   not yet freed).
//! - All integers are little-endian.

mod free_list;
mod rebuild;
mod record;
mod table;

pub use free_list::FreeList;
pub use rebuild::RebuildStats;
pub use record::{class_for, encode, Record, RecordHeader};
pub use table::{Direction, Shard};

// =============================================================================
// Shared Constants (used by record, rebuild, table)
// =============================================================================

/// Header size: Status (1) + Class (1) + KeyLen (2) + ValLen (4) + Seq (8) + CRC (4)
pub const HEADER_SIZE: usize = 20;

/// Smallest slot class (32 bytes), matching the packed offset alignment
pub const MIN_CLASS: u8 = crate::addr::ALIGN_SHIFT as u8;

/// Largest slot class (2 GiB)
pub const MAX_CLASS: u8 = 31;

/// Number of representable size classes
pub const CLASS_COUNT: usize = 32;

/// Status byte of a slot holding a live record
pub const STATUS_LIVE: u8 = 0x4C;

/// Status byte of a reclaimed slot
pub const STATUS_FREE: u8 = 0x46;

/// Encoded size of a record before rounding up to its slot
pub fn encoded_len(key_len: usize, val_len: usize) -> u64 {
    HEADER_SIZE as u64 + key_len as u64 + val_len as u64
}
