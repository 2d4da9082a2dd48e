//! AddrSize codec
//!
//! Packs a shard file offset and a slot size class into the single `u32`
//! the in-memory index stores per key.
//!
//! ## Word Layout
//! ```text
//!  31                                    5 4         0
//! ┌───────────────────────────────────────┬───────────┐
//! │ slot index = offset / 32   (27 bits)  │ class (5) │
//! └───────────────────────────────────────┴───────────┘
//! ```
//!
//! Offsets are quantized to 32 bytes, the smallest slot the allocator hands
//! out. Every slot is a power of two of at least 32 bytes and the append
//! watermark only ever advances by whole slots, so every slot offset is a
//! multiple of 32. 27 bits of slot index reach 2^27 * 32 = 4 GiB per shard
//! file.

/// Bits reserved for the size class (0..=31)
pub const CLASS_BITS: u32 = 5;

const CLASS_MASK: u32 = (1 << CLASS_BITS) - 1;

/// Offsets are stored in units of `1 << ALIGN_SHIFT` bytes
pub const ALIGN_SHIFT: u32 = 5;

/// Required alignment of every packed offset
pub const ALIGNMENT: u64 = 1 << ALIGN_SHIFT;

/// Largest slot index the word can hold
pub const MAX_SLOT_INDEX: u32 = (1 << (32 - CLASS_BITS)) - 1;

/// One past the highest addressable byte of a shard file
pub const ADDRESSABLE_BYTES: u64 = (MAX_SLOT_INDEX as u64 + 1) << ALIGN_SHIFT;

/// Pack `(offset, class)` into an index word.
///
/// `offset` must be a multiple of [`ALIGNMENT`] below [`ADDRESSABLE_BYTES`]
/// and `class` must be below 32; the allocator never produces anything else.
#[inline]
pub fn pack(offset: u64, class: u8) -> u32 {
    debug_assert_eq!(offset % ALIGNMENT, 0, "unaligned offset {offset}");
    debug_assert!(offset < ADDRESSABLE_BYTES, "offset {offset} out of range");
    debug_assert!(u32::from(class) <= CLASS_MASK, "class {class} out of range");

    (((offset >> ALIGN_SHIFT) as u32) << CLASS_BITS) | (u32::from(class) & CLASS_MASK)
}

/// Unpack an index word into `(offset, slot length in bytes)`
#[inline]
pub fn unpack(word: u32) -> (u64, u64) {
    (offset(word), 1u64 << class(word))
}

/// Byte offset part of a packed word
#[inline]
pub fn offset(word: u32) -> u64 {
    u64::from(word >> CLASS_BITS) << ALIGN_SHIFT
}

/// Size class part of a packed word
#[inline]
pub fn class(word: u32) -> u8 {
    (word & CLASS_MASK) as u8
}
