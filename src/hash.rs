//! Key hashing
//!
//! A key's 32-bit digest picks its shard and is the shard index key.
//! Distinct keys may share a digest; shards detect that by reading the
//! stored key back, so nothing here tries to avoid collisions.

use xxhash_rust::xxh32::xxh32;

const SEED: u32 = 0;

/// xxHash32 digest of a key
#[inline]
pub fn digest(key: &[u8]) -> u32 {
    xxh32(key, SEED)
}

/// Shard that owns `digest` in a store of `shard_count` shards
#[inline]
pub fn shard_for(digest: u32, shard_count: usize) -> usize {
    digest as usize % shard_count
}
