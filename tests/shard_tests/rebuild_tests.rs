//! Tests for shard rebuild
//!
//! These tests verify:
//! - Index and free-list recovery on reopen
//! - Truncation of a torn append, padding repair of a complete final record
//! - Corruption detection (checksum, status byte, shared digests)
//! - Resolution of duplicate live copies left by an interrupted relocation

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sniperkv::hash;
use sniperkv::shard::{encode, RebuildStats, Shard, HEADER_SIZE, STATUS_FREE};
use sniperkv::SniperError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard_00000.kv");
    (temp_dir, path)
}

fn open(path: &Path) -> (Shard, RebuildStats) {
    Shard::open(0, path, false).unwrap()
}

fn put(shard: &Shard, key: &[u8], value: &[u8]) {
    shard.upsert(hash::digest(key), key, value).unwrap();
}

fn get(shard: &Shard, key: &[u8]) -> Option<Vec<u8>> {
    shard.lookup(hash::digest(key), key).unwrap()
}

fn write_raw(path: &Path, slots: &[&[u8]]) {
    let mut file = fs::File::create(path).unwrap();
    for slot in slots {
        file.write_all(slot).unwrap();
    }
    file.sync_all().unwrap();
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

fn patch_byte(path: &Path, offset: usize, byte: u8) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] = byte;
    fs::write(path, bytes).unwrap();
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_rebuild_empty_file() {
    let (_temp, path) = setup_temp_path();

    let (shard, stats) = open(&path);

    assert_eq!(stats, RebuildStats::default());
    assert!(shard.is_empty());
    assert_eq!(shard.file_size(), 0);
}

#[test]
fn test_rebuild_restores_index() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"a", b"1");
        put(&shard, b"b", b"2");
        put(&shard, b"c", b"3");
        shard.remove(hash::digest(b"b"), b"b").unwrap();
    }

    let (shard, stats) = open(&path);

    assert_eq!(stats.live, 2);
    assert_eq!(stats.free, 1);
    assert_eq!(shard.len(), 2);
    assert_eq!(shard.free_slots(), 1);
    assert_eq!(get(&shard, b"a"), Some(b"1".to_vec()));
    assert_eq!(get(&shard, b"b"), None);
    assert_eq!(get(&shard, b"c"), Some(b"3".to_vec()));
}

#[test]
fn test_rebuild_after_relocation() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"small");
        put(&shard, b"key", &[9u8; 300]);
    }

    let (shard, stats) = open(&path);

    assert_eq!(stats.live, 1);
    assert_eq!(stats.free, 1);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(get(&shard, b"key"), Some(vec![9u8; 300]));
    assert_eq!(shard.free_slots_in_class(5), 1);
}

#[test]
fn test_rebuild_then_reuse_recovered_slot() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"a", b"1");
        put(&shard, b"b", b"2");
        shard.remove(hash::digest(b"a"), b"a").unwrap();
    }

    let (shard, _) = open(&path);
    put(&shard, b"c", b"3");

    assert_eq!(shard.file_size(), 64);
    assert_eq!(shard.free_slots(), 0);
}

#[test]
fn test_rebuild_writes_after_reopen_survive() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"v1");
    }
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"v2");
        put(&shard, b"other", b"x");
    }

    let (shard, stats) = open(&path);

    assert_eq!(stats.live, 2);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(get(&shard, b"key"), Some(b"v2".to_vec()));
}

// =============================================================================
// Truncation Tests
// =============================================================================

#[test]
fn test_rebuild_truncates_short_tail() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"a", b"1");
    }
    append_raw(&path, &[0xAA; 10]);

    let (shard, stats) = open(&path);

    assert_eq!(stats.truncated_bytes, 10);
    assert!(stats.repaired());
    assert_eq!(fs::metadata(&path).unwrap().len(), 32);
    assert_eq!(get(&shard, b"a"), Some(b"1".to_vec()));
}

#[test]
fn test_rebuild_truncates_partial_slot() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"a", b"1");
    }
    // a 1 KiB slot cut off after 100 bytes
    let partial = encode(10, 99, b"lost", &[1u8; 500], true);
    append_raw(&path, &partial[..100]);

    let (shard, stats) = open(&path);

    assert_eq!(stats.truncated_bytes, 100);
    assert_eq!(stats.live, 1);
    assert_eq!(shard.file_size(), 32);
    assert_eq!(get(&shard, b"lost"), None);

    // appends continue from the cut
    put(&shard, b"b", b"2");
    assert_eq!(fs::metadata(&path).unwrap().len(), 64);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_rebuild_checksum_mismatch_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"value");
    }
    // first byte of the value
    patch_byte(&path, HEADER_SIZE + 3, b'X');

    let err = Shard::open(0, &path, false).err().unwrap();
    assert!(matches!(err, SniperError::CorruptState(_)));
}

#[test]
fn test_rebuild_invalid_status_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"value");
    }
    patch_byte(&path, 0, 0x00);

    let err = Shard::open(0, &path, false).err().unwrap();
    assert!(matches!(err, SniperError::CorruptState(_)));
}

#[test]
fn test_rebuild_invalid_class_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"value");
    }
    patch_byte(&path, 1, 40);

    let err = Shard::open(0, &path, false).err().unwrap();
    assert!(matches!(err, SniperError::CorruptState(_)));
}

#[test]
fn test_rebuild_corrupt_class_byte_is_corrupt() {
    // (slot, class) pairs: overrunning the file from the first slot, from a
    // middle slot, and a class that still ends inside the file
    for (slot, class) in [(0usize, 30u8), (10, 30), (0, 6), (19, 20)] {
        let (_temp, path) = setup_temp_path();
        {
            let (shard, _) = open(&path);
            for i in 0..20 {
                put(&shard, format!("key{}", i).as_bytes(), b"v");
            }
            shard.sync().unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), 640);
        patch_byte(&path, slot * 32 + 1, class);

        let err = Shard::open(0, &path, false).err().unwrap();
        assert!(
            matches!(err, SniperError::CorruptState(_)),
            "slot {} class {}: {}",
            slot,
            class,
            err
        );
        // nothing cut from the file
        assert_eq!(fs::metadata(&path).unwrap().len(), 640);
    }
}

#[test]
fn test_rebuild_free_slot_past_end_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        for i in 0..20 {
            put(&shard, format!("key{}", i).as_bytes(), b"v");
        }
        shard.remove(hash::digest(b"key0"), b"key0").unwrap();
    }
    patch_byte(&path, 1, 30);

    let err = Shard::open(0, &path, false).err().unwrap();

    assert!(matches!(err, SniperError::CorruptState(_)));
    assert_eq!(fs::metadata(&path).unwrap().len(), 640);
}

#[test]
fn test_rebuild_restores_missing_padding() {
    let (_temp, path) = setup_temp_path();
    // record complete on disk, padding of its 128 byte slot lost
    let record = encode(7, 1, b"key", &[3u8; 50], false);
    write_raw(&path, &[&record[..]]);

    let (shard, stats) = open(&path);

    assert_eq!(stats.live, 1);
    assert_eq!(stats.padded_bytes, 128 - 73);
    assert_eq!(stats.truncated_bytes, 0);
    assert!(stats.repaired());
    assert_eq!(fs::metadata(&path).unwrap().len(), 128);
    assert_eq!(get(&shard, b"key"), Some(vec![3u8; 50]));

    put(&shard, b"next", b"1");
    assert_eq!(shard.file_size(), 160);
    drop(shard);

    let (_, stats) = open(&path);
    assert_eq!(stats.live, 2);
    assert!(!stats.repaired());
}

#[test]
fn test_rebuild_unpadded_tail_with_bad_checksum_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    let mut record = encode(7, 1, b"key", &[3u8; 50], false).to_vec();
    record[HEADER_SIZE + 10] ^= 0xFF;
    write_raw(&path, &[&record[..]]);

    let err = Shard::open(0, &path, false).err().unwrap();

    assert!(matches!(err, SniperError::CorruptState(_)));
    assert_eq!(fs::metadata(&path).unwrap().len(), 73);
}

#[test]
fn test_rebuild_free_slot_skips_checksum() {
    let (_temp, path) = setup_temp_path();
    {
        let (shard, _) = open(&path);
        put(&shard, b"key", b"value");
        shard.remove(hash::digest(b"key"), b"key").unwrap();
    }
    // a freed slot's payload is never read back
    patch_byte(&path, HEADER_SIZE + 3, b'X');

    let (shard, stats) = open(&path);
    assert_eq!(stats.free, 1);
    assert!(shard.is_empty());
}

#[test]
fn test_rebuild_shared_digest_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    let first = encode(5, 0, b"key-28590", b"a", true);
    let second = encode(5, 1, b"key-206528", b"b", true);
    write_raw(&path, &[&first[..], &second[..]]);

    let err = Shard::open(0, &path, false).err().unwrap();
    assert!(matches!(err, SniperError::CorruptState(_)));
}

// =============================================================================
// Duplicate Resolution Tests
// =============================================================================

#[test]
fn test_rebuild_duplicate_keeps_newer_later_slot() {
    let (_temp, path) = setup_temp_path();
    let old = encode(5, 1, b"dup", b"old", true);
    let new = encode(6, 2, b"dup", &[b'n'; 20], true);
    write_raw(&path, &[&old[..], &new[..]]);

    let (shard, stats) = open(&path);

    assert_eq!(stats.live, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.free, 1);
    assert_eq!(get(&shard, b"dup"), Some(vec![b'n'; 20]));
    assert_eq!(shard.free_slots_in_class(5), 1);

    // the stale copy was marked free on disk
    assert_eq!(fs::read(&path).unwrap()[0], STATUS_FREE);
}

#[test]
fn test_rebuild_duplicate_keeps_newer_earlier_slot() {
    let (_temp, path) = setup_temp_path();
    let new = encode(5, 8, b"dup", b"new", true);
    let old = encode(5, 3, b"dup", b"old", true);
    write_raw(&path, &[&new[..], &old[..]]);

    let (shard, stats) = open(&path);

    assert_eq!(stats.duplicates, 1);
    assert_eq!(get(&shard, b"dup"), Some(b"new".to_vec()));
    assert_eq!(fs::read(&path).unwrap()[32], STATUS_FREE);
}

#[test]
fn test_rebuild_duplicate_resolution_is_persistent() {
    let (_temp, path) = setup_temp_path();
    let old = encode(5, 1, b"dup", b"old", true);
    let new = encode(5, 2, b"dup", b"new", true);
    write_raw(&path, &[&old[..], &new[..]]);
    drop(open(&path));

    let (shard, stats) = open(&path);

    assert_eq!(stats.duplicates, 0);
    assert!(!stats.repaired());
    assert_eq!(stats.live, 1);
    assert_eq!(stats.free, 1);
    assert_eq!(get(&shard, b"dup"), Some(b"new".to_vec()));
}

#[test]
fn test_rebuild_sequence_continues_after_reopen() {
    let (_temp, path) = setup_temp_path();
    let record = encode(5, 41, b"dup", b"old", true);
    write_raw(&path, &[&record[..]]);
    {
        let (shard, _) = open(&path);
        // relocation writes a newer copy before freeing the old one
        put(&shard, b"dup", &[b'n'; 30]);
    }
    // simulate the crash window: the old slot still live
    patch_byte(&path, 0, sniperkv::shard::STATUS_LIVE);

    let (shard, stats) = open(&path);

    assert_eq!(stats.duplicates, 1);
    assert_eq!(get(&shard, b"dup"), Some(vec![b'n'; 30]));
}
