//! Record slot encoding
//!
//! Encodes records into slots and reads them back with positional reads.

use std::fs::File;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, SniperError};
use crate::file;
use crate::pow2;

use super::{encoded_len, HEADER_SIZE, MAX_CLASS, MIN_CLASS, STATUS_FREE, STATUS_LIVE};

/// Header bytes covered by the CRC: Class (1) + KeyLen (2) + ValLen (4) + Seq (8)
const META_SIZE: usize = 15;

/// Decoded slot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub status: u8,
    pub class: u8,
    pub key_len: u16,
    pub val_len: u32,
    pub seq: u64,
    pub crc: u32,
}

/// A key and its value as read back from a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RecordHeader {
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &buf[..];
        Self {
            status: buf.get_u8(),
            class: buf.get_u8(),
            key_len: buf.get_u16_le(),
            val_len: buf.get_u32_le(),
            seq: buf.get_u64_le(),
            crc: buf.get_u32_le(),
        }
    }

    /// Structural checks that do not need the payload
    pub fn validate(&self, offset: u64) -> Result<()> {
        if self.status != STATUS_LIVE && self.status != STATUS_FREE {
            return Err(SniperError::CorruptState(format!(
                "invalid status byte {:#04x} at offset {}",
                self.status, offset
            )));
        }
        if !(MIN_CLASS..=MAX_CLASS).contains(&self.class) {
            return Err(SniperError::CorruptState(format!(
                "invalid size class {} at offset {}",
                self.class, offset
            )));
        }
        if HEADER_SIZE as u64 + self.payload_len() > self.slot_len() {
            return Err(SniperError::CorruptState(format!(
                "record of {} bytes overflows its {} byte slot at offset {}",
                HEADER_SIZE as u64 + self.payload_len(),
                self.slot_len(),
                offset
            )));
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.status == STATUS_LIVE
    }

    pub fn slot_len(&self) -> u64 {
        1u64 << self.class
    }

    /// Key plus value length
    pub fn payload_len(&self) -> u64 {
        u64::from(self.key_len) + u64::from(self.val_len)
    }

    /// Verify the CRC against `payload` and split it into key and value
    pub fn decode_payload(&self, mut payload: Vec<u8>, offset: u64) -> Result<Record> {
        let key_len = self.key_len as usize;
        let crc = checksum(&self.meta(), &payload[..key_len], &payload[key_len..]);
        if crc != self.crc {
            return Err(SniperError::CorruptState(format!(
                "checksum mismatch at offset {}: stored {:#010x}, computed {:#010x}",
                offset, self.crc, crc
            )));
        }
        let value = payload.split_off(key_len);
        Ok(Record {
            key: payload,
            value,
        })
    }

    fn meta(&self) -> [u8; META_SIZE] {
        let mut meta = [0u8; META_SIZE];
        let mut buf = &mut meta[..];
        buf.put_u8(self.class);
        buf.put_u16_le(self.key_len);
        buf.put_u32_le(self.val_len);
        buf.put_u64_le(self.seq);
        meta
    }
}

/// Smallest slot class that holds `key` and `value`
pub fn class_for(key: &[u8], value: &[u8]) -> Result<u8> {
    if key.len() > u16::MAX as usize {
        return Err(SniperError::KeyTooLong(key.len()));
    }
    let len = encoded_len(key.len(), value.len());
    let (exponent, _) = pow2::size_for(len);
    if exponent > u32::from(MAX_CLASS) {
        return Err(SniperError::RecordTooLarge(len));
    }
    Ok((exponent as u8).max(MIN_CLASS))
}

/// Encode a live record for a slot of `class`.
///
/// `pad` extends the buffer with zeroes to the full slot length, which
/// appends need so the file always ends on a slot boundary. Lengths must
/// already have passed [`class_for`].
pub fn encode(class: u8, seq: u64, key: &[u8], value: &[u8], pad: bool) -> BytesMut {
    let len = encoded_len(key.len(), value.len()) as usize;
    let capacity = if pad { 1usize << class } else { len };
    let mut buf = BytesMut::with_capacity(capacity);

    buf.put_u8(STATUS_LIVE);
    buf.put_u8(class);
    buf.put_u16_le(key.len() as u16);
    buf.put_u32_le(value.len() as u32);
    buf.put_u64_le(seq);

    let crc = checksum(&buf[1..], key, value);
    buf.put_u32_le(crc);
    buf.put_slice(key);
    buf.put_slice(value);

    if pad {
        buf.resize(capacity, 0);
    }
    buf
}

fn checksum(meta: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(meta);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

// =============================================================================
// Positional Readers
// =============================================================================

/// Read and validate the header of the slot at `offset`
pub fn read_header(file: &File, offset: u64) -> Result<RecordHeader> {
    let mut buf = [0u8; HEADER_SIZE];
    file::read_exact_at(file, &mut buf, offset)?;
    let header = RecordHeader::decode(&buf);
    header.validate(offset)?;
    Ok(header)
}

/// Read only the key of the live record at `offset`
pub fn read_key(file: &File, offset: u64) -> Result<Vec<u8>> {
    let header = read_live_header(file, offset)?;
    let mut key = vec![0u8; header.key_len as usize];
    file::read_exact_at(file, &mut key, offset + HEADER_SIZE as u64)?;
    Ok(key)
}

/// Read and checksum the live record at `offset`
pub fn read_record(file: &File, offset: u64) -> Result<Record> {
    let header = read_live_header(file, offset)?;
    let mut payload = vec![0u8; header.payload_len() as usize];
    file::read_exact_at(file, &mut payload, offset + HEADER_SIZE as u64)?;
    header.decode_payload(payload, offset)
}

fn read_live_header(file: &File, offset: u64) -> Result<RecordHeader> {
    let header = read_header(file, offset)?;
    if !header.is_live() {
        return Err(SniperError::CorruptState(format!(
            "index points at free slot {}",
            offset
        )));
    }
    Ok(header)
}
