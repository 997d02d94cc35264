//! WAL record framing
//!
//! `[sequence: u64][crc32: u32][len: u32][bincode(Entry)]`, little endian.
//! The checksum covers the sequence bytes and the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::entry::Entry;
use crate::error::{LayerError, Result};

/// Sequence (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single encoded entry; anything larger is treated as a
/// corrupt length field.
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// Encode an entry into a framed record
pub fn encode_record(entry: &Entry) -> Result<Bytes> {
    let payload = bincode::serialize(entry)?;
    if payload.len() > MAX_RECORD_SIZE as usize {
        return Err(LayerError::Serialization(format!(
            "entry of {} bytes exceeds the {} byte record limit",
            payload.len(),
            MAX_RECORD_SIZE
        )));
    }

    let sequence = entry.sequence.to_le_bytes();
    let crc = checksum(&sequence, &payload);

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&sequence);
    buf.put_u32_le(crc);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode one record from the front of `buf`
///
/// Returns:
/// - `Ok(Some((entry, consumed)))`: a complete, valid record
/// - `Ok(None)`: `buf` holds only part of a record (torn write)
/// - `Err(WalCorruption)`: checksum or payload mismatch
pub fn decode_record(buf: &[u8]) -> Result<Option<(Entry, usize)>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &buf[..HEADER_SIZE];
    let sequence = header.get_u64_le();
    let crc = header.get_u32_le();
    let len = header.get_u32_le();

    if len > MAX_RECORD_SIZE {
        return Err(LayerError::WalCorruption(format!(
            "record length {} exceeds limit",
            len
        )));
    }

    let total = HEADER_SIZE + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[HEADER_SIZE..total];
    if checksum(&sequence.to_le_bytes(), payload) != crc {
        return Err(LayerError::WalCorruption(format!(
            "CRC mismatch in record with sequence {}",
            sequence
        )));
    }

    let entry: Entry = bincode::deserialize(payload)
        .map_err(|e| LayerError::WalCorruption(format!("undecodable entry: {}", e)))?;

    if entry.sequence != sequence {
        return Err(LayerError::WalCorruption(format!(
            "header sequence {} does not match entry sequence {}",
            sequence, entry.sequence
        )));
    }

    Ok(Some((entry, total)))
}

fn checksum(sequence: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(sequence);
    hasher.update(payload);
    hasher.finalize()
}

