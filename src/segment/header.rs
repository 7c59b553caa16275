//! Double-buffered segment header
//!
//! Every segment starts with two fixed-size header slots. Writes alternate
//! between them, so a torn header write damages at most one copy. Each slot
//! carries a timestamp and a hash of that timestamp; a slot is valid when
//! the two agree, and the newer of two valid slots wins.
//!
//! ## Slot Format (48 bytes, little-endian)
//! ```text
//! ┌────────┬──────────┬────────┬────────┬──────────┬─────────────┐
//! │ status │ segment  │ prev   │ next   │ cursor   │ last_cursor │
//! │ (1)    │ (4)      │ (4)    │ (4)    │ (4)      │ (4)         │
//! ├────────┴──┬───────┴────────┴────────┴──────────┴─────────────┤
//! │ timestamp │ hash (4)  │ zero padding                         │
//! │ (8)       │           │                                      │
//! └───────────┴───────────┴──────────────────────────────────────┘
//! ```

use bytes::{BufMut, BytesMut};

use super::id::SegmentId;
use crate::wire::WireRead;

/// Size of one header slot on disk
pub const HEADER_SLOT_SIZE: usize = 48;

/// Both header slots; segment data starts right after
pub const PREAMBLE_SIZE: u64 = 2 * HEADER_SLOT_SIZE as u64;

/// Status flag: the segment holds log data
pub const STATUS_ALLOCATED: u8 = 0x01;

/// Status flag: the writer moved past this segment
pub const STATUS_FULL: u8 = 0x02;

/// Hash guarding a header timestamp
pub fn timestamp_hash(timestamp: i64) -> u32 {
    crc32fast::hash(&timestamp.to_le_bytes())
}

/// Serial-number comparison: true when `a` is newer than `b`.
///
/// Survives the timestamp counter wrapping past `i64::MAX`.
pub fn is_newer(a: i64, b: i64) -> bool {
    a.wrapping_sub(b) > 0
}

/// Which of the two header slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSlot {
    A,
    B,
}

impl HeaderSlot {
    pub fn other(self) -> Self {
        match self {
            HeaderSlot::A => HeaderSlot::B,
            HeaderSlot::B => HeaderSlot::A,
        }
    }

    /// Offset of this slot from the segment start
    pub fn offset(self) -> u64 {
        match self {
            HeaderSlot::A => 0,
            HeaderSlot::B => HEADER_SLOT_SIZE as u64,
        }
    }
}

/// In-memory copy of one header slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub status: u8,
    pub segment: SegmentId,
    pub prev: Option<SegmentId>,
    pub next: Option<SegmentId>,
    /// End of the last complete record, relative to the data region
    pub cursor: u32,
    /// Start of the last complete record
    pub last_cursor: u32,
    pub timestamp: i64,
    pub hash: u32,
}

impl SegmentHeader {
    /// A fresh, valid header for an unallocated segment
    pub fn new(segment: SegmentId) -> Self {
        Self {
            status: 0,
            segment,
            prev: None,
            next: None,
            cursor: 0,
            last_cursor: 0,
            timestamp: 0,
            hash: timestamp_hash(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.hash == timestamp_hash(self.timestamp)
    }

    /// Advance the timestamp and re-seal the hash before a slot write
    pub fn stamp(&mut self) {
        self.timestamp = self.timestamp.wrapping_add(1);
        self.hash = timestamp_hash(self.timestamp);
    }

    pub fn is_allocated(&self) -> bool {
        self.status & STATUS_ALLOCATED != 0
    }

    pub fn is_full(&self) -> bool {
        self.status & STATUS_FULL != 0
    }

    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SLOT_SIZE] {
        let mut buf = BytesMut::with_capacity(HEADER_SLOT_SIZE);
        buf.put_u8(self.status);
        buf.put_u32_le(self.segment.raw());
        buf.put_u32_le(SegmentId::encode_link(self.prev));
        buf.put_u32_le(SegmentId::encode_link(self.next));
        buf.put_u32_le(self.cursor);
        buf.put_u32_le(self.last_cursor);
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.hash);

        let mut slot = [0u8; HEADER_SLOT_SIZE];
        slot[..buf.len()].copy_from_slice(&buf);
        slot
    }

    pub fn decode(slot: &[u8; HEADER_SLOT_SIZE]) -> Self {
        let mut reader: &[u8] = &slot[..];
        // The slot is fixed-size and larger than the encoded fields, so
        // these reads cannot run short.
        let status = reader.read_u8_le().unwrap_or(0);
        let segment = SegmentId::from_raw(reader.read_u32_le().unwrap_or(0));
        let prev = SegmentId::decode_link(reader.read_u32_le().unwrap_or(u32::MAX));
        let next = SegmentId::decode_link(reader.read_u32_le().unwrap_or(u32::MAX));
        let cursor = reader.read_u32_le().unwrap_or(0);
        let last_cursor = reader.read_u32_le().unwrap_or(0);
        let timestamp = reader.read_i64_le().unwrap_or(0);
        let hash = reader.read_u32_le().unwrap_or(0);

        Self {
            status,
            segment,
            prev,
            next,
            cursor,
            last_cursor,
            timestamp,
            hash,
        }
    }
}

/// Pick the authoritative slot.
///
/// Returns `None` when neither slot is valid. When both are valid the newer
/// timestamp wins; equal timestamps resolve to slot A.
pub fn select_header(
    a: &SegmentHeader,
    b: &SegmentHeader,
) -> Option<(HeaderSlot, SegmentHeader)> {
    match (a.is_valid(), b.is_valid()) {
        (true, false) => Some((HeaderSlot::A, *a)),
        (false, true) => Some((HeaderSlot::B, *b)),
        (false, false) => None,
        (true, true) => {
            if is_newer(b.timestamp, a.timestamp) {
                Some((HeaderSlot::B, *b))
            } else {
                Some((HeaderSlot::A, *a))
            }
        }
    }
}
