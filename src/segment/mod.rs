//! Segment Module
//!
//! A segment is a fixed-length region of a device file that holds a run of
//! log records. Segments are chained through prev/next links, possibly
//! across devices, to form one logical log.
//!
//! ## Segment Layout
//! ```text
//! start_offset
//! │
//! ▼
//! ┌───────────────┬───────────────┬──────────────────────────────┐
//! │ header slot A │ header slot B │ data: record, record, ...    │
//! │ (48)          │ (48)          │ (length - 96)                │
//! └───────────────┴───────────────┴──────────────────────────────┘
//!                                 ▲               ▲
//!                          position 0        header.cursor
//! ```

mod id;
mod header;
mod stream;

use serde::{Deserialize, Serialize};

pub use id::{SegmentId, NO_SEGMENT};
pub use header::{
    is_newer, select_header, timestamp_hash, HeaderSlot, SegmentHeader, HEADER_SLOT_SIZE,
    PREAMBLE_SIZE, STATUS_ALLOCATED, STATUS_FULL,
};
pub use stream::SegmentStream;

/// Persistent table entry describing where a segment lives.
///
/// Links here mirror the header links of allocated segments; for an
/// allocated segment the header copy is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub id: SegmentId,
    /// Byte offset of the segment within its device file
    pub start_offset: u64,
    /// Total length including the header preamble
    pub length: u64,
    pub allocated: bool,
    pub full: bool,
    pub prev: Option<SegmentId>,
    pub next: Option<SegmentId>,
}

impl SegmentDescriptor {
    pub fn new(id: SegmentId, start_offset: u64, length: u64) -> Self {
        Self {
            id,
            start_offset,
            length,
            allocated: false,
            full: false,
            prev: None,
            next: None,
        }
    }

    /// Bytes available for records
    pub fn data_len(&self) -> u64 {
        self.length.saturating_sub(PREAMBLE_SIZE)
    }
}

/// A byte position in the log: segment plus offset into its data region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogPosition {
    pub segment: SegmentId,
    pub offset: u32,
}

impl LogPosition {
    pub const fn new(segment: SegmentId, offset: u32) -> Self {
        Self { segment, offset }
    }
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.segment, self.offset)
    }
}
