//! Segment addressing
//!
//! A segment is named by the device that holds it and its index within
//! that device's segment table. The pair packs into one 32-bit value,
//! device in the high half:
//!
//! ```text
//! ┌──────────────────┬──────────────────┐
//! │ device id (16)   │ index (16)       │
//! └──────────────────┴──────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// On-disk encoding of "no segment" in link and pointer fields.
///
/// This reserves device 0xFFFF / index 0xFFFF, which is why neither may be
/// allocated.
pub const NO_SEGMENT: u32 = u32::MAX;

/// Address of a segment: (device, index)
///
/// Ordering is lexicographic by device, then index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId {
    device: u16,
    index: u16,
}

impl SegmentId {
    pub const fn new(device: u16, index: u16) -> Self {
        Self { device, index }
    }

    /// Unpack from the 32-bit encoding
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            device: (raw >> 16) as u16,
            index: (raw & 0xFFFF) as u16,
        }
    }

    /// Pack into the 32-bit encoding
    pub const fn raw(self) -> u32 {
        ((self.device as u32) << 16) | self.index as u32
    }

    pub const fn device(self) -> u16 {
        self.device
    }

    pub const fn index(self) -> u16 {
        self.index
    }

    /// Encode an optional link for the wire
    pub fn encode_link(link: Option<SegmentId>) -> u32 {
        link.map_or(NO_SEGMENT, SegmentId::raw)
    }

    /// Decode a link written by [`SegmentId::encode_link`]
    pub fn decode_link(raw: u32) -> Option<SegmentId> {
        (raw != NO_SEGMENT).then(|| SegmentId::from_raw(raw))
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.device, self.index)
    }
}

impl From<u32> for SegmentId {
    fn from(raw: u32) -> Self {
        SegmentId::from_raw(raw)
    }
}

impl From<SegmentId> for u32 {
    fn from(id: SegmentId) -> Self {
        id.raw()
    }
}
