//! Root metadata: the log directory kept in the master device's root region.
//!
//! ## Block Format (little-endian)
//! ```text
//! ┌──────────────────┐
//! │ device count (2) │
//! ├──────────────────┴────────────────────────────────────────────┐
//! │ last segment (4)                                              │
//! │ start segment (4)  start offset (4)                           │
//! │ end segment (4)    end offset (4)                             │
//! ├──────────────────────┬────────────────────────────────────────┤
//! │ checkpoint count (1) │ count x [begin seg (4), begin off (4), │
//! │                      │          end seg (4), end off (4),     │
//! │                      │          status (1)]                   │
//! ├──────────────────────┴────────────────────────────────────────┤
//! │ device count x [id (2), name (2 + n), path (2 + n)]           │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::error::{LogError, Result};
use crate::segment::{LogPosition, SegmentId};
use crate::wire::{put_short_string, WireRead};

/// Checkpoints retained in the ring
pub const CHECKPOINT_HISTORY: usize = 3;

const CHECKPOINT_VALID: u8 = 0x01;

// =============================================================================
// Checkpoint Ring
// =============================================================================

/// One begin/end checkpoint pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub begin: LogPosition,
    /// Set once the matching end record is written; the entry is valid
    /// only then
    pub end: Option<LogPosition>,
}

impl CheckpointEntry {
    pub fn is_valid(&self) -> bool {
        self.end.is_some()
    }
}

/// Bounded history of the most recent checkpoints, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointRing {
    entries: VecDeque<CheckpointEntry>,
}

impl CheckpointRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a begin-checkpoint. An unfinished entry at the tail is
    /// replaced rather than kept.
    pub fn begin(&mut self, at: LogPosition) {
        match self.entries.back_mut() {
            Some(last) if !last.is_valid() => {
                warn!(abandoned = %last.begin, "checkpoint begun without ending the previous one");
                *last = CheckpointEntry { begin: at, end: None };
            }
            _ => self.entries.push_back(CheckpointEntry { begin: at, end: None }),
        }

        while self.entries.len() > CHECKPOINT_HISTORY {
            if let Some(evicted) = self.entries.pop_front() {
                warn!(begin = %evicted.begin, "checkpoint evicted from history");
            }
        }
    }

    /// Complete the pending checkpoint. Returns false when no begin is
    /// pending.
    pub fn end(&mut self, at: LogPosition) -> bool {
        match self.entries.back_mut() {
            Some(last) if !last.is_valid() => {
                last.end = Some(at);
                true
            }
            _ => false,
        }
    }

    /// The most recent valid checkpoint
    pub fn best(&self) -> Option<&CheckpointEntry> {
        self.entries.iter().rev().find(|e| e.is_valid())
    }

    /// The oldest valid checkpoint still retained
    pub fn oldest_valid(&self) -> Option<&CheckpointEntry> {
        self.entries.iter().find(|e| e.is_valid())
    }

    pub fn entries(&self) -> impl Iterator<Item = &CheckpointEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Directory
// =============================================================================

/// Directory entry for one device file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: u16,
    pub name: String,
    pub path: PathBuf,
}

/// Log-wide state persisted alongside the master device's segment table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMetadata {
    /// Every device of the log, master first
    pub devices: Vec<DeviceInfo>,
    /// Most recently carved segment; new devices chain after it
    pub last_segment: SegmentId,
    pub log_start: LogPosition,
    pub log_end: LogPosition,
    /// Highest transaction id written to the log; 0 when none
    pub max_transaction_id: u32,
    pub checkpoints: CheckpointRing,
}

impl RootMetadata {
    pub fn new(master: DeviceInfo, first: SegmentId, last: SegmentId) -> Self {
        Self {
            devices: vec![master],
            last_segment: last,
            log_start: LogPosition::new(first, 0),
            log_end: LogPosition::new(first, 0),
            max_transaction_id: 0,
            checkpoints: CheckpointRing::new(),
        }
    }

    pub fn device(&self, id: u16) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.devices.len() as u16);
        buf.put_u32_le(self.last_segment.raw());
        put_position(buf, Some(self.log_start));
        put_position(buf, Some(self.log_end));
        buf.put_u32_le(self.max_transaction_id);

        buf.put_u8(self.checkpoints.len() as u8);
        for entry in self.checkpoints.entries() {
            put_position(buf, Some(entry.begin));
            put_position(buf, entry.end);
            buf.put_u8(if entry.is_valid() { CHECKPOINT_VALID } else { 0 });
        }

        for device in &self.devices {
            buf.put_u16_le(device.id);
            put_short_string(buf, &device.name);
            put_short_string(buf, &device.path.to_string_lossy());
        }
    }

    pub fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Self::decode_inner(reader).map_err(|e| LogError::RootCorrupt(format!("root metadata: {}", e)))
    }

    fn decode_inner<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Self> {
        let device_count = reader.read_u16_le()? as usize;
        let last_segment = SegmentId::from_raw(reader.read_u32_le()?);
        let log_start = read_position(reader)?;
        let log_end = read_position(reader)?;
        let (log_start, log_end) = match (log_start, log_end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "log start/end pointer is unset",
                ))
            }
        };

        let max_transaction_id = reader.read_u32_le()?;

        let checkpoint_count = reader.read_u8_le()? as usize;
        let mut checkpoints = CheckpointRing::new();
        for _ in 0..checkpoint_count {
            let begin = read_position(reader)?;
            let end = read_position(reader)?;
            let status = reader.read_u8_le()?;
            if let Some(begin) = begin {
                let end = if status & CHECKPOINT_VALID != 0 { end } else { None };
                checkpoints.entries.push_back(CheckpointEntry { begin, end });
            }
        }

        let mut devices = Vec::with_capacity(device_count);
        for _ in 0..device_count {
            let id = reader.read_u16_le()?;
            let name = reader.read_short_string()?;
            let path = PathBuf::from(reader.read_short_string()?);
            devices.push(DeviceInfo { id, name, path });
        }

        Ok(Self {
            devices,
            last_segment,
            log_start,
            log_end,
            max_transaction_id,
            checkpoints,
        })
    }
}

fn put_position(buf: &mut BytesMut, position: Option<LogPosition>) {
    buf.put_u32_le(SegmentId::encode_link(position.map(|p| p.segment)));
    buf.put_u32_le(position.map_or(0, |p| p.offset));
}

fn read_position<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Option<LogPosition>> {
    let segment = SegmentId::decode_link(reader.read_u32_le()?);
    let offset = reader.read_u32_le()?;
    Ok(segment.map(|segment| LogPosition::new(segment, offset)))
}
