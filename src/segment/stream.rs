//! Segment stream: positioned record I/O over one segment.
//!
//! Positions are relative to the end of the header preamble. Record bytes
//! are written first; only then is the header (cursor, last cursor) moved
//! forward and written to the alternate slot.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::{debug, warn};

use super::header::{
    select_header, HeaderSlot, SegmentHeader, HEADER_SLOT_SIZE, PREAMBLE_SIZE, STATUS_ALLOCATED,
    STATUS_FULL,
};
use super::{SegmentDescriptor, SegmentId};
use crate::device::{AccessMode, BackingFile};
use crate::error::{LogError, Result};
use crate::record::LogRecord;

pub struct SegmentStream {
    id: SegmentId,
    start_offset: u64,
    length: u64,
    file: Arc<BackingFile>,
    mode: Arc<AccessMode>,
    header: SegmentHeader,
    /// Slot the next header write goes to
    next_slot: HeaderSlot,
    header_dirty: bool,
    position: u64,
}

impl SegmentStream {
    /// Stream over the segment described by `descriptor`.
    ///
    /// The in-memory header is seeded from the descriptor; call
    /// [`init_new`](Self::init_new) or [`init_load`](Self::init_load) before
    /// doing record I/O.
    pub fn new(file: Arc<BackingFile>, descriptor: &SegmentDescriptor, mode: Arc<AccessMode>) -> Self {
        let mut header = SegmentHeader::new(descriptor.id);
        header.prev = descriptor.prev;
        header.next = descriptor.next;
        header.set_flag(STATUS_ALLOCATED, descriptor.allocated);
        header.set_flag(STATUS_FULL, descriptor.full);

        Self {
            id: descriptor.id,
            start_offset: descriptor.start_offset,
            length: descriptor.length,
            file,
            mode,
            header,
            next_slot: HeaderSlot::A,
            header_dirty: false,
            position: 0,
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Start a fresh segment: empty cursors, both header slots written
    pub fn init_new(&mut self) -> Result<()> {
        self.ensure_writable()?;

        self.header.set_flag(STATUS_ALLOCATED, true);
        self.header.set_flag(STATUS_FULL, false);
        self.header.cursor = 0;
        self.header.last_cursor = 0;

        self.next_slot = HeaderSlot::A;
        self.write_header()?;
        self.write_header()?;
        self.position = 0;

        debug!(segment = %self.id, prev = ?self.header.prev, "segment initialized");
        Ok(())
    }

    /// Load the authoritative header from disk
    pub fn init_load(&mut self) -> Result<()> {
        let mut slot_a = [0u8; HEADER_SLOT_SIZE];
        let mut slot_b = [0u8; HEADER_SLOT_SIZE];
        self.file.read_at(self.start_offset + HeaderSlot::A.offset(), &mut slot_a)?;
        self.file.read_at(self.start_offset + HeaderSlot::B.offset(), &mut slot_b)?;

        let a = SegmentHeader::decode(&slot_a);
        let b = SegmentHeader::decode(&slot_b);

        let (slot, header) = select_header(&a, &b).ok_or(LogError::SegmentCorrupt(self.id))?;
        if header.segment != self.id {
            return Err(LogError::SegmentCorrupt(self.id));
        }
        if !(a.is_valid() && b.is_valid()) {
            warn!(segment = %self.id, using = ?slot, "one header slot is invalid");
        }

        self.header = header;
        self.next_slot = slot.other();
        self.header_dirty = false;
        self.position = 0;
        Ok(())
    }

    // =========================================================================
    // Record I/O
    // =========================================================================

    /// Append a record at the cursor; returns the offset it was written at.
    ///
    /// The record's back link is set to the previous record's start.
    pub fn write_record(&mut self, record: &mut LogRecord) -> Result<u32> {
        self.ensure_writable()?;

        record.back_link = self.header.last_cursor;
        let bytes = record.encode();

        let offset = self.header.cursor;
        let needed = bytes.len() as u64;
        let free = self.free_space();
        let end = u32::try_from(offset as u64 + needed).ok().filter(|_| needed <= free);
        let Some(end) = end else {
            return Err(LogError::SegmentFull {
                segment: self.id,
                free,
                needed,
            });
        };

        // Step 1: record bytes
        self.file.write_at(self.data_start() + offset as u64, &bytes)?;
        if self.mode.sync_writes() {
            self.file.sync()?;
        }

        // Step 2: header, into the alternate slot. The in-memory header only
        // moves once the new one is on disk.
        let mut header = self.header;
        header.last_cursor = offset;
        header.cursor = end;
        self.commit_header(header)?;
        self.position = end as u64;

        Ok(offset)
    }

    /// Decode the record at the current position and advance past it.
    ///
    /// On error the position is left where it was.
    pub fn read_record(&mut self) -> Result<LogRecord> {
        let start = self.position;
        LogRecord::read_from(self).map_err(|e| {
            self.position = start;
            e
        })
    }

    // =========================================================================
    // Header Maintenance
    // =========================================================================

    pub fn set_next(&mut self, next: Option<SegmentId>) {
        if self.header.next != next {
            self.header.next = next;
            self.header_dirty = true;
        }
    }

    pub fn set_prev(&mut self, prev: Option<SegmentId>) {
        if self.header.prev != prev {
            self.header.prev = prev;
            self.header_dirty = true;
        }
    }

    pub fn set_full(&mut self, full: bool) {
        if self.header.is_full() != full {
            self.header.set_flag(STATUS_FULL, full);
            self.header_dirty = true;
        }
    }

    /// Persist a pending header change and sync the backing file
    pub fn flush(&mut self) -> Result<()> {
        if self.header_dirty {
            self.write_header()?;
        }
        if !self.mode.is_read_only() && !self.file.is_read_only() {
            self.file.sync()?;
        }
        Ok(())
    }

    /// Segments never change length once created
    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(LogError::SegmentLengthFixed)
    }

    fn write_header(&mut self) -> Result<()> {
        self.commit_header(self.header)
    }

    /// Stamp `header`, write it to the next slot, then adopt it
    fn commit_header(&mut self, mut header: SegmentHeader) -> Result<()> {
        self.ensure_writable()?;

        header.stamp();
        let slot = self.next_slot;
        self.file.write_at(self.start_offset + slot.offset(), &header.encode())?;
        if self.mode.sync_writes() {
            self.file.sync()?;
        }

        self.header = header;
        self.next_slot = slot.other();
        self.header_dirty = false;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode.is_read_only() || self.file.is_read_only() {
            return Err(LogError::SegmentReadOnly(self.id));
        }
        if self.mode.is_recovering() {
            return Err(LogError::SegmentRecovering(self.id));
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Slot the next header write will use
    pub fn next_slot(&self) -> HeaderSlot {
        self.next_slot
    }

    pub fn is_allocated(&self) -> bool {
        self.header.is_allocated()
    }

    pub fn is_full(&self) -> bool {
        self.header.is_full()
    }

    pub fn next(&self) -> Option<SegmentId> {
        self.header.next
    }

    pub fn prev(&self) -> Option<SegmentId> {
        self.header.prev
    }

    /// End of written data
    pub fn cursor(&self) -> u64 {
        self.header.cursor as u64
    }

    pub fn last_cursor(&self) -> u64 {
        self.header.last_cursor as u64
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the read position, clamped to the data region
    pub fn set_position(&mut self, position: u64) {
        self.position = position.min(self.data_len());
    }

    pub fn data_len(&self) -> u64 {
        self.length.saturating_sub(PREAMBLE_SIZE)
    }

    pub fn free_space(&self) -> u64 {
        self.data_len().saturating_sub(self.cursor())
    }

    fn data_start(&self) -> u64 {
        self.start_offset + PREAMBLE_SIZE
    }
}

impl Read for SegmentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data_len().saturating_sub(self.position);
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self
            .file
            .read_some_at(self.data_start() + self.position, &mut buf[..want])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SegmentStream {
    /// Seeks never fail; the target is clamped to `[0, data_len]`.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data_len() as i128;
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => len + delta as i128,
        };
        self.position = target.clamp(0, len) as u64;
        Ok(self.position)
    }
}

impl std::fmt::Debug for SegmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStream")
            .field("id", &self.id)
            .field("start_offset", &self.start_offset)
            .field("length", &self.length)
            .field("header", &self.header)
            .field("position", &self.position)
            .finish()
    }
}
