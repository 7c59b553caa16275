//! Record wire format
//!
//! ## Record Format (little-endian)
//! ```text
//! ┌──────────┬──────────────┬───────────────┬─────────────────────────┐
//! │ kind (1) │ sequence (4) │ back link (4) │ payload (kind-specific) │
//! └──────────┴──────────────┴───────────────┴─────────────────────────┘
//!
//! checkpoint:  count (2) + count x [segment (4), offset (4),
//!                                   first sequence (4), transaction (4)]
//! transaction: transaction id (4)
//! page:        transaction id (4), page id (8), timestamp (8),
//!              image(s) of 8192 bytes (update: before, then after)
//! ```
//!
//! The snapshot segment is the full 32-bit [`SegmentId`] (device and
//! index), not a 16-bit index, so a transaction that began on a secondary
//! device can be located again.

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};

use super::page::{BufferSource, HeapBuffers, PageRecord};
use super::{ActiveTransaction, LogRecord, RecordBody, RecordKind};
use crate::error::{LogError, Result};
use crate::segment::SegmentId;
use crate::wire::{is_eof, WireRead};

/// kind + sequence id + back link
pub const RECORD_HEADER_SIZE: usize = 9;

/// One active-transaction snapshot inside a checkpoint record
pub const SNAPSHOT_SIZE: usize = 16;

/// A short read means the record was cut off
pub(crate) fn map_read_error(err: io::Error) -> LogError {
    if is_eof(&err) {
        LogError::RecordTruncated
    } else {
        LogError::Io(err)
    }
}

impl LogRecord {
    /// Exact number of bytes [`encode`](Self::encode) produces
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE
            + match &self.body {
                RecordBody::NoOp => 0,
                RecordBody::BeginCheckpoint { active } | RecordBody::EndCheckpoint { active } => {
                    2 + active.len().min(u16::MAX as usize) * SNAPSHOT_SIZE
                }
                RecordBody::BeginTransaction { .. }
                | RecordBody::CommitTransaction { .. }
                | RecordBody::RollbackTransaction { .. } => 4,
                RecordBody::Page(page) => page.encoded_len(),
            }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind().as_u8());
        buf.put_u32_le(self.sequence_id);
        buf.put_u32_le(self.back_link);

        match &self.body {
            RecordBody::NoOp => {}
            RecordBody::BeginCheckpoint { active } | RecordBody::EndCheckpoint { active } => {
                let count = active.len().min(u16::MAX as usize);
                buf.put_u16_le(count as u16);
                for txn in &active[..count] {
                    buf.put_u32_le(txn.segment.raw());
                    buf.put_u32_le(txn.offset);
                    buf.put_u32_le(txn.first_sequence_id);
                    buf.put_u32_le(txn.transaction_id);
                }
            }
            RecordBody::BeginTransaction { transaction_id }
            | RecordBody::CommitTransaction { transaction_id }
            | RecordBody::RollbackTransaction { transaction_id } => {
                buf.put_u32_le(*transaction_id);
            }
            RecordBody::Page(page) => page.encode_into(buf),
        }
    }

    /// Decode one record with heap-allocated page images
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Self::decode(reader, &HeapBuffers)
    }

    /// Decode one record; page images are read into buffers from `buffers`
    pub fn decode<R: Read + ?Sized>(reader: &mut R, buffers: &dyn BufferSource) -> Result<Self> {
        let kind = RecordKind::try_from(reader.read_u8_le().map_err(map_read_error)?)?;
        let sequence_id = reader.read_u32_le().map_err(map_read_error)?;
        let back_link = reader.read_u32_le().map_err(map_read_error)?;

        let body = match kind {
            RecordKind::NoOp => RecordBody::NoOp,
            RecordKind::BeginCheckpoint => RecordBody::BeginCheckpoint {
                active: decode_snapshots(reader)?,
            },
            RecordKind::EndCheckpoint => RecordBody::EndCheckpoint {
                active: decode_snapshots(reader)?,
            },
            RecordKind::BeginTransaction => RecordBody::BeginTransaction {
                transaction_id: reader.read_u32_le().map_err(map_read_error)?,
            },
            RecordKind::CommitTransaction => RecordBody::CommitTransaction {
                transaction_id: reader.read_u32_le().map_err(map_read_error)?,
            },
            RecordKind::RollbackTransaction => RecordBody::RollbackTransaction {
                transaction_id: reader.read_u32_le().map_err(map_read_error)?,
            },
            RecordKind::CreatePage | RecordKind::UpdatePage | RecordKind::DeletePage => {
                RecordBody::Page(PageRecord::decode(kind, reader, buffers)?)
            }
        };

        Ok(Self {
            sequence_id,
            back_link,
            body,
        })
    }
}

fn decode_snapshots<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<ActiveTransaction>> {
    let count = reader.read_u16_le().map_err(map_read_error)? as usize;
    let mut active = Vec::with_capacity(count);
    for _ in 0..count {
        let segment = SegmentId::from_raw(reader.read_u32_le().map_err(map_read_error)?);
        let offset = reader.read_u32_le().map_err(map_read_error)?;
        let first_sequence_id = reader.read_u32_le().map_err(map_read_error)?;
        let transaction_id = reader.read_u32_le().map_err(map_read_error)?;
        active.push(ActiveTransaction {
            transaction_id,
            segment,
            offset,
            first_sequence_id,
        });
    }
    Ok(active)
}
