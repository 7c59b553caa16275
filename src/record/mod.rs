//! Log Record Module
//!
//! Defines the closed set of record kinds the log carries.
//!
//! ## Record Kinds
//! ```text
//! 0 NoOp                 -
//! 1 BeginCheckpoint      active-transaction snapshot
//! 2 EndCheckpoint        active-transaction snapshot
//! 3 BeginTransaction     transaction id
//! 4 CommitTransaction    transaction id
//! 5 RollbackTransaction  transaction id
//! 6 CreatePage           transaction id, page id, timestamp, after
//! 7 UpdatePage           transaction id, page id, timestamp, before, after
//! 8 DeletePage           transaction id, page id, timestamp, before
//! ```

mod codec;
mod page;

pub use codec::{RECORD_HEADER_SIZE, SNAPSHOT_SIZE};
pub use page::{
    BufferSource, HeapBuffers, Page, PageChange, PageImage, PageRecord, PageStore, PAGE_SIZE,
};

use crate::error::LogError;
use crate::segment::SegmentId;

/// One-byte record kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    NoOp = 0,
    BeginCheckpoint = 1,
    EndCheckpoint = 2,
    BeginTransaction = 3,
    CommitTransaction = 4,
    RollbackTransaction = 5,
    CreatePage = 6,
    UpdatePage = 7,
    DeletePage = 8,
}

impl RecordKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Kinds that carry a transaction id
    pub fn is_transaction(self) -> bool {
        !matches!(
            self,
            RecordKind::NoOp | RecordKind::BeginCheckpoint | RecordKind::EndCheckpoint
        )
    }

    pub fn is_page(self) -> bool {
        matches!(
            self,
            RecordKind::CreatePage | RecordKind::UpdatePage | RecordKind::DeletePage
        )
    }

    pub fn is_checkpoint(self) -> bool {
        matches!(self, RecordKind::BeginCheckpoint | RecordKind::EndCheckpoint)
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = LogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => RecordKind::NoOp,
            1 => RecordKind::BeginCheckpoint,
            2 => RecordKind::EndCheckpoint,
            3 => RecordKind::BeginTransaction,
            4 => RecordKind::CommitTransaction,
            5 => RecordKind::RollbackTransaction,
            6 => RecordKind::CreatePage,
            7 => RecordKind::UpdatePage,
            8 => RecordKind::DeletePage,
            other => return Err(LogError::UnknownRecordKind(other)),
        })
    }
}

/// Snapshot of a transaction that was open when a checkpoint was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTransaction {
    pub transaction_id: u32,
    /// Where the transaction's begin record lives
    pub segment: SegmentId,
    pub offset: u32,
    /// Sequence id of the begin record
    pub first_sequence_id: u32,
}

/// Kind-specific record payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    NoOp,
    BeginCheckpoint { active: Vec<ActiveTransaction> },
    EndCheckpoint { active: Vec<ActiveTransaction> },
    BeginTransaction { transaction_id: u32 },
    CommitTransaction { transaction_id: u32 },
    RollbackTransaction { transaction_id: u32 },
    Page(PageRecord),
}

/// A log record: common header fields plus a typed body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Assigned by the log when the record is appended
    pub sequence_id: u32,
    /// Offset of the previous record in the same segment
    pub back_link: u32,
    pub body: RecordBody,
}

impl LogRecord {
    pub fn new(body: RecordBody) -> Self {
        Self {
            sequence_id: 0,
            back_link: 0,
            body,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn no_op() -> Self {
        Self::new(RecordBody::NoOp)
    }

    /// The active-transaction list is filled in by the log at append time
    pub fn begin_checkpoint() -> Self {
        Self::new(RecordBody::BeginCheckpoint { active: Vec::new() })
    }

    pub fn end_checkpoint() -> Self {
        Self::new(RecordBody::EndCheckpoint { active: Vec::new() })
    }

    pub fn begin_transaction(transaction_id: u32) -> Self {
        Self::new(RecordBody::BeginTransaction { transaction_id })
    }

    pub fn commit_transaction(transaction_id: u32) -> Self {
        Self::new(RecordBody::CommitTransaction { transaction_id })
    }

    pub fn rollback_transaction(transaction_id: u32) -> Self {
        Self::new(RecordBody::RollbackTransaction { transaction_id })
    }

    pub fn create_page(transaction_id: u32, page_id: u64, timestamp: i64, after: PageImage) -> Self {
        Self::page(transaction_id, page_id, timestamp, PageChange::Create { after })
    }

    pub fn update_page(
        transaction_id: u32,
        page_id: u64,
        timestamp: i64,
        before: PageImage,
        after: PageImage,
    ) -> Self {
        Self::page(transaction_id, page_id, timestamp, PageChange::Update { before, after })
    }

    pub fn delete_page(transaction_id: u32, page_id: u64, timestamp: i64, before: PageImage) -> Self {
        Self::page(transaction_id, page_id, timestamp, PageChange::Delete { before })
    }

    fn page(transaction_id: u32, page_id: u64, timestamp: i64, change: PageChange) -> Self {
        Self::new(RecordBody::Page(PageRecord {
            transaction_id,
            page_id,
            timestamp,
            change,
        }))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn kind(&self) -> RecordKind {
        match &self.body {
            RecordBody::NoOp => RecordKind::NoOp,
            RecordBody::BeginCheckpoint { .. } => RecordKind::BeginCheckpoint,
            RecordBody::EndCheckpoint { .. } => RecordKind::EndCheckpoint,
            RecordBody::BeginTransaction { .. } => RecordKind::BeginTransaction,
            RecordBody::CommitTransaction { .. } => RecordKind::CommitTransaction,
            RecordBody::RollbackTransaction { .. } => RecordKind::RollbackTransaction,
            RecordBody::Page(page) => page.change.kind(),
        }
    }

    pub fn transaction_id(&self) -> Option<u32> {
        match &self.body {
            RecordBody::BeginTransaction { transaction_id }
            | RecordBody::CommitTransaction { transaction_id }
            | RecordBody::RollbackTransaction { transaction_id } => Some(*transaction_id),
            RecordBody::Page(page) => Some(page.transaction_id),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&PageRecord> {
        match &self.body {
            RecordBody::Page(page) => Some(page),
            _ => None,
        }
    }

    /// Snapshot carried by a checkpoint record; empty for other kinds
    pub fn active_transactions(&self) -> &[ActiveTransaction] {
        match &self.body {
            RecordBody::BeginCheckpoint { active } | RecordBody::EndCheckpoint { active } => active,
            _ => &[],
        }
    }

    /// Replace the snapshot of a checkpoint record; no-op for other kinds
    pub(crate) fn set_active_transactions(&mut self, snapshot: Vec<ActiveTransaction>) {
        if let RecordBody::BeginCheckpoint { active } | RecordBody::EndCheckpoint { active } =
            &mut self.body
        {
            *active = snapshot;
        }
    }
}
