//! Write-Ahead Log (WAL) Module
//!
//! Coordinates appends, device management and recovery over the chained
//! segments of a [`DeviceSet`](crate::device::DeviceSet).
//!
//! ## Responsibilities
//! - Serialize every mutation through one writer thread
//! - Assign sequence ids and track active transactions
//! - Maintain the checkpoint ring and log start/end pointers
//! - Redo/undo recovery against a page store
//! - Read-only iteration for inspection tools
//!
//! ## Chain
//! ```text
//!  log start                                            log end
//!      │                                                    │
//!      ▼                                                    ▼
//! ┌─────────┐    ┌─────────┐    ┌─────────┐    ┌─────────────────┐
//! │ 0:0     │───▶│ 0:1     │───▶│ 1:0     │───▶│ 1:1 (current)   │───▶ ...
//! │ full    │◀───│ full    │◀───│ full    │◀───│ allocated       │
//! └─────────┘    └─────────┘    └─────────┘    └─────────────────┘
//! ```

mod coordinator;
mod cursor;
mod reader;
mod recovery;
mod transactions;
mod writer;

pub use coordinator::{Completion, LogCoordinator};
pub use reader::{LogReader, LogRecords};
pub use recovery::RecoveryReport;
pub use transactions::ActiveTransactionTable;

use crate::device::{CheckpointEntry, DeviceInfo, RecoveryState};
use crate::record::ActiveTransaction;
use crate::segment::{LogPosition, SegmentId};

/// Result of a completed append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub sequence_id: u32,
    /// Where the record starts
    pub position: LogPosition,
    /// Log end after the append
    pub end: LogPosition,
}

/// Point-in-time view of the log, published after every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStatus {
    pub log_start: LogPosition,
    pub log_end: LogPosition,
    pub last_segment: SegmentId,
    pub current_segment: SegmentId,
    pub next_sequence_id: u32,
    /// Checkpoint ring, oldest first
    pub checkpoints: Vec<CheckpointEntry>,
    pub active_transactions: Vec<ActiveTransaction>,
    pub devices: Vec<DeviceInfo>,
    pub recovery_state: RecoveryState,
}

impl LogStatus {
    /// Most recent valid checkpoint
    pub fn best_checkpoint(&self) -> Option<CheckpointEntry> {
        self.checkpoints.iter().rev().find(|c| c.is_valid()).copied()
    }
}
