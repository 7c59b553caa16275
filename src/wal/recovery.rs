//! Crash recovery
//!
//! ## Algorithm
//! ```text
//! 1. Start at the best checkpoint, rewound to the oldest transaction it
//!    lists as active (or at the log start with no valid checkpoint)
//! 2. Scan forward to the log end, grouping records by transaction id
//! 3. Group ends in commit   -> redo its page records, oldest first
//!    Otherwise              -> undo its page records, newest first
//! 4. Append a rollback for every undone group that did not end in one
//! ```
//!
//! Segment writes are refused while this runs. Any error leaves the
//! instance unusable until it is reopened.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use tracing::{error, info};

use super::cursor::LogCursor;
use super::writer::LogWriter;
use crate::device::RecoveryState;
use crate::error::{LogError, Result};
use crate::record::{LogRecord, PageStore, RecordKind};
use crate::segment::LogPosition;

/// Outcome of one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Where the scan started
    pub start: Option<LogPosition>,
    pub records_scanned: u64,
    /// Transactions whose last record was a commit
    pub transactions_redone: usize,
    /// Transactions rolled back, explicitly or by recovery
    pub transactions_undone: usize,
    pub pages_redone: usize,
    pub pages_undone: usize,
    /// Transactions that got a rollback record written by recovery
    pub synthetic_rollbacks: Vec<u32>,
    /// Highest transaction id seen during the scan
    pub max_transaction_id: Option<u32>,
}

impl LogWriter {
    /// Replay the log against `pages`
    pub fn recover(&mut self, pages: &dyn PageStore) -> Result<RecoveryReport> {
        if self.mode.is_read_only() {
            return Err(LogError::DeviceReadOnly(self.devices.metadata().log_end.segment.device()));
        }
        match self.mode.begin_recovery() {
            Ok(()) => {}
            Err(RecoveryState::Failed) => return Err(LogError::Unusable),
            Err(_) => return Err(LogError::RecoveryInProgress),
        }

        info!("recovery started");
        let result = self.replay(pages).and_then(|report| {
            // Step 4 runs with writes allowed again
            self.mode.set_recovery_state(RecoveryState::Idle);
            for transaction_id in &report.synthetic_rollbacks {
                self.append(LogRecord::rollback_transaction(*transaction_id))?;
            }
            Ok(report)
        });

        match result {
            Ok(report) => {
                if let Some(max) = report.max_transaction_id {
                    self.transaction_ids
                        .fetch_max(max.wrapping_add(1).max(1), Ordering::AcqRel);
                }
                info!(
                    scanned = report.records_scanned,
                    redone = report.transactions_redone,
                    undone = report.transactions_undone,
                    rollbacks = report.synthetic_rollbacks.len(),
                    "recovery finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.mode.set_recovery_state(RecoveryState::Failed);
                error!(error = %e, "recovery failed; log is unusable");
                Err(LogError::Recovery(Box::new(e)))
            }
        }
    }

    fn replay(&mut self, pages: &dyn PageStore) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        // Step 1: starting point
        let start = self.recovery_start()?;
        report.start = Some(start);

        // Step 2: group by transaction, in order of first appearance. A begin
        // for an id that already has a group opens a new group.
        let mut groups: Vec<(u32, Vec<LogRecord>)> = Vec::new();
        let mut open: HashMap<u32, usize> = HashMap::new();
        let mut cursor = LogCursor::new(start);
        while let Some((_, record)) = cursor.next(&mut self.devices)? {
            report.records_scanned += 1;
            let Some(transaction_id) = record.transaction_id() else {
                continue;
            };
            report.max_transaction_id = report.max_transaction_id.max(Some(transaction_id));

            let existing = open.get(&transaction_id).copied();
            let index = match existing {
                Some(index) if record.kind() != RecordKind::BeginTransaction => index,
                _ => {
                    groups.push((transaction_id, Vec::new()));
                    open.insert(transaction_id, groups.len() - 1);
                    groups.len() - 1
                }
            };
            groups[index].1.push(record);
        }

        let (committed, uncommitted): (Vec<_>, Vec<_>) = groups.iter().partition(|(_, group)| {
            group
                .last()
                .map_or(false, |r| r.kind() == RecordKind::CommitTransaction)
        });

        // Step 3a: redo committed work in log order
        for (_, group) in &committed {
            for record in group {
                if let Some(page) = record.as_page() {
                    if page.roll_forward(pages)? {
                        report.pages_redone += 1;
                    }
                }
            }
            report.transactions_redone += 1;
        }

        // Step 3b: undo everything else, newest first
        for (transaction_id, group) in uncommitted.iter().rev() {
            for record in group.iter().rev() {
                if let Some(page) = record.as_page() {
                    if page.roll_back(pages)? {
                        report.pages_undone += 1;
                    }
                }
            }
            report.transactions_undone += 1;

            let rolled_back = group
                .last()
                .map_or(false, |r| r.kind() == RecordKind::RollbackTransaction);
            if !rolled_back {
                report.synthetic_rollbacks.push(*transaction_id);
            }
        }

        // Everything is resolved; nothing survives in the active table
        for transaction_id in open.keys() {
            self.transactions.end(*transaction_id);
        }

        Ok(report)
    }

    /// Begin of the best checkpoint, rewound to its oldest active
    /// transaction; the log start when there is no valid checkpoint
    fn recovery_start(&mut self) -> Result<LogPosition> {
        let metadata = self.devices.metadata();
        let Some(checkpoint) = metadata.checkpoints.best().copied() else {
            return Ok(metadata.log_start);
        };

        let stream = self.devices.stream(checkpoint.begin.segment)?;
        stream.set_position(checkpoint.begin.offset as u64);
        let record = stream.read_record()?;
        if record.kind() != RecordKind::BeginCheckpoint {
            return Err(LogError::RootCorrupt(format!(
                "checkpoint at {} is a {:?} record",
                checkpoint.begin,
                record.kind()
            )));
        }

        Ok(record
            .active_transactions()
            .iter()
            .min_by_key(|t| t.first_sequence_id)
            .map_or(checkpoint.begin, |t| LogPosition::new(t.segment, t.offset)))
    }
}
