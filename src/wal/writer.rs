//! Log writer: the exclusive state behind the coordinator's queue.
//!
//! Only the writer thread touches this. It assigns sequence ids, moves to
//! the next segment when a record does not fit, keeps the active
//! transaction table and checkpoint ring current, and persists the log end
//! pointer after every append.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::transactions::ActiveTransactionTable;
use super::{Appended, LogStatus};
use crate::config::{AddDeviceParams, LogConfig, WalSyncStrategy};
use crate::device::{AccessMode, DeviceSet, RecoveryState};
use crate::error::{LogError, Result};
use crate::record::{ActiveTransaction, LogRecord, RecordBody};
use crate::segment::{LogPosition, SegmentId};

pub(crate) struct LogWriter {
    pub(super) devices: DeviceSet,
    pub(super) mode: Arc<AccessMode>,
    /// Segment currently being appended to
    current: SegmentId,
    next_sequence_id: u32,
    pub(super) transactions: ActiveTransactionTable,
    /// Where recovery would start if the pending checkpoint completes
    checkpoint_rewind: Option<LogPosition>,
    sync_strategy: WalSyncStrategy,
    unsynced: usize,
    pub(super) transaction_ids: Arc<AtomicU32>,
}

impl LogWriter {
    /// Create a new log
    pub fn create(config: &LogConfig, mode: Arc<AccessMode>, transaction_ids: Arc<AtomicU32>) -> Result<Self> {
        let devices = DeviceSet::create(config, Arc::clone(&mode))?;
        let current = devices.metadata().log_end.segment;

        Ok(Self {
            devices,
            mode,
            current,
            next_sequence_id: 1,
            transactions: ActiveTransactionTable::new(),
            checkpoint_rewind: None,
            sync_strategy: config.sync_strategy,
            unsynced: 0,
            transaction_ids,
        })
    }

    /// Open an existing log.
    ///
    /// The tail is found by walking forward from the persisted end while the
    /// successor is allocated, so a switch that completed without the root
    /// update is still honoured.
    pub fn open(config: &LogConfig, mode: Arc<AccessMode>, transaction_ids: Arc<AtomicU32>) -> Result<Self> {
        let mut devices = DeviceSet::open(config, Arc::clone(&mode))?;

        // Step 1: locate the tail segment
        let mut current = devices.metadata().log_end.segment;
        let mut hops = 0;
        while let Some(next) = devices.next_of(current)? {
            if !devices.is_allocated(next)? {
                break;
            }
            hops += 1;
            if hops > devices.segment_count() {
                return Err(LogError::RootCorrupt("segment chain loops".to_string()));
            }
            current = next;
        }

        // Step 2: resume the sequence counter
        let next_sequence_id = match last_sequence_id(&mut devices, current)? {
            Some(last) => last.wrapping_add(1),
            None => 1,
        };

        // Step 3: reconcile the persisted end pointer
        let end = LogPosition::new(current, devices.stream(current)?.cursor() as u32);
        if devices.metadata().log_end != end {
            warn!(recorded = %devices.metadata().log_end, actual = %end, "log end pointer behind tail");
            devices.metadata_mut().log_end = end;
            if !mode.is_read_only() {
                devices.save_master()?;
            }
        }

        // Step 4: never hand out a transaction id the log already holds
        let max_transaction_id = devices.metadata().max_transaction_id;
        transaction_ids.fetch_max(max_transaction_id.wrapping_add(1).max(1), Ordering::AcqRel);

        debug!(tail = %current, next_sequence_id, max_transaction_id, "log writer ready");
        Ok(Self {
            devices,
            mode,
            current,
            next_sequence_id,
            transactions: ActiveTransactionTable::new(),
            checkpoint_rewind: None,
            sync_strategy: config.sync_strategy,
            unsynced: 0,
            transaction_ids,
        })
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Append one record at the log end
    pub fn append(&mut self, mut record: LogRecord) -> Result<Appended> {
        match self.mode.recovery_state() {
            RecoveryState::Idle => {}
            RecoveryState::Recovering => return Err(LogError::SegmentRecovering(self.current)),
            RecoveryState::Failed => return Err(LogError::Unusable),
        }
        if self.mode.is_read_only() {
            return Err(LogError::SegmentReadOnly(self.current));
        }

        // Step 1: sequence id, and the active list for checkpoints
        record.sequence_id = self.next_sequence_id;
        if record.kind().is_checkpoint() {
            record.set_active_transactions(self.transactions.snapshot());
        }

        // Step 2: make room, switching segments as needed
        self.ensure_room(record.encoded_len() as u64)?;

        // Step 3: write
        let offset = self.devices.stream(self.current)?.write_record(&mut record)?;
        let position = LogPosition::new(self.current, offset);
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);

        // Step 4: transaction and checkpoint bookkeeping
        self.track(&record, position);

        // Step 5: persist the end pointer and transaction high-water mark
        let end = LogPosition::new(self.current, self.devices.stream(self.current)?.cursor() as u32);
        let metadata = self.devices.metadata_mut();
        let previous = (metadata.log_end, metadata.max_transaction_id);
        metadata.log_end = end;
        if let Some(transaction_id) = record.transaction_id() {
            metadata.max_transaction_id = metadata.max_transaction_id.max(transaction_id);
        }
        if let Err(e) = self.devices.save_master() {
            let metadata = self.devices.metadata_mut();
            (metadata.log_end, metadata.max_transaction_id) = previous;
            return Err(e);
        }
        self.maybe_sync()?;

        debug!(
            sequence_id = record.sequence_id,
            kind = ?record.kind(),
            at = %position,
            "record appended"
        );
        Ok(Appended {
            sequence_id: record.sequence_id,
            position,
            end,
        })
    }

    fn track(&mut self, record: &LogRecord, position: LogPosition) {
        match &record.body {
            RecordBody::NoOp => {}
            RecordBody::BeginTransaction { transaction_id } => {
                self.transactions.begin(ActiveTransaction {
                    transaction_id: *transaction_id,
                    segment: position.segment,
                    offset: position.offset,
                    first_sequence_id: record.sequence_id,
                });
            }
            RecordBody::CommitTransaction { transaction_id }
            | RecordBody::RollbackTransaction { transaction_id } => {
                if self.transactions.end(*transaction_id).is_none() {
                    debug!(transaction_id, "end of a transaction that was not active");
                }
            }
            RecordBody::Page(page) => {
                if !self.transactions.is_active(page.transaction_id) {
                    warn!(transaction_id = page.transaction_id, "page record outside an active transaction");
                }
            }
            RecordBody::BeginCheckpoint { active } => {
                self.devices.metadata_mut().checkpoints.begin(position);
                self.checkpoint_rewind = Some(
                    active
                        .iter()
                        .min_by_key(|t| t.first_sequence_id)
                        .map_or(position, |t| LogPosition::new(t.segment, t.offset)),
                );
            }
            RecordBody::EndCheckpoint { .. } => {
                let metadata = self.devices.metadata_mut();
                if !metadata.checkpoints.end(position) {
                    warn!(at = %position, "end checkpoint without a pending begin");
                    return;
                }

                // Nothing before the oldest retained checkpoint is needed
                // once a checkpoint completes with no open transactions.
                let begin = metadata.checkpoints.best().map(|c| c.begin);
                if self.checkpoint_rewind.take() == begin {
                    if let Some(oldest) = metadata.checkpoints.oldest_valid() {
                        metadata.log_start = oldest.begin;
                        debug!(log_start = %oldest.begin, "log start advanced");
                    }
                }
            }
        }
    }

    /// Switch segments until `needed` bytes fit at the cursor
    fn ensure_room(&mut self, needed: u64) -> Result<()> {
        loop {
            let free = self.devices.stream(self.current)?.free_space();
            if needed <= free {
                return Ok(());
            }
            self.switch_segment(needed)?;
        }
    }

    fn switch_segment(&mut self, needed: u64) -> Result<()> {
        let from = self.current;

        // Step 1: find the successor, growing a device if the chain ends here
        let next = match self.devices.next_of(from)? {
            Some(next) => next,
            None => self.devices.grow(from)?.ok_or(LogError::LogExhausted)?,
        };

        let capacity = self.devices.descriptor(next)?.data_len();
        if needed > capacity {
            return Err(LogError::RecordTooLarge {
                size: needed,
                capacity,
            });
        }

        // Step 2: initialize it, linked back to us
        self.devices.set_prev(next, Some(from))?;
        self.devices.allocate(next)?;

        // Step 3: seal the old segment
        self.devices.set_next(from, Some(next))?;
        self.devices.mark_full(from)?;

        // Step 4: persist both tables
        if from.device() != next.device() {
            self.devices.save_device(from.device())?;
        }
        self.devices.save_device(next.device())?;

        self.current = next;
        info!(from = %from, to = %next, "switched log segment");
        Ok(())
    }

    fn maybe_sync(&mut self) -> Result<()> {
        if let WalSyncStrategy::EveryNEntries { count } = self.sync_strategy {
            self.unsynced += 1;
            if self.unsynced >= count.max(1) {
                self.devices.sync_all()?;
                self.unsynced = 0;
            }
        }
        Ok(())
    }

    /// Force everything written so far to disk
    pub fn sync(&mut self) -> Result<()> {
        self.devices.sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    // =========================================================================
    // Devices
    // =========================================================================

    pub fn add_device(&mut self, params: &AddDeviceParams) -> Result<u16> {
        self.ensure_mutable()?;
        self.devices.add_device(params)
    }

    pub fn remove_device(&mut self, device_id: u16) -> Result<()> {
        self.ensure_mutable()?;
        self.devices.remove_device(device_id)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(LogError::DeviceReadOnly(self.current.device()));
        }
        match self.mode.recovery_state() {
            RecoveryState::Idle => Ok(()),
            RecoveryState::Recovering => Err(LogError::RecoveryInProgress),
            RecoveryState::Failed => Err(LogError::Unusable),
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn status(&self) -> LogStatus {
        let metadata = self.devices.metadata();
        LogStatus {
            log_start: metadata.log_start,
            log_end: metadata.log_end,
            last_segment: metadata.last_segment,
            current_segment: self.current,
            next_sequence_id: self.next_sequence_id,
            checkpoints: metadata.checkpoints.entries().copied().collect(),
            active_transactions: self.transactions.snapshot(),
            devices: metadata.devices.clone(),
            recovery_state: self.mode.recovery_state(),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.mode.is_read_only() {
            self.devices.sync_all()?;
        }
        self.devices.close()
    }
}

/// Sequence id of the newest record at or before `tail`, found through the
/// header's last cursor
fn last_sequence_id(devices: &mut DeviceSet, tail: SegmentId) -> Result<Option<u32>> {
    let mut segment = Some(tail);
    let mut hops = 0;
    while let Some(id) = segment {
        if !devices.is_allocated(id)? {
            return Ok(None);
        }
        let stream = devices.stream(id)?;
        if stream.cursor() > 0 {
            stream.set_position(stream.last_cursor());
            return Ok(Some(stream.read_record()?.sequence_id));
        }

        hops += 1;
        if hops > devices.segment_count() {
            return Err(LogError::RootCorrupt("segment chain loops".to_string()));
        }
        segment = devices.prev_of(id)?;
    }
    Ok(None)
}
