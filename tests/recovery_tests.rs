//! Tests for crash recovery
//!
//! These tests verify:
//! - Redo of committed work and undo of rolled-back or unfinished work
//! - Synthetic rollback records for unfinished transactions
//! - Checkpoints bounding the scan, rewound to the oldest open transaction
//! - Rejection of overlapping recovery and the unusable state after failure

mod common;

use std::sync::Arc;

use chainlog::device::RecoveryState;
use chainlog::record::RecordKind;
use chainlog::segment::LogPosition;
use chainlog::{
    LogConfig, LogCoordinator, LogError, LogReader, LogRecord, Page, PageImage, PageStore,
    Result, SegmentId,
};
use common::{setup_temp_log, FailingPageStore, MemoryPageStore};
use crossbeam::channel::{self, Receiver, Sender};

// =============================================================================
// Helper Functions
// =============================================================================

fn image_a() -> PageImage {
    PageImage::filled(0xAA)
}

fn image_b() -> PageImage {
    PageImage::filled(0xBB)
}

/// Write `records`, shut down without recovering, and reopen
fn crash_after(config: &LogConfig, records: Vec<LogRecord>) -> LogCoordinator {
    {
        let log = LogCoordinator::create(config.clone()).unwrap();
        for record in records {
            log.append(record).unwrap();
        }
        log.shutdown().unwrap();
    }
    LogCoordinator::open(config.clone()).unwrap()
}

fn read_back(config: &LogConfig) -> Vec<LogRecord> {
    let mut reader = LogReader::open(&config.path).unwrap();
    reader
        .records()
        .map(|item| item.map(|(_, record)| record))
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

/// Page store that parks the first load until released
struct GatedPageStore {
    inner: MemoryPageStore,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl PageStore for GatedPageStore {
    fn load(&self, page_id: u64) -> Result<Page> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        self.inner.load(page_id)
    }

    fn store(&self, page_id: u64, page: Page) -> Result<()> {
        self.inner.store(page_id, page)
    }
}

// =============================================================================
// Redo / Undo Tests
// =============================================================================

#[test]
fn test_committed_transaction_redone() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 7, 100, image_b(), image_a()),
            LogRecord::commit_transaction(1),
        ],
    );

    // The update never reached the page
    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_b()));
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(pages.get(7), Page::new(100, image_a()));
    assert_eq!(report.transactions_redone, 1);
    assert_eq!(report.pages_redone, 1);
    assert_eq!(report.transactions_undone, 0);
    assert!(report.synthetic_rollbacks.is_empty());
    assert_eq!(report.records_scanned, 3);
    assert_eq!(log.recovery_state(), RecoveryState::Idle);
}

#[test]
fn test_redo_is_idempotent() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 7, 100, image_b(), image_a()),
            LogRecord::commit_transaction(1),
        ],
    );

    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_b()));
    log.recover(pages.clone()).unwrap();
    let stores = pages.store_count();

    let again = log.recover(pages.clone()).unwrap();
    assert_eq!(again.pages_redone, 0);
    assert_eq!(pages.store_count(), stores);
    assert_eq!(pages.get(7), Page::new(100, image_a()));
}

#[test]
fn test_rolled_back_transaction_undone() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 7, 100, image_b(), image_a()),
            LogRecord::rollback_transaction(1),
        ],
    );

    // The after-image reached the page but its timestamp did not
    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_a()));
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(pages.get(7), Page::new(99, image_b()));
    assert_eq!(report.transactions_undone, 1);
    assert_eq!(report.pages_undone, 1);
    assert!(report.synthetic_rollbacks.is_empty());
}

#[test]
fn test_unfinished_transaction_gets_synthetic_rollback() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(2),
            LogRecord::update_page(2, 7, 100, image_b(), image_a()),
        ],
    );

    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_a()));
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(pages.get(7).image, image_b());
    assert_eq!(report.synthetic_rollbacks, vec![2]);
    assert!(log.active_transactions().is_empty());
    log.shutdown().unwrap();

    let records = read_back(&config);
    assert_eq!(records.len(), 3);
    let last = records.last().unwrap();
    assert_eq!(last.kind(), RecordKind::RollbackTransaction);
    assert_eq!(last.transaction_id(), Some(2));
    assert_eq!(last.sequence_id, 3);
}

#[test]
fn test_undo_runs_newest_first() {
    let (_temp, config) = setup_temp_log();
    let image_c = PageImage::filled(0xCC);
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(4),
            LogRecord::update_page(4, 7, 100, image_b(), image_a()),
            LogRecord::update_page(4, 7, 101, image_a(), image_c.clone()),
        ],
    );

    let pages = Arc::new(MemoryPageStore::with_page(7, 50, image_c));
    let report = log.recover(pages.clone()).unwrap();

    // Undoing the second update then the first leaves the oldest image
    assert_eq!(pages.get(7), Page::new(50, image_b()));
    assert_eq!(report.pages_undone, 2);
}

#[test]
fn test_mixed_transactions() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::begin_transaction(2),
            LogRecord::create_page(1, 10, 5, image_a()),
            LogRecord::create_page(2, 11, 5, image_a()),
            LogRecord::commit_transaction(1),
            LogRecord::begin_transaction(3),
            LogRecord::delete_page(3, 12, 6, image_b()),
        ],
    );

    let pages = Arc::new(MemoryPageStore::new());
    pages.put(11, 1, image_a());
    pages.put(12, 1, PageImage::zeroed());
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(pages.get(10), Page::new(5, image_a()));
    assert!(pages.get(11).image.is_zeroed());
    assert_eq!(pages.get(12).image, image_b());
    assert_eq!(report.transactions_redone, 1);
    assert_eq!(report.transactions_undone, 2);
    assert_eq!(report.synthetic_rollbacks, vec![3, 2]);
    assert_eq!(report.max_transaction_id, Some(3));
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

#[test]
fn test_scan_starts_at_best_checkpoint() {
    let (_temp, config) = setup_temp_log();
    let log = LogCoordinator::create(config.clone()).unwrap();
    log.append(LogRecord::begin_transaction(1)).unwrap();
    log.append(LogRecord::update_page(1, 7, 100, image_b(), image_a())).unwrap();
    log.append(LogRecord::commit_transaction(1)).unwrap();
    let checkpoint = log.append(LogRecord::begin_checkpoint()).unwrap();
    log.append(LogRecord::end_checkpoint()).unwrap();
    log.append(LogRecord::begin_transaction(2)).unwrap();
    log.append(LogRecord::update_page(2, 8, 100, image_b(), image_a())).unwrap();
    log.append(LogRecord::commit_transaction(2)).unwrap();
    log.shutdown().unwrap();
    drop(log);

    let log = LogCoordinator::open(config).unwrap();
    let pages = Arc::new(MemoryPageStore::new());
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(report.start, Some(checkpoint.position));
    assert_eq!(report.transactions_redone, 1);
    assert_eq!(pages.get(8).image, image_a());
    assert_eq!(pages.get(7).timestamp, 0);
}

#[test]
fn test_scan_rewinds_to_oldest_active_transaction() {
    let (_temp, config) = setup_temp_log();
    let log = LogCoordinator::create(config.clone()).unwrap();
    log.append(LogRecord::no_op()).unwrap();
    let begin = log.append(LogRecord::begin_transaction(1)).unwrap();
    log.append(LogRecord::update_page(1, 7, 100, image_b(), image_a())).unwrap();
    log.append(LogRecord::begin_checkpoint()).unwrap();
    log.append(LogRecord::end_checkpoint()).unwrap();
    log.shutdown().unwrap();
    drop(log);

    let log = LogCoordinator::open(config).unwrap();
    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_a()));
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(report.start, Some(begin.position));
    assert_eq!(report.synthetic_rollbacks, vec![1]);
    assert_eq!(pages.get(7).image, image_b());
}

#[test]
fn test_scan_without_checkpoint_starts_at_log_start() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(&config, vec![LogRecord::no_op()]);

    let report = log.recover(Arc::new(MemoryPageStore::new())).unwrap();
    assert_eq!(report.start, Some(LogPosition::new(SegmentId::new(0, 0), 0)));
    assert_eq!(report.records_scanned, 1);
    assert_eq!(report.max_transaction_id, None);
}

// =============================================================================
// Recovery State Tests
// =============================================================================

#[test]
fn test_transaction_ids_resume_past_logged_ids() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(9),
            LogRecord::commit_transaction(9),
        ],
    );

    assert_eq!(log.next_transaction_id(), 10);
    log.recover(Arc::new(MemoryPageStore::new())).unwrap();
    assert_eq!(log.next_transaction_id(), 11);
}

#[test]
fn test_clean_reopen_does_not_reuse_transaction_ids() {
    let (_temp, config) = setup_temp_log();
    {
        let log = LogCoordinator::create(config.clone()).unwrap();
        let txn = log.next_transaction_id();
        log.append(LogRecord::begin_transaction(txn)).unwrap();
        log.append(LogRecord::update_page(txn, 7, 100, image_b(), image_a())).unwrap();
        log.append(LogRecord::commit_transaction(txn)).unwrap();
        log.shutdown().unwrap();
    }
    {
        let log = LogCoordinator::open(config.clone()).unwrap();
        let txn = log.next_transaction_id();
        assert_eq!(txn, 2);
        log.append(LogRecord::begin_transaction(txn)).unwrap();
        log.append(LogRecord::update_page(txn, 8, 200, image_b(), image_a())).unwrap();
        log.shutdown().unwrap();
    }

    let log = LogCoordinator::open(config).unwrap();
    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_b()));
    pages.put(8, 199, image_a());
    let report = log.recover(pages.clone()).unwrap();

    assert_eq!(pages.get(7), Page::new(100, image_a()));
    assert_eq!(pages.get(8), Page::new(199, image_b()));
    assert_eq!(report.transactions_redone, 1);
    assert_eq!(report.synthetic_rollbacks, vec![2]);
}

#[test]
fn test_reused_transaction_id_starts_new_group() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 7, 100, image_b(), image_a()),
            LogRecord::commit_transaction(1),
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 8, 200, image_b(), image_a()),
        ],
    );

    let pages = Arc::new(MemoryPageStore::with_page(7, 99, image_b()));
    pages.put(8, 199, image_a());
    let report = log.recover(pages.clone()).unwrap();

    // The committed group is redone; only the second one is undone
    assert_eq!(pages.get(7), Page::new(100, image_a()));
    assert_eq!(pages.get(8), Page::new(199, image_b()));
    assert_eq!(report.transactions_redone, 1);
    assert_eq!(report.pages_redone, 1);
    assert_eq!(report.transactions_undone, 1);
    assert_eq!(report.pages_undone, 1);
    assert_eq!(report.synthetic_rollbacks, vec![1]);
}

#[test]
fn test_second_recovery_rejected_while_running() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(2),
            LogRecord::update_page(2, 7, 100, image_b(), image_a()),
        ],
    );

    let (entered_tx, entered_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let gated = Arc::new(GatedPageStore {
        inner: MemoryPageStore::with_page(7, 99, image_a()),
        entered: entered_tx,
        release: release_rx,
    });

    let running = log.submit_recover(gated.clone());
    entered_rx.recv().unwrap();
    assert!(log.is_in_recovery());

    let rejected = log.submit_recover(Arc::new(MemoryPageStore::new()));
    assert!(matches!(rejected.wait(), Err(LogError::RecoveryInProgress)));

    // Appends queue behind the running recovery
    let queued = log.submit_append(LogRecord::no_op());
    assert!(queued.try_wait().is_none());

    release_tx.send(()).unwrap();
    let report = running.wait().unwrap();
    assert_eq!(report.synthetic_rollbacks, vec![2]);
    assert_eq!(gated.inner.get(7).image, image_b());

    // Rollback took sequence 3, the queued append 4
    assert_eq!(queued.wait().unwrap().sequence_id, 4);
    assert!(!log.is_in_recovery());
}

#[test]
fn test_failed_recovery_leaves_log_unusable() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 7, 100, image_b(), image_a()),
            LogRecord::commit_transaction(1),
        ],
    );

    match log.recover(Arc::new(FailingPageStore)) {
        Err(LogError::Recovery(cause)) => assert!(matches!(*cause, LogError::Page(_))),
        other => panic!("expected a recovery failure, got {:?}", other),
    }
    assert_eq!(log.recovery_state(), RecoveryState::Failed);

    assert!(matches!(log.append(LogRecord::no_op()), Err(LogError::Unusable)));
    assert!(matches!(
        log.recover(Arc::new(MemoryPageStore::new())),
        Err(LogError::Unusable)
    ));
    assert!(matches!(log.remove_device(1), Err(LogError::Unusable)));
}

#[test]
fn test_reopen_after_failed_recovery() {
    let (_temp, config) = setup_temp_log();
    let log = crash_after(
        &config,
        vec![
            LogRecord::begin_transaction(1),
            LogRecord::update_page(1, 7, 100, image_b(), image_a()),
            LogRecord::commit_transaction(1),
        ],
    );
    assert!(log.recover(Arc::new(FailingPageStore)).is_err());
    log.shutdown().unwrap();
    drop(log);

    let log = LogCoordinator::open(config).unwrap();
    let pages = Arc::new(MemoryPageStore::new());
    let report = log.recover(pages.clone()).unwrap();
    assert_eq!(report.pages_redone, 1);
    assert_eq!(pages.get(7), Page::new(100, image_a()));
}
