//! Tests for segment addressing, headers and streams
//!
//! These tests verify:
//! - Segment id packing, ordering and link encoding
//! - The wraparound-aware header comparator
//! - Slot selection when one or both header slots are damaged
//! - Record I/O, back links and write refusal on a segment stream
//! - Torn and failed writes leaving the header untouched

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use chainlog::device::{AccessMode, BackingFile, RecoveryState};
use chainlog::segment::{
    is_newer, select_header, timestamp_hash, HeaderSlot, SegmentDescriptor, SegmentHeader,
    SegmentId, SegmentStream, NO_SEGMENT, PREAMBLE_SIZE,
};
use chainlog::{LogError, LogRecord};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const SEGMENT_LEN: u64 = 4096;

fn setup_temp_segment() -> (TempDir, Arc<BackingFile>, SegmentDescriptor) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("segment.dat");
    let file = Arc::new(BackingFile::create(&path, SEGMENT_LEN).unwrap());
    let descriptor = SegmentDescriptor::new(SegmentId::new(0, 0), 0, SEGMENT_LEN);
    (temp_dir, file, descriptor)
}

fn writable() -> Arc<AccessMode> {
    AccessMode::new(false, true)
}

fn fresh_stream(file: &Arc<BackingFile>, descriptor: &SegmentDescriptor) -> SegmentStream {
    let mut stream = SegmentStream::new(Arc::clone(file), descriptor, writable());
    stream.init_new().unwrap();
    stream
}

fn corrupt_slot(path: &Path, slot: HeaderSlot) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(slot.offset() + 29)).unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    file.sync_all().unwrap();
}

fn header_with_timestamp(timestamp: i64) -> SegmentHeader {
    let mut header = SegmentHeader::new(SegmentId::new(0, 0));
    header.timestamp = timestamp;
    header.hash = timestamp_hash(timestamp);
    header
}

// =============================================================================
// Segment Id Tests
// =============================================================================

#[test]
fn test_segment_id_packs_device_high() {
    let id = SegmentId::new(0x0001, 0x0002);
    assert_eq!(id.raw(), 0x0001_0002);
    assert_eq!(SegmentId::from_raw(0x0001_0002), id);
    assert_eq!(id.device(), 1);
    assert_eq!(id.index(), 2);
}

#[test]
fn test_segment_id_orders_by_device_then_index() {
    assert!(SegmentId::new(0, 5) < SegmentId::new(1, 0));
    assert!(SegmentId::new(1, 0) < SegmentId::new(1, 1));
    assert_eq!(SegmentId::new(3, 3), SegmentId::new(3, 3));
}

#[test]
fn test_segment_id_display() {
    assert_eq!(SegmentId::new(1, 0x1A).to_string(), "0001:001A");
}

#[test]
fn test_no_segment_link_encoding() {
    assert_eq!(SegmentId::encode_link(None), NO_SEGMENT);
    assert_eq!(SegmentId::decode_link(NO_SEGMENT), None);

    let id = SegmentId::new(0, 0);
    assert_eq!(SegmentId::encode_link(Some(id)), 0);
    assert_eq!(SegmentId::decode_link(0), Some(id));
}

// =============================================================================
// Comparator Tests
// =============================================================================

#[test]
fn test_is_newer_plain() {
    assert!(is_newer(2, 1));
    assert!(!is_newer(1, 2));
    assert!(!is_newer(7, 7));
}

#[test]
fn test_is_newer_across_rollover() {
    // i64::MIN is what i64::MAX wraps to
    assert!(is_newer(i64::MIN, i64::MAX));
    assert!(!is_newer(i64::MAX, i64::MIN));
    assert!(is_newer(i64::MIN + 5, i64::MAX - 5));
}

proptest! {
    #[test]
    fn prop_successor_is_newer(start in any::<i64>(), step in 1i64..=i64::MAX) {
        let later = start.wrapping_add(step);
        prop_assert!(is_newer(later, start));
        prop_assert!(!is_newer(start, later));
    }

    #[test]
    fn prop_comparator_is_antisymmetric(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a.wrapping_sub(b) != i64::MIN);
        prop_assert!(!(is_newer(a, b) && is_newer(b, a)));
        if a != b {
            prop_assert!(is_newer(a, b) || is_newer(b, a));
        }
    }
}

// =============================================================================
// Header Selection Tests
// =============================================================================

#[test]
fn test_select_later_valid_slot() {
    let a = header_with_timestamp(10);
    let b = header_with_timestamp(11);
    let (slot, header) = select_header(&a, &b).unwrap();
    assert_eq!(slot, HeaderSlot::B);
    assert_eq!(header.timestamp, 11);
}

#[test]
fn test_select_tie_prefers_slot_a() {
    let a = header_with_timestamp(4);
    let b = header_with_timestamp(4);
    assert_eq!(select_header(&a, &b).unwrap().0, HeaderSlot::A);
}

#[test]
fn test_select_skips_invalid_slot() {
    let mut a = header_with_timestamp(50);
    a.hash ^= 1;
    let b = header_with_timestamp(3);
    assert_eq!(select_header(&a, &b).unwrap().0, HeaderSlot::B);
}

#[test]
fn test_select_both_invalid() {
    let mut a = header_with_timestamp(1);
    let mut b = header_with_timestamp(2);
    a.hash ^= 1;
    b.hash ^= 1;
    assert!(select_header(&a, &b).is_none());
}

#[test]
fn test_header_encode_decode() {
    let mut header = header_with_timestamp(-9);
    header.prev = Some(SegmentId::new(2, 3));
    header.next = None;
    header.cursor = 1234;
    header.last_cursor = 1000;
    header.status = 0x03;

    let decoded = SegmentHeader::decode(&header.encode());
    assert_eq!(decoded, header);
    assert!(decoded.is_valid());
    assert!(decoded.is_allocated());
    assert!(decoded.is_full());
}

// =============================================================================
// Stream Initialization Tests
// =============================================================================

#[test]
fn test_init_new_writes_both_slots() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let stream = fresh_stream(&file, &descriptor);

    assert!(stream.is_allocated());
    assert_eq!(stream.cursor(), 0);
    assert_eq!(stream.next_slot(), HeaderSlot::A);
    assert_eq!(stream.data_len(), SEGMENT_LEN - PREAMBLE_SIZE);

    let mut loaded = SegmentStream::new(Arc::clone(&file), &descriptor, writable());
    loaded.init_load().unwrap();
    assert_eq!(loaded.header(), stream.header());
}

#[test]
fn test_init_load_uses_surviving_slot() {
    let (temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);

    // Slot B now holds next = None; this flush puts next = 0:9 into slot A
    stream.set_next(Some(SegmentId::new(0, 9)));
    stream.flush().unwrap();
    drop(stream);

    corrupt_slot(&temp.path().join("segment.dat"), HeaderSlot::A);

    let mut loaded = SegmentStream::new(Arc::clone(&file), &descriptor, writable());
    loaded.init_load().unwrap();
    assert_eq!(loaded.next(), None);
    assert_eq!(loaded.cursor(), 0);
    assert_eq!(loaded.next_slot(), HeaderSlot::A);
}

#[test]
fn test_init_load_both_slots_corrupt() {
    let (temp, file, descriptor) = setup_temp_segment();
    drop(fresh_stream(&file, &descriptor));

    let path = temp.path().join("segment.dat");
    corrupt_slot(&path, HeaderSlot::A);
    corrupt_slot(&path, HeaderSlot::B);

    let mut loaded = SegmentStream::new(Arc::clone(&file), &descriptor, writable());
    match loaded.init_load() {
        Err(LogError::SegmentCorrupt(id)) => assert_eq!(id, SegmentId::new(0, 0)),
        other => panic!("expected SegmentCorrupt, got {:?}", other),
    }
}

// =============================================================================
// Record I/O Tests
// =============================================================================

#[test]
fn test_write_and_read_records() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);

    let mut first = LogRecord::begin_transaction(7);
    first.sequence_id = 1;
    let mut second = LogRecord::commit_transaction(7);
    second.sequence_id = 2;

    let first_at = stream.write_record(&mut first).unwrap();
    let second_at = stream.write_record(&mut second).unwrap();
    assert_eq!(first_at, 0);
    assert_eq!(second_at as usize, first.encoded_len());
    assert_eq!(second.back_link, first_at);
    assert_eq!(stream.last_cursor(), second_at as u64);

    stream.seek(SeekFrom::Start(0)).unwrap();
    assert_eq!(stream.read_record().unwrap(), first);
    assert_eq!(stream.read_record().unwrap(), second);
    assert_eq!(stream.position(), stream.cursor());
}

#[test]
fn test_cursor_survives_reload() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);
    for i in 0..5 {
        let mut record = LogRecord::no_op();
        record.sequence_id = i;
        stream.write_record(&mut record).unwrap();
    }
    let cursor = stream.cursor();
    let last = stream.last_cursor();
    drop(stream);

    let mut loaded = SegmentStream::new(Arc::clone(&file), &descriptor, writable());
    loaded.init_load().unwrap();
    assert_eq!(loaded.cursor(), cursor);
    assert_eq!(loaded.last_cursor(), last);

    loaded.set_position(last);
    assert_eq!(loaded.read_record().unwrap().sequence_id, 4);
}

#[test]
fn test_write_past_end_fails() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);

    let mut written = 0;
    loop {
        match stream.write_record(&mut LogRecord::commit_transaction(1)) {
            Ok(_) => written += 1,
            Err(LogError::SegmentFull { needed, free, .. }) => {
                assert!(needed > free);
                break;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(written, (SEGMENT_LEN - PREAMBLE_SIZE) / 13);
}

#[test]
fn test_failed_write_leaves_header_untouched() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);
    while stream.write_record(&mut LogRecord::commit_transaction(1)).is_ok() {}

    let header = *stream.header();
    let slot = stream.next_slot();
    assert!(matches!(
        stream.write_record(&mut LogRecord::commit_transaction(2)),
        Err(LogError::SegmentFull { .. })
    ));
    assert_eq!(*stream.header(), header);
    assert_eq!(stream.next_slot(), slot);
}

#[test]
fn test_torn_record_ignored_on_reload() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);
    let mut first = LogRecord::begin_transaction(3);
    first.sequence_id = 1;
    stream.write_record(&mut first).unwrap();
    let cursor = stream.cursor();
    drop(stream);

    // Part of the next record reached the data region; its header update
    // never did
    let mut torn = LogRecord::commit_transaction(3);
    torn.sequence_id = 2;
    file.write_at(PREAMBLE_SIZE + cursor, &torn.encode()[..6]).unwrap();

    let mut loaded = SegmentStream::new(Arc::clone(&file), &descriptor, writable());
    loaded.init_load().unwrap();
    assert_eq!(loaded.cursor(), cursor);
    assert_eq!(loaded.read_record().unwrap(), first);
    assert_eq!(loaded.position(), loaded.cursor());

    // The next write lands over the partial bytes
    let mut replacement = LogRecord::rollback_transaction(3);
    replacement.sequence_id = 2;
    assert_eq!(loaded.write_record(&mut replacement).unwrap() as u64, cursor);
    loaded.set_position(cursor);
    assert_eq!(loaded.read_record().unwrap(), replacement);
    assert_eq!(loaded.position(), loaded.cursor());
}

#[test]
fn test_write_refused_read_only() {
    let (_temp, file, descriptor) = setup_temp_segment();
    drop(fresh_stream(&file, &descriptor));

    let mut stream = SegmentStream::new(Arc::clone(&file), &descriptor, AccessMode::new(true, false));
    stream.init_load().unwrap();
    assert!(matches!(
        stream.write_record(&mut LogRecord::no_op()),
        Err(LogError::SegmentReadOnly(_))
    ));
}

#[test]
fn test_write_refused_while_recovering() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mode = writable();
    let mut stream = SegmentStream::new(Arc::clone(&file), &descriptor, Arc::clone(&mode));
    stream.init_new().unwrap();

    mode.set_recovery_state(RecoveryState::Recovering);
    assert!(matches!(
        stream.write_record(&mut LogRecord::no_op()),
        Err(LogError::SegmentRecovering(_))
    ));

    mode.set_recovery_state(RecoveryState::Idle);
    stream.write_record(&mut LogRecord::no_op()).unwrap();
}

#[test]
fn test_set_len_rejected() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);
    assert!(matches!(stream.set_len(10), Err(LogError::SegmentLengthFixed)));
}

#[test]
fn test_seek_clamps_to_data_region() {
    let (_temp, file, descriptor) = setup_temp_segment();
    let mut stream = fresh_stream(&file, &descriptor);
    let len = stream.data_len();

    assert_eq!(stream.seek(SeekFrom::Start(len * 10)).unwrap(), len);
    assert_eq!(stream.seek(SeekFrom::Current(-(len as i64) * 2)).unwrap(), 0);
    assert_eq!(stream.seek(SeekFrom::End(100)).unwrap(), len);
    assert_eq!(stream.seek(SeekFrom::End(-16)).unwrap(), len - 16);
}
