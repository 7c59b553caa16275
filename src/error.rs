//! Error types for chainlog
//!
//! Provides a unified error type for all log operations.

use thiserror::Error;

use crate::segment::SegmentId;

/// Result type alias using LogError
pub type Result<T> = std::result::Result<T, LogError>;

/// Unified error type for chainlog operations
#[derive(Debug, Error)]
pub enum LogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Segment {0} is corrupt: neither header slot is valid")]
    SegmentCorrupt(SegmentId),

    #[error("Segment {0} is read-only")]
    SegmentReadOnly(SegmentId),

    #[error("Segment {0} cannot be written while the log is recovering")]
    SegmentRecovering(SegmentId),

    #[error("Segment length is fixed at creation")]
    SegmentLengthFixed,

    #[error("Segment {0} not found")]
    SegmentNotFound(SegmentId),

    #[error("Segment {segment} has {free} bytes free, record needs {needed}")]
    SegmentFull {
        segment: SegmentId,
        free: u64,
        needed: u64,
    },

    #[error("Log exhausted: no free segment and no device can grow")]
    LogExhausted,

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Unknown record kind: {0}")]
    UnknownRecordKind(u8),

    #[error("Record truncated")]
    RecordTruncated,

    #[error("Record of {size} bytes cannot fit in an empty segment of {capacity} bytes")]
    RecordTooLarge { size: u64, capacity: u64 },

    #[error("Page image must be {expected} bytes, got {actual}")]
    InvalidPageImage { expected: usize, actual: usize },

    // -------------------------------------------------------------------------
    // Device Errors
    // -------------------------------------------------------------------------
    #[error("Root block corrupt: {0}")]
    RootCorrupt(String),

    #[error("Root block of device {0} exceeds its slot")]
    RootOverflow(u16),

    #[error("Invalid device id: {0}")]
    DeviceIdInvalid(u16),

    #[error("Device {0} not found")]
    DeviceNotFound(u16),

    #[error("Device {0} still holds allocated segments")]
    DeviceInUse(u16),

    #[error("Device {0} is open read-only")]
    DeviceReadOnly(u16),

    #[error("Device {0} has no room for another segment")]
    DeviceFull(u16),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Coordinator Errors
    // -------------------------------------------------------------------------
    #[error("Log is shutting down")]
    ShuttingDown,

    #[error("Recovery already in progress")]
    RecoveryInProgress,

    #[error("Log is unusable after a failed recovery")]
    Unusable,

    #[error("Recovery failed: {0}")]
    Recovery(#[source] Box<LogError>),

    #[error("Writer thread panicked")]
    WriterPanicked,

    // -------------------------------------------------------------------------
    // Page Store Errors
    // -------------------------------------------------------------------------
    #[error("Page store error: {0}")]
    Page(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
