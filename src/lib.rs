//! # chainlog
//!
//! A chained, multi-device write-ahead log for a page-oriented storage
//! engine:
//! - Fixed-size log segments carved out of one or more device files
//! - Double-buffered segment headers that survive torn writes
//! - Typed log records (transaction control, checkpoints, page images)
//! - Checkpoint-bounded redo/undo recovery against a page store
//! - Single-writer request queue with concurrent status readers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Callers (any thread)                        │
//! │      append / add_device / remove_device / recover          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  crossbeam channel
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   LogCoordinator                            │
//! │        (one writer thread, RwLock status snapshot)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │  DeviceSet  │          │ Transactions │
//!   │ root + dirs │          │ + checkpoint │
//!   └──────┬──────┘          └──────────────┘
//!          │
//!          ▼
//!   ┌─────────────────────────────────────────┐
//!   │ SegmentStream  0:0 -> 0:1 -> 1:0 -> ... │
//!   └─────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod segment;
pub mod record;
pub mod device;
pub mod wal;

mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LogError, Result};
pub use config::{AddDeviceParams, LogConfig, WalSyncStrategy};
pub use segment::SegmentId;
pub use record::{LogRecord, Page, PageImage, PageStore, PAGE_SIZE};
pub use wal::{LogCoordinator, LogReader, LogStatus, RecoveryReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of chainlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
