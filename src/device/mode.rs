//! Access mode shared by every device and stream of one log instance.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Recovery state of a log instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Normal operation
    Idle,
    /// Recovery is running; segment writes are refused
    Recovering,
    /// Recovery failed; the instance stays refused until reopened
    Failed,
}

impl RecoveryState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RecoveryState::Idle,
            1 => RecoveryState::Recovering,
            _ => RecoveryState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RecoveryState::Idle => 0,
            RecoveryState::Recovering => 1,
            RecoveryState::Failed => 2,
        }
    }
}

#[derive(Debug)]
pub struct AccessMode {
    read_only: bool,
    sync_writes: bool,
    state: AtomicU8,
}

impl AccessMode {
    pub fn new(read_only: bool, sync_writes: bool) -> Arc<Self> {
        Arc::new(Self {
            read_only,
            sync_writes,
            state: AtomicU8::new(RecoveryState::Idle.as_u8()),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// fsync segment data and headers as they are written
    pub fn sync_writes(&self) -> bool {
        self.sync_writes
    }

    pub fn recovery_state(&self) -> RecoveryState {
        RecoveryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery_state() != RecoveryState::Idle
    }

    pub fn set_recovery_state(&self, state: RecoveryState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Move Idle -> Recovering; returns the state found if that fails
    pub fn begin_recovery(&self) -> Result<(), RecoveryState> {
        self.state
            .compare_exchange(
                RecoveryState::Idle.as_u8(),
                RecoveryState::Recovering.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(RecoveryState::from_u8)
    }
}
