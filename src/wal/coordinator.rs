//! Log coordinator: the public, thread-safe face of a log instance.
//!
//! ## Concurrency Model: Single-Writer Queue
//!
//! - **Mutations** (append, add/remove device, recover, sync): sent over a
//!   crossbeam channel to one writer thread that owns all log state. Each
//!   request carries a one-shot reply channel; callers get a
//!   [`Completion`] back immediately and may `wait()` on it.
//!
//! - **Queries** (status, log end, checkpoints, active transactions): read
//!   a `parking_lot::RwLock` snapshot the writer publishes after every
//!   request, so they never wait behind the queue.
//!
//! - **Shutdown**: closing the queue lets the writer drain what is already
//!   queued, sync and close every device, then exit. Later submissions fail
//!   with `ShuttingDown`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::writer::LogWriter;
use super::{Appended, LogStatus, RecoveryReport};
use crate::config::{AddDeviceParams, LogConfig, WalSyncStrategy};
use crate::device::{AccessMode, CheckpointEntry, RecoveryState};
use crate::error::{LogError, Result};
use crate::record::{ActiveTransaction, LogRecord, PageStore};
use crate::segment::LogPosition;

const WRITER_THREAD_NAME: &str = "chainlog-writer";

// =============================================================================
// Completion
// =============================================================================

/// Pending result of a queued request
#[must_use = "a completion does nothing unless waited on"]
pub struct Completion<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Completion<T> {
    /// Block until the writer has handled the request
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(LogError::ShuttingDown))
    }

    /// The result if it is already available
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(LogError::ShuttingDown)),
        }
    }

    fn ready(result: Result<T>) -> Self {
        let (tx, rx) = channel::bounded(1);
        // The receiver is held right here, so this cannot fail.
        let _ = tx.send(result);
        Self { rx }
    }
}

// =============================================================================
// Requests
// =============================================================================

type Reply<T> = Sender<Result<T>>;

enum Request {
    Append {
        record: LogRecord,
        reply: Reply<Appended>,
    },
    AddDevice {
        params: AddDeviceParams,
        reply: Reply<u16>,
    },
    RemoveDevice {
        device_id: u16,
        reply: Reply<()>,
    },
    Recover {
        pages: Arc<dyn PageStore>,
        reply: Reply<RecoveryReport>,
    },
    Sync {
        reply: Reply<()>,
    },
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct LogCoordinator {
    requests: Mutex<Option<Sender<Request>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    status: Arc<RwLock<LogStatus>>,
    mode: Arc<AccessMode>,
    transaction_ids: Arc<AtomicU32>,
}

impl LogCoordinator {
    /// Open the log at `config.path`, creating it if the file is missing
    pub fn open(config: LogConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open_existing(config)
        } else {
            Self::create(config)
        }
    }

    /// Create a new log; fails if the master file exists
    pub fn create(config: LogConfig) -> Result<Self> {
        if config.read_only {
            return Err(LogError::Config("cannot create a log read-only".to_string()));
        }
        let (mode, ids) = shared_state(&config);
        let writer = LogWriter::create(&config, Arc::clone(&mode), Arc::clone(&ids))?;
        Self::start(writer, mode, ids)
    }

    /// Open an existing log. Call [`recover`](Self::recover) before
    /// appending after an unclean shutdown.
    pub fn open_existing(config: LogConfig) -> Result<Self> {
        let (mode, ids) = shared_state(&config);
        let writer = LogWriter::open(&config, Arc::clone(&mode), Arc::clone(&ids))?;
        Self::start(writer, mode, ids)
    }

    fn start(writer: LogWriter, mode: Arc<AccessMode>, transaction_ids: Arc<AtomicU32>) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let status = Arc::new(RwLock::new(writer.status()));

        let worker_status = Arc::clone(&status);
        let handle = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || run_writer(writer, rx, worker_status))?;

        Ok(Self {
            requests: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            status,
            mode,
            transaction_ids,
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Queue a record for appending
    pub fn submit_append(&self, record: LogRecord) -> Completion<Appended> {
        self.submit(|reply| Request::Append { record, reply })
    }

    /// Append a record and wait until it is durable
    pub fn append(&self, record: LogRecord) -> Result<Appended> {
        self.submit_append(record).wait()
    }

    pub fn submit_add_device(&self, params: AddDeviceParams) -> Completion<u16> {
        self.submit(|reply| Request::AddDevice { params, reply })
    }

    /// Attach a secondary device; returns its id
    pub fn add_device(&self, params: AddDeviceParams) -> Result<u16> {
        self.submit_add_device(params).wait()
    }

    pub fn submit_remove_device(&self, device_id: u16) -> Completion<()> {
        self.submit(|reply| Request::RemoveDevice { device_id, reply })
    }

    /// Detach a secondary device that holds no log data
    pub fn remove_device(&self, device_id: u16) -> Result<()> {
        self.submit_remove_device(device_id).wait()
    }

    /// Queue a recovery pass.
    ///
    /// Fails immediately while another recovery is running, or once one
    /// has failed.
    pub fn submit_recover(&self, pages: Arc<dyn PageStore>) -> Completion<RecoveryReport> {
        match self.mode.recovery_state() {
            RecoveryState::Recovering => Completion::ready(Err(LogError::RecoveryInProgress)),
            RecoveryState::Failed => Completion::ready(Err(LogError::Unusable)),
            RecoveryState::Idle => self.submit(|reply| Request::Recover { pages, reply }),
        }
    }

    /// Replay the log against `pages` and wait for the result
    pub fn recover(&self, pages: Arc<dyn PageStore>) -> Result<RecoveryReport> {
        self.submit_recover(pages).wait()
    }

    /// Sync every device regardless of the sync strategy
    pub fn sync(&self) -> Result<()> {
        self.submit(|reply| Request::Sync { reply }).wait()
    }

    fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Completion<T> {
        let (reply, rx) = channel::bounded(1);
        if let Some(requests) = self.requests.lock().as_ref() {
            // A send error drops the reply sender, which `wait` reports
            // as ShuttingDown.
            let _ = requests.send(build(reply));
        }
        Completion { rx }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Hand out the next transaction id
    pub fn next_transaction_id(&self) -> u32 {
        self.transaction_ids.fetch_add(1, Ordering::AcqRel)
    }

    /// Snapshot as of the last completed request
    pub fn status(&self) -> LogStatus {
        self.status.read().clone()
    }

    pub fn log_start(&self) -> LogPosition {
        self.status.read().log_start
    }

    pub fn log_end(&self) -> LogPosition {
        self.status.read().log_end
    }

    pub fn best_checkpoint(&self) -> Option<CheckpointEntry> {
        self.status.read().best_checkpoint()
    }

    pub fn active_transactions(&self) -> Vec<ActiveTransaction> {
        self.status.read().active_transactions.clone()
    }

    /// Live recovery state (not delayed to the next snapshot)
    pub fn recovery_state(&self) -> RecoveryState {
        self.mode.recovery_state()
    }

    pub fn is_in_recovery(&self) -> bool {
        self.mode.recovery_state() == RecoveryState::Recovering
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop accepting requests, drain the queue and close every device
    pub fn shutdown(&self) -> Result<()> {
        drop(self.requests.lock().take());

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| LogError::WriterPanicked)?;
            info!("log coordinator stopped");
        }
        Ok(())
    }
}

impl Drop for LogCoordinator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "log coordinator shutdown failed");
        }
    }
}

fn shared_state(config: &LogConfig) -> (Arc<AccessMode>, Arc<AtomicU32>) {
    let sync_writes = config.sync_strategy == WalSyncStrategy::EveryWrite;
    (
        AccessMode::new(config.read_only, sync_writes),
        Arc::new(AtomicU32::new(1)),
    )
}

/// Writer thread body
fn run_writer(mut writer: LogWriter, requests: Receiver<Request>, status: Arc<RwLock<LogStatus>>) {
    debug!("log writer started");

    for request in requests.iter() {
        match request {
            Request::Append { record, reply } => {
                let result = writer.append(record);
                respond(&writer, &status, reply, result);
            }
            Request::AddDevice { params, reply } => {
                let result = writer.add_device(&params);
                respond(&writer, &status, reply, result);
            }
            Request::RemoveDevice { device_id, reply } => {
                let result = writer.remove_device(device_id);
                respond(&writer, &status, reply, result);
            }
            Request::Recover { pages, reply } => {
                let result = writer.recover(pages.as_ref());
                respond(&writer, &status, reply, result);
            }
            Request::Sync { reply } => {
                let result = writer.sync();
                respond(&writer, &status, reply, result);
            }
        }
    }

    if let Err(e) = writer.close() {
        warn!(error = %e, "error closing log devices");
    }
    debug!("log writer stopped");
}

/// Publish the new status before the caller can observe the result
fn respond<T>(writer: &LogWriter, status: &RwLock<LogStatus>, reply: Reply<T>, result: Result<T>) {
    *status.write() = writer.status();
    // The caller may have dropped its completion; nothing to do then.
    let _ = reply.send(result);
}
