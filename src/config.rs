//! Configuration for chainlog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a log instance
#[derive(Debug, Clone)]
pub struct LogConfig {
    // -------------------------------------------------------------------------
    // Master Device
    // -------------------------------------------------------------------------
    /// Path of the master device file. Its root region also carries the
    /// log directory, checkpoint history and log pointers.
    pub path: PathBuf,

    /// Pages allocated when the master device is created
    pub initial_pages: u32,

    /// Pages added per growth step (0 disables growth)
    pub growth_pages: u32,

    /// Upper bound on device size in pages (0 means unbounded)
    pub max_pages: u32,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync segment data and headers
    pub sync_strategy: WalSyncStrategy,

    /// Open every device read-only; all writes are refused
    pub read_only: bool,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N appended records (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./chainlog_data/master.log"),
            initial_pages: 256, // 2 MB
            growth_pages: 128,  // 1 MB
            max_pages: 0,
            sync_strategy: WalSyncStrategy::EveryWrite,
            read_only: false,
        }
    }
}

impl LogConfig {
    /// Create a new config builder
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    /// Set the master device path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the number of pages allocated at creation
    pub fn initial_pages(mut self, pages: u32) -> Self {
        self.config.initial_pages = pages;
        self
    }

    /// Set the number of pages added per growth step
    pub fn growth_pages(mut self, pages: u32) -> Self {
        self.config.growth_pages = pages;
        self
    }

    /// Set the maximum device size in pages
    pub fn max_pages(mut self, pages: u32) -> Self {
        self.config.max_pages = pages;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Open the log read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Parameters for attaching a secondary device to the log
#[derive(Debug, Clone)]
pub struct AddDeviceParams {
    /// Logical device name recorded in the directory
    pub name: String,

    /// Backing file path
    pub path: PathBuf,

    /// Requested device id; `None` picks the next free id
    pub device_id: Option<u16>,

    /// Pages allocated when the device is created
    pub pages: u32,

    /// Pages added per growth step (0 disables growth)
    pub growth_pages: u32,

    /// Upper bound on device size in pages (0 means unbounded)
    pub max_pages: u32,
}

impl AddDeviceParams {
    /// Parameters with the given name and path, auto-assigned id and
    /// 64 non-growable pages
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            device_id: None,
            pages: 64,
            growth_pages: 0,
            max_pages: 0,
        }
    }

    /// Request a specific device id
    pub fn device_id(mut self, id: u16) -> Self {
        self.device_id = Some(id);
        self
    }

    /// Set the initial page count
    pub fn pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    /// Set the growth step
    pub fn growth_pages(mut self, pages: u32) -> Self {
        self.growth_pages = pages;
        self
    }

    /// Set the maximum device size in pages
    pub fn max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }
}
