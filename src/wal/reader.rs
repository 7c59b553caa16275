//! Read-only log reader
//!
//! Opens the device files of a log without a coordinator and walks its
//! records across segments and devices. Nothing is ever written.

use std::path::PathBuf;

use super::cursor::LogCursor;
use crate::config::LogConfig;
use crate::device::{AccessMode, Device, DeviceSet, RootMetadata, MASTER_DEVICE_ID};
use crate::error::Result;
use crate::record::LogRecord;
use crate::segment::{LogPosition, SegmentId};

pub struct LogReader {
    devices: DeviceSet,
}

impl LogReader {
    /// Open the log whose master device lives at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let config = LogConfig::builder().path(path).read_only(true).build();
        let devices = DeviceSet::open(&config, AccessMode::new(true, false))?;
        Ok(Self { devices })
    }

    pub fn metadata(&self) -> &RootMetadata {
        self.devices.metadata()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.devices()
    }

    /// Records from the log start pointer to the end
    pub fn records(&mut self) -> LogRecords<'_> {
        let start = self.devices.metadata().log_start;
        self.records_from(start)
    }

    /// Every record still on disk, from the first segment of the master
    pub fn all_records(&mut self) -> LogRecords<'_> {
        self.records_from(LogPosition::new(SegmentId::new(MASTER_DEVICE_ID, 0), 0))
    }

    /// Records from an arbitrary record boundary
    pub fn records_from(&mut self, start: LogPosition) -> LogRecords<'_> {
        LogRecords {
            devices: &mut self.devices,
            cursor: LogCursor::new(start),
            done: false,
        }
    }
}

/// Iterator over `(position, record)` pairs; stops after the first error
pub struct LogRecords<'a> {
    devices: &'a mut DeviceSet,
    cursor: LogCursor,
    done: bool,
}

impl Iterator for LogRecords<'_> {
    type Item = Result<(LogPosition, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.next(self.devices) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
