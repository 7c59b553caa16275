//! Forward cursor over the chained log.
//!
//! Reads each allocated segment up to its header cursor, then follows the
//! next link while the successor is allocated.

use crate::device::DeviceSet;
use crate::error::{LogError, Result};
use crate::record::LogRecord;
use crate::segment::{LogPosition, SegmentId};

pub(crate) struct LogCursor {
    segment: SegmentId,
    position: u64,
    hops: usize,
}

impl LogCursor {
    pub fn new(start: LogPosition) -> Self {
        Self {
            segment: start.segment,
            position: start.offset as u64,
            hops: 0,
        }
    }

    /// Next record and where it starts, or `None` at the end of the log
    pub fn next(&mut self, devices: &mut DeviceSet) -> Result<Option<(LogPosition, LogRecord)>> {
        loop {
            let stream = devices.stream(self.segment)?;
            if !stream.is_allocated() {
                return Ok(None);
            }

            if self.position < stream.cursor() {
                let at = LogPosition::new(self.segment, self.position as u32);
                stream.set_position(self.position);
                let record = stream.read_record()?;
                self.position = stream.position();
                return Ok(Some((at, record)));
            }

            let next = stream.next();
            match next {
                Some(next) if devices.is_allocated(next)? => {
                    self.hops += 1;
                    if self.hops > devices.segment_count() {
                        return Err(LogError::RootCorrupt(format!(
                            "segment chain loops back through {}",
                            next
                        )));
                    }
                    self.segment = next;
                    self.position = 0;
                }
                _ => return Ok(None),
            }
        }
    }
}
