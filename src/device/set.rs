//! Device set: the master device, its secondaries and the log directory.
//!
//! Owns every device of one log instance and keeps the chain links between
//! their segments consistent when devices are added, grown or removed.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::directory::{DeviceInfo, RootMetadata, CHECKPOINT_HISTORY};
use super::mode::AccessMode;
use super::Device;
use crate::config::{AddDeviceParams, LogConfig};
use crate::error::{LogError, Result};
use crate::segment::{SegmentDescriptor, SegmentId, SegmentStream};

/// The master device always has id 0
pub const MASTER_DEVICE_ID: u16 = 0;

const MASTER_DEVICE_NAME: &str = "master";

pub struct DeviceSet {
    devices: BTreeMap<u16, Device>,
    metadata: RootMetadata,
    mode: Arc<AccessMode>,
}

impl DeviceSet {
    /// Create a new log on a fresh master device.
    ///
    /// The first segment is allocated and the log start and end both point
    /// at its beginning.
    pub fn create(config: &LogConfig, mode: Arc<AccessMode>) -> Result<Self> {
        let info = DeviceInfo {
            id: MASTER_DEVICE_ID,
            name: MASTER_DEVICE_NAME.to_string(),
            path: config.path.clone(),
        };
        check_path(&info)?;

        // Step 1: master file and its segment table
        let mut master = Device::create(
            info.clone(),
            config.initial_pages,
            config.growth_pages,
            config.max_pages,
            Arc::clone(&mode),
        )?;
        let (first, last) = master
            .init_segments(None)?
            .ok_or_else(|| LogError::Config("master device has no segments".to_string()))?;

        // Step 2: first segment ready for records
        master.allocate(first.index())?;

        // Step 3: directory
        let metadata = RootMetadata::new(info, first, last);
        let mut devices = BTreeMap::new();
        devices.insert(MASTER_DEVICE_ID, master);

        let mut set = Self {
            devices,
            metadata,
            mode,
        };
        set.save_master()?;

        info!(path = %config.path.display(), first = %first, last = %last, "log created");
        Ok(set)
    }

    /// Open the master device at `config.path` and every device its
    /// directory names
    pub fn open(config: &LogConfig, mode: Arc<AccessMode>) -> Result<Self> {
        let master_info = DeviceInfo {
            id: MASTER_DEVICE_ID,
            name: MASTER_DEVICE_NAME.to_string(),
            path: config.path.clone(),
        };
        let (master, metadata) = Device::open(master_info, Arc::clone(&mode))?;
        let metadata = metadata.ok_or_else(|| {
            LogError::RootCorrupt(format!("{} carries no log directory", config.path.display()))
        })?;

        let mut devices = BTreeMap::new();
        devices.insert(MASTER_DEVICE_ID, master);

        for info in metadata.devices.iter().filter(|d| d.id != MASTER_DEVICE_ID) {
            let (device, _) = Device::open(info.clone(), Arc::clone(&mode))?;
            devices.insert(info.id, device);
        }

        info!(
            path = %config.path.display(),
            devices = devices.len(),
            start = %metadata.log_start,
            end = %metadata.log_end,
            "log opened"
        );
        Ok(Self {
            devices,
            metadata,
            mode,
        })
    }

    // =========================================================================
    // Directory
    // =========================================================================

    /// Attach a secondary device; its segments chain after the current last
    /// segment
    pub fn add_device(&mut self, params: &AddDeviceParams) -> Result<u16> {
        // Step 1: pick and validate the id
        let id = match params.device_id {
            Some(id) => {
                if id == MASTER_DEVICE_ID || id == u16::MAX || self.devices.contains_key(&id) {
                    return Err(LogError::DeviceIdInvalid(id));
                }
                id
            }
            None => self.next_device_id()?,
        };

        let info = DeviceInfo {
            id,
            name: params.name.clone(),
            path: params.path.clone(),
        };
        check_path(&info)?;

        let mut directory = self.metadata.clone();
        directory.devices.push(info.clone());
        if !super::root::fits(self.device(MASTER_DEVICE_ID)?.root(), Some(&directory))? {
            return Err(LogError::RootOverflow(MASTER_DEVICE_ID));
        }

        // Step 2: device file and segment table, chained after the old tail
        let previous_last = self.metadata.last_segment;
        let mut device = Device::create(
            info.clone(),
            params.pages,
            params.growth_pages,
            params.max_pages,
            Arc::clone(&self.mode),
        )?;
        let (first, last) = device
            .init_segments(Some(previous_last))?
            .ok_or_else(|| LogError::Config(format!("device {} has no segments", id)))?;
        device.save(None)?;
        self.devices.insert(id, device);

        // Step 3: forward link from the old tail
        self.set_next(previous_last, Some(first))?;
        if previous_last.device() != MASTER_DEVICE_ID {
            self.save_device(previous_last.device())?;
        }

        // Step 4: directory
        self.metadata.devices.push(info);
        self.metadata.last_segment = last;
        self.save_master()?;

        info!(device = id, name = %params.name, first = %first, last = %last, "device added");
        Ok(id)
    }

    /// Detach a secondary device that holds no log data
    pub fn remove_device(&mut self, id: u16) -> Result<()> {
        if id == MASTER_DEVICE_ID {
            return Err(LogError::DeviceIdInvalid(id));
        }
        let device = self.devices.get(&id).ok_or(LogError::DeviceNotFound(id))?;
        if device.has_allocated_segments() {
            return Err(LogError::DeviceInUse(id));
        }

        // Step 1: unlink each segment, re-linking its neighbours
        let segments: Vec<SegmentId> = device.descriptors().iter().map(|d| d.id).collect();
        let mut touched = Vec::new();
        for segment in segments {
            let prev = self.prev_of(segment)?;
            let next = self.next_of(segment)?;

            if let Some(prev) = prev {
                self.set_next(prev, next)?;
                touched.push(prev.device());
            }
            if let Some(next) = next {
                self.set_prev(next, prev)?;
                touched.push(next.device());
            }
            if self.metadata.last_segment == segment {
                if let Some(prev) = prev {
                    self.metadata.last_segment = prev;
                }
            }
        }

        // Step 2: persist the neighbours' tables
        touched.sort_unstable();
        touched.dedup();
        for device_id in touched {
            if device_id != id && device_id != MASTER_DEVICE_ID {
                self.save_device(device_id)?;
            }
        }

        // Step 3: drop the device and its file
        if let Some(mut device) = self.devices.remove(&id) {
            device.close()?;
            let path = device.path().to_path_buf();
            drop(device);
            std::fs::remove_file(&path)?;
        }
        self.metadata.devices.retain(|d| d.id != id);
        self.save_master()?;

        info!(device = id, "device removed");
        Ok(())
    }

    fn next_device_id(&self) -> Result<u16> {
        (1..u16::MAX)
            .find(|id| !self.devices.contains_key(id))
            .ok_or(LogError::DeviceIdInvalid(u16::MAX))
    }

    /// Extend the expandable device with the fewest pages and chain the new
    /// segment after `after`. Returns `None` when no device can grow, or
    /// when no growable device's root slot has room for another segment.
    pub fn grow(&mut self, after: SegmentId) -> Result<Option<SegmentId>> {
        // Step 1: pick the device
        let directory = self.directory_at_capacity();
        let mut candidate: Option<(u32, u16)> = None;
        for device in self.devices.values() {
            if !device.can_grow() {
                continue;
            }
            let metadata = (device.id() == MASTER_DEVICE_ID).then_some(&directory);
            if !device.has_room_for_segment(metadata)? {
                debug!(device = device.id(), "root slot full; device cannot grow");
                continue;
            }
            if candidate.map_or(true, |(pages, _)| device.allocated_pages() < pages) {
                candidate = Some((device.allocated_pages(), device.id()));
            }
        }
        let Some((_, device_id)) = candidate else {
            return Ok(None);
        };

        // Step 2: carve the segment and persist the grown table
        let segment = self.device_mut(device_id)?.grow(after)?;
        let previous_last = self.metadata.last_segment;
        if previous_last == after {
            self.metadata.last_segment = segment;
        }
        let saved = self.save_device(device_id).and_then(|()| {
            if device_id == MASTER_DEVICE_ID {
                Ok(())
            } else {
                self.save_master()
            }
        });
        if let Err(e) = saved {
            self.metadata.last_segment = previous_last;
            self.device_mut(device_id)?.abandon_segment(segment);
            return Err(e);
        }

        // Step 3: only now point the tail at it
        self.set_next(after, Some(segment))?;
        self.save_device(after.device())?;
        Ok(Some(segment))
    }

    /// The directory with a full checkpoint ring, the largest it gets
    /// without adding a device
    fn directory_at_capacity(&self) -> RootMetadata {
        let mut directory = self.metadata.clone();
        let at = directory.log_end;
        while directory.checkpoints.len() < CHECKPOINT_HISTORY {
            if !directory.checkpoints.end(at) {
                directory.checkpoints.begin(at);
            }
        }
        directory
    }

    // =========================================================================
    // Segment Access
    // =========================================================================

    pub fn stream(&mut self, segment: SegmentId) -> Result<&mut SegmentStream> {
        self.device_mut(segment.device())?.stream(segment.index())
    }

    pub fn descriptor(&self, segment: SegmentId) -> Result<&SegmentDescriptor> {
        self.device(segment.device())?.descriptor(segment.index())
    }

    pub fn is_allocated(&self, segment: SegmentId) -> Result<bool> {
        self.device(segment.device())?.is_allocated(segment.index())
    }

    pub fn next_of(&mut self, segment: SegmentId) -> Result<Option<SegmentId>> {
        self.device_mut(segment.device())?.next_of(segment.index())
    }

    pub fn prev_of(&mut self, segment: SegmentId) -> Result<Option<SegmentId>> {
        self.device_mut(segment.device())?.prev_of(segment.index())
    }

    pub fn set_next(&mut self, segment: SegmentId, next: Option<SegmentId>) -> Result<()> {
        self.device_mut(segment.device())?.set_next(segment.index(), next)
    }

    pub fn set_prev(&mut self, segment: SegmentId, prev: Option<SegmentId>) -> Result<()> {
        self.device_mut(segment.device())?.set_prev(segment.index(), prev)
    }

    pub fn allocate(&mut self, segment: SegmentId) -> Result<()> {
        self.device_mut(segment.device())?.allocate(segment.index())
    }

    pub fn mark_full(&mut self, segment: SegmentId) -> Result<()> {
        self.device_mut(segment.device())?.mark_full(segment.index())
    }

    /// Total segments across all devices
    pub fn segment_count(&self) -> usize {
        self.devices.values().map(|d| d.descriptors().len()).sum()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save a device's root; the master's carries the directory too
    pub fn save_device(&mut self, id: u16) -> Result<()> {
        let device = self.devices.get_mut(&id).ok_or(LogError::DeviceNotFound(id))?;
        if id == MASTER_DEVICE_ID {
            device.save(Some(&self.metadata))
        } else {
            device.save(None)
        }
    }

    pub fn save_master(&mut self) -> Result<()> {
        self.save_device(MASTER_DEVICE_ID)
    }

    pub fn sync_all(&self) -> Result<()> {
        for device in self.devices.values() {
            device.sync()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        for device in self.devices.values_mut() {
            device.close()?;
        }
        info!("log closed");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn metadata(&self) -> &RootMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut RootMetadata {
        &mut self.metadata
    }

    pub fn device(&self, id: u16) -> Result<&Device> {
        self.devices.get(&id).ok_or(LogError::DeviceNotFound(id))
    }

    pub fn device_mut(&mut self, id: u16) -> Result<&mut Device> {
        self.devices.get_mut(&id).ok_or(LogError::DeviceNotFound(id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn mode(&self) -> &Arc<AccessMode> {
        &self.mode
    }
}

/// Directory entries store paths as UTF-8 with a u16 length prefix
fn check_path(info: &DeviceInfo) -> Result<()> {
    let path = info
        .path
        .to_str()
        .ok_or_else(|| LogError::Config(format!("device {} path is not UTF-8", info.id)))?;
    if path.len() > u16::MAX as usize || info.name.len() > u16::MAX as usize {
        return Err(LogError::Config(format!("device {} name or path is too long", info.id)));
    }
    Ok(())
}
