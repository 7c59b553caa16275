//! Device Module
//!
//! A device is one backing file: a root region followed by segment space.
//! The master device (id 0) additionally holds the log directory.
//!
//! ## File Layout
//! ```text
//! ┌─────────────┬─────────────┬───────────┬───────────┬─────┐
//! │ root slot 0 │ root slot 1 │ segment 0 │ segment 1 │ ... │
//! │ (16 KiB)    │ (16 KiB)    │           │           │     │
//! └─────────────┴─────────────┴───────────┴───────────┴─────┘
//! ```

mod directory;
mod file;
mod mode;
mod root;
mod set;

pub use directory::{CheckpointEntry, CheckpointRing, DeviceInfo, RootMetadata, CHECKPOINT_HISTORY};
pub use file::BackingFile;
pub use mode::{AccessMode, RecoveryState};
pub use root::{DeviceRoot, ROOT_REGION_SIZE, ROOT_SLOT_SIZE};
pub use set::{DeviceSet, MASTER_DEVICE_ID};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LogError, Result};
use crate::record::PAGE_SIZE;
use crate::segment::{SegmentDescriptor, SegmentId, SegmentStream, PREAMBLE_SIZE};

/// Index 0xFFFF is reserved for the "no segment" encoding
const MAX_SEGMENTS_PER_DEVICE: usize = u16::MAX as usize;

/// Largest segment whose data region a 32-bit cursor can address
const MAX_SEGMENT_PAGES: u32 = ((u32::MAX as u64 + PREAMBLE_SIZE) / PAGE_SIZE as u64) as u32;

pub struct Device {
    info: DeviceInfo,
    file: Arc<BackingFile>,
    root: DeviceRoot,
    generation: u64,
    streams: HashMap<u16, SegmentStream>,
    mode: Arc<AccessMode>,
}

impl Device {
    /// Create a new device file with `pages` pages of segment space.
    ///
    /// No segments exist until [`init_segments`](Self::init_segments).
    pub fn create(
        info: DeviceInfo,
        pages: u32,
        growth_pages: u32,
        max_pages: u32,
        mode: Arc<AccessMode>,
    ) -> Result<Self> {
        if pages == 0 {
            return Err(LogError::Config(format!("device {} needs at least one page", info.id)));
        }
        if max_pages != 0 && pages > max_pages {
            return Err(LogError::Config(format!(
                "device {}: {} pages exceeds the maximum of {}",
                info.id, pages, max_pages
            )));
        }
        check_segment_pages(info.id, (pages / 4).max(1))?;
        check_segment_pages(info.id, growth_pages)?;

        let file = BackingFile::create(&info.path, ROOT_REGION_SIZE + pages_to_bytes(pages))?;
        let root = DeviceRoot {
            device_id: info.id,
            allocated_pages: pages,
            growth_pages,
            max_pages,
            segments: Vec::new(),
        };

        info!(device = info.id, path = %info.path.display(), pages, "device created");
        Ok(Self {
            info,
            file: Arc::new(file),
            root,
            generation: 0,
            streams: HashMap::new(),
            mode,
        })
    }

    /// Open an existing device file; returns the root metadata block if
    /// the file carries one
    pub fn open(info: DeviceInfo, mode: Arc<AccessMode>) -> Result<(Self, Option<RootMetadata>)> {
        let file = BackingFile::open(&info.path, mode.is_read_only())?;
        let image = root::read_root(&file)?;
        if image.root.device_id != info.id {
            return Err(LogError::RootCorrupt(format!(
                "{} holds device {}, expected {}",
                info.path.display(),
                image.root.device_id,
                info.id
            )));
        }

        debug!(
            device = info.id,
            generation = image.generation,
            segments = image.root.segments.len(),
            "device opened"
        );
        let device = Self {
            info,
            file: Arc::new(file),
            root: image.root,
            generation: image.generation,
            streams: HashMap::new(),
            mode,
        };
        Ok((device, image.metadata))
    }

    // =========================================================================
    // Segment Table
    // =========================================================================

    /// Carve the initial page space into segments of `max(1, pages / 4)`
    /// pages, chained in index order after `after`.
    ///
    /// Returns the first and last new segment. A link from `after` is only
    /// written here when it lives on this device.
    pub fn init_segments(&mut self, after: Option<SegmentId>) -> Result<Option<(SegmentId, SegmentId)>> {
        let pages = self.root.allocated_pages;
        let per_segment = (pages / 4).max(1);

        let mut offset = ROOT_REGION_SIZE;
        let mut remaining = pages;
        let mut prev = after;
        let mut first = None;

        while remaining > 0 {
            let take = remaining.min(per_segment);
            remaining -= take;

            let id = self.push_segment(offset, take, prev)?;
            if let Some(prev) = prev.filter(|p| p.device() == self.id()) {
                self.set_next(prev.index(), Some(id))?;
            }
            first.get_or_insert(id);
            offset += pages_to_bytes(take);
            prev = Some(id);
        }

        Ok(first.zip(prev))
    }

    /// Extend the file by the growth step and add one segment whose prev
    /// link is `after`. The forward link from `after` is left to the caller,
    /// to be written once this table is saved.
    pub fn grow(&mut self, after: SegmentId) -> Result<SegmentId> {
        if !self.can_grow() {
            return Err(LogError::DeviceFull(self.id()));
        }

        let pages = self.root.growth_pages;
        let offset = ROOT_REGION_SIZE + pages_to_bytes(self.root.allocated_pages);
        self.file.set_len(offset + pages_to_bytes(pages))?;
        self.root.allocated_pages += pages;

        let id = self.push_segment(offset, pages, Some(after))?;
        info!(device = self.id(), segment = %id, pages, "device grown");
        Ok(id)
    }

    fn push_segment(&mut self, offset: u64, pages: u32, prev: Option<SegmentId>) -> Result<SegmentId> {
        let index = self.root.segments.len();
        if index >= MAX_SEGMENTS_PER_DEVICE {
            return Err(LogError::DeviceFull(self.id()));
        }

        let id = SegmentId::new(self.id(), index as u16);
        let mut descriptor = SegmentDescriptor::new(id, offset, pages_to_bytes(pages));
        descriptor.prev = prev;
        self.root.segments.push(descriptor);
        Ok(id)
    }

    /// Drop a segment added by [`grow`](Self::grow) whose table never
    /// reached disk
    pub fn abandon_segment(&mut self, id: SegmentId) {
        if self.root.segments.last().map(|d| d.id) != Some(id) {
            return;
        }
        if let Some(descriptor) = self.root.segments.pop() {
            let pages = (descriptor.length / PAGE_SIZE as u64) as u32;
            self.root.allocated_pages = self.root.allocated_pages.saturating_sub(pages);
        }
        self.streams.remove(&id.index());
    }

    pub fn can_grow(&self) -> bool {
        let growth = self.root.growth_pages;
        growth > 0
            && (self.root.max_pages == 0
                || self.root.allocated_pages.saturating_add(growth) <= self.root.max_pages)
            && self.root.segments.len() < MAX_SEGMENTS_PER_DEVICE
    }

    /// Whether the root slot still fits after one more segment, with
    /// `metadata` alongside on the master
    pub fn has_room_for_segment(&self, metadata: Option<&RootMetadata>) -> Result<bool> {
        let mut grown = self.root.clone();
        let id = SegmentId::new(self.id(), grown.segments.len() as u16);
        let mut descriptor = SegmentDescriptor::new(id, u64::MAX, u64::MAX);
        descriptor.prev = Some(id);
        descriptor.next = Some(id);
        grown.segments.push(descriptor);
        root::fits(&grown, metadata)
    }

    // =========================================================================
    // Segment Access
    // =========================================================================

    pub fn descriptor(&self, index: u16) -> Result<&SegmentDescriptor> {
        self.root
            .segments
            .get(index as usize)
            .ok_or(LogError::SegmentNotFound(SegmentId::new(self.id(), index)))
    }

    pub fn descriptors(&self) -> &[SegmentDescriptor] {
        &self.root.segments
    }

    /// The stream for a segment, loading its header on first use if the
    /// segment is allocated
    pub fn stream(&mut self, index: u16) -> Result<&mut SegmentStream> {
        let id = SegmentId::new(self.info.id, index);
        match self.streams.entry(index) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let descriptor = self
                    .root
                    .segments
                    .get(index as usize)
                    .ok_or(LogError::SegmentNotFound(id))?;
                let mut stream =
                    SegmentStream::new(Arc::clone(&self.file), descriptor, Arc::clone(&self.mode));
                if descriptor.allocated {
                    stream.init_load()?;
                }
                Ok(entry.insert(stream))
            }
        }
    }

    pub fn is_allocated(&self, index: u16) -> Result<bool> {
        Ok(self.descriptor(index)?.allocated)
    }

    pub fn has_allocated_segments(&self) -> bool {
        self.root.segments.iter().any(|d| d.allocated)
    }

    /// Successor link; the header copy wins for allocated segments
    pub fn next_of(&mut self, index: u16) -> Result<Option<SegmentId>> {
        if self.is_allocated(index)? {
            Ok(self.stream(index)?.next())
        } else {
            Ok(self.descriptor(index)?.next)
        }
    }

    /// Predecessor link; the header copy wins for allocated segments
    pub fn prev_of(&mut self, index: u16) -> Result<Option<SegmentId>> {
        if self.is_allocated(index)? {
            Ok(self.stream(index)?.prev())
        } else {
            Ok(self.descriptor(index)?.prev)
        }
    }

    pub fn set_next(&mut self, index: u16, next: Option<SegmentId>) -> Result<()> {
        let allocated = {
            let descriptor = self.descriptor_mut(index)?;
            descriptor.next = next;
            descriptor.allocated
        };
        self.update_stream(index, allocated, |stream| stream.set_next(next))
    }

    pub fn set_prev(&mut self, index: u16, prev: Option<SegmentId>) -> Result<()> {
        let allocated = {
            let descriptor = self.descriptor_mut(index)?;
            descriptor.prev = prev;
            descriptor.allocated
        };
        self.update_stream(index, allocated, |stream| stream.set_prev(prev))
    }

    /// Start writing into a segment: fresh cursors, both header slots
    /// written
    pub fn allocate(&mut self, index: u16) -> Result<()> {
        let descriptor = self.descriptor(index)?.clone();
        let stream = match self.streams.entry(index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(SegmentStream::new(
                Arc::clone(&self.file),
                &descriptor,
                Arc::clone(&self.mode),
            )),
        };
        stream.set_prev(descriptor.prev);
        stream.set_next(descriptor.next);
        stream.init_new()?;

        let descriptor = self.descriptor_mut(index)?;
        descriptor.allocated = true;
        descriptor.full = false;
        Ok(())
    }

    pub fn mark_full(&mut self, index: u16) -> Result<()> {
        let allocated = {
            let descriptor = self.descriptor_mut(index)?;
            descriptor.full = true;
            descriptor.allocated
        };
        self.update_stream(index, allocated, |stream| stream.set_full(true))
    }

    fn descriptor_mut(&mut self, index: u16) -> Result<&mut SegmentDescriptor> {
        let id = SegmentId::new(self.info.id, index);
        self.root
            .segments
            .get_mut(index as usize)
            .ok_or(LogError::SegmentNotFound(id))
    }

    /// Apply a header change; allocated segments persist it immediately
    fn update_stream(
        &mut self,
        index: u16,
        allocated: bool,
        change: impl FnOnce(&mut SegmentStream),
    ) -> Result<()> {
        if allocated {
            let stream = self.stream(index)?;
            change(&mut *stream);
            stream.flush()?;
        } else if let Some(stream) = self.streams.get_mut(&index) {
            change(stream);
        }
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the next root generation
    pub fn save(&mut self, metadata: Option<&RootMetadata>) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(LogError::DeviceReadOnly(self.id()));
        }
        let generation = self.generation + 1;
        root::write_root(&self.file, generation, &self.root, metadata, self.mode.sync_writes())?;
        self.generation = generation;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if self.mode.is_read_only() {
            return Ok(());
        }
        self.file.sync()
    }

    /// Flush pending header changes and sync
    pub fn close(&mut self) -> Result<()> {
        if self.mode.is_read_only() {
            self.streams.clear();
            return Ok(());
        }
        for stream in self.streams.values_mut() {
            if stream.is_allocated() {
                stream.flush()?;
            }
        }
        self.streams.clear();
        self.file.sync()?;
        debug!(device = self.id(), "device closed");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u16 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn path(&self) -> &Path {
        &self.info.path
    }

    pub fn root(&self) -> &DeviceRoot {
        &self.root
    }

    pub fn allocated_pages(&self) -> u32 {
        self.root.allocated_pages
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("generation", &self.generation)
            .field("root", &self.root)
            .finish()
    }
}

fn check_segment_pages(device: u16, pages: u32) -> Result<()> {
    if pages > MAX_SEGMENT_PAGES {
        return Err(LogError::Config(format!(
            "device {}: segments of {} pages exceed the {} page limit",
            device, pages, MAX_SEGMENT_PAGES
        )));
    }
    Ok(())
}

fn pages_to_bytes(pages: u32) -> u64 {
    pages as u64 * PAGE_SIZE as u64
}
