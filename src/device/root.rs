//! Device root block
//!
//! The first bytes of every device file hold two root slots. Each save
//! bumps a generation counter and writes the slot chosen by its parity, so
//! the previous generation survives a torn write.
//!
//! ## Slot Format
//! ```text
//! ┌───────────┬─────────────┬────────────────┬─────────────┬─────────┐
//! │ magic (4) │ version (2) │ generation (8) │ payload len │ crc32   │
//! │ "CLOG"    │             │                │ (4)         │ (4)     │
//! ├───────────┴─────────────┴────────────────┴─────────────┴─────────┤
//! │ payload: root len (4) | bincode(DeviceRoot) | has meta (1) | meta │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::directory::RootMetadata;
use super::file::BackingFile;
use crate::error::{LogError, Result};
use crate::record::PAGE_SIZE;
use crate::segment::SegmentDescriptor;
use crate::wire::WireRead;

const ROOT_MAGIC: &[u8; 4] = b"CLOG";
const ROOT_VERSION: u16 = 1;
const SLOT_HEADER_SIZE: usize = 4 + 2 + 8 + 4 + 4;

/// Size of one root slot
pub const ROOT_SLOT_SIZE: u64 = 2 * PAGE_SIZE as u64;

/// Both root slots; segment space starts right after
pub const ROOT_REGION_SIZE: u64 = 2 * ROOT_SLOT_SIZE;

/// Per-device persistent state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRoot {
    pub device_id: u16,
    /// Pages of segment space, excluding the root region
    pub allocated_pages: u32,
    pub growth_pages: u32,
    /// 0 means unbounded
    pub max_pages: u32,
    pub segments: Vec<SegmentDescriptor>,
}

/// A decoded root slot
#[derive(Debug, Clone)]
pub struct RootImage {
    pub generation: u64,
    pub root: DeviceRoot,
    pub metadata: Option<RootMetadata>,
}

/// Write generation `generation` into its slot
pub fn write_root(
    file: &BackingFile,
    generation: u64,
    root: &DeviceRoot,
    metadata: Option<&RootMetadata>,
    sync: bool,
) -> Result<()> {
    // Step 1: payload
    let payload = encode_payload(root, metadata)?;
    if SLOT_HEADER_SIZE + payload.len() > ROOT_SLOT_SIZE as usize {
        return Err(LogError::RootOverflow(root.device_id));
    }

    // Step 2: framed slot
    let mut slot = BytesMut::with_capacity(SLOT_HEADER_SIZE + payload.len());
    slot.put_slice(ROOT_MAGIC);
    slot.put_u16_le(ROOT_VERSION);
    slot.put_u64_le(generation);
    slot.put_u32_le(payload.len() as u32);
    slot.put_u32_le(crc32fast::hash(&payload));
    slot.put_slice(&payload);

    file.write_at(slot_offset(generation), &slot)?;
    if sync {
        file.sync()?;
    }
    Ok(())
}

/// Whether `root` and `metadata` fit in one slot
pub fn fits(root: &DeviceRoot, metadata: Option<&RootMetadata>) -> Result<bool> {
    Ok(SLOT_HEADER_SIZE + encode_payload(root, metadata)?.len() <= ROOT_SLOT_SIZE as usize)
}

fn encode_payload(root: &DeviceRoot, metadata: Option<&RootMetadata>) -> Result<BytesMut> {
    let root_bytes = bincode::serialize(root).map_err(|e| LogError::Serialization(e.to_string()))?;
    let mut payload = BytesMut::with_capacity(root_bytes.len() + 64);
    payload.put_u32_le(root_bytes.len() as u32);
    payload.put_slice(&root_bytes);
    match metadata {
        Some(metadata) => {
            payload.put_u8(1);
            metadata.encode_into(&mut payload);
        }
        None => payload.put_u8(0),
    }
    Ok(payload)
}

/// Read both slots and return the newest valid generation
pub fn read_root(file: &BackingFile) -> Result<RootImage> {
    let mut best: Option<RootImage> = None;

    for slot in 0..2u64 {
        let mut buf = vec![0u8; ROOT_SLOT_SIZE as usize];
        if let Err(e) = file.read_at(slot * ROOT_SLOT_SIZE, &mut buf) {
            warn!(path = %file.path().display(), slot, error = %e, "root slot unreadable");
            continue;
        }

        match decode_slot(&buf) {
            Ok(image) => {
                if best.as_ref().map_or(true, |b| image.generation > b.generation) {
                    best = Some(image);
                }
            }
            Err(reason) => {
                warn!(path = %file.path().display(), slot, reason = %reason, "root slot invalid");
            }
        }
    }

    best.ok_or_else(|| {
        LogError::RootCorrupt(format!("no valid root slot in {}", file.path().display()))
    })
}

fn slot_offset(generation: u64) -> u64 {
    (generation % 2) * ROOT_SLOT_SIZE
}

fn decode_slot(buf: &[u8]) -> std::result::Result<RootImage, String> {
    let mut reader = buf;

    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut reader, &mut magic).map_err(|e| e.to_string())?;
    if &magic != ROOT_MAGIC {
        return Err("bad magic".to_string());
    }
    let version = reader.read_u16_le().map_err(|e| e.to_string())?;
    if version != ROOT_VERSION {
        return Err(format!("unsupported version {}", version));
    }
    let generation = reader.read_u64_le().map_err(|e| e.to_string())?;
    let payload_len = reader.read_u32_le().map_err(|e| e.to_string())? as usize;
    let crc = reader.read_u32_le().map_err(|e| e.to_string())?;

    let payload = reader
        .get(..payload_len)
        .ok_or_else(|| "payload length exceeds slot".to_string())?;
    if crc32fast::hash(payload) != crc {
        return Err("checksum mismatch".to_string());
    }

    let mut payload_reader = payload;
    let root_len = payload_reader.read_u32_le().map_err(|e| e.to_string())? as usize;
    let root_bytes = payload_reader
        .get(..root_len)
        .ok_or_else(|| "device root length exceeds payload".to_string())?;
    let root: DeviceRoot = bincode::deserialize(root_bytes).map_err(|e| e.to_string())?;

    let mut rest = &payload_reader[root_len..];
    let metadata = match rest.read_u8_le().map_err(|e| e.to_string())? {
        0 => None,
        _ => Some(RootMetadata::decode(&mut rest).map_err(|e| e.to_string())?),
    };

    Ok(RootImage {
        generation,
        root,
        metadata,
    })
}
