//! Page-image records and the page store they replay against.
//!
//! Each page record carries full page images: an after-image for create, a
//! before-image for delete, both for update. Redo and undo load the live
//! page, compare its timestamp with the record's, and write an image only
//! when the two differ.

use std::fmt;
use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::codec::map_read_error;
use super::RecordKind;
use crate::error::{LogError, Result};
use crate::wire::WireRead;

/// Size of every page image
pub const PAGE_SIZE: usize = 8192;

// =============================================================================
// Page Images
// =============================================================================

/// An immutable, exactly page-sized byte image
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage(Bytes);

impl PageImage {
    /// Wrap `bytes`, which must be exactly [`PAGE_SIZE`] long
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() != PAGE_SIZE {
            return Err(LogError::InvalidPageImage {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn zeroed() -> Self {
        Self::filled(0)
    }

    /// Every byte set to `byte`
    pub fn filled(byte: u8) -> Self {
        Self(Bytes::from(vec![byte; PAGE_SIZE]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub(crate) fn read_from<R: Read + ?Sized>(
        reader: &mut R,
        buffers: &dyn BufferSource,
    ) -> Result<Self> {
        let mut buf = buffers.page_buffer();
        buf.resize(PAGE_SIZE, 0);
        reader.read_exact(&mut buf[..]).map_err(map_read_error)?;
        Ok(Self(buf.freeze()))
    }
}

impl AsRef<[u8]> for PageImage {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageImage(crc={:08x})", crc32fast::hash(&self.0))
    }
}

/// Supplies the buffers that decoded page images live in
pub trait BufferSource: Send + Sync {
    /// A buffer with capacity for at least one page
    fn page_buffer(&self) -> BytesMut;
}

/// Plain heap allocation per image
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBuffers;

impl BufferSource for HeapBuffers {
    fn page_buffer(&self) -> BytesMut {
        BytesMut::with_capacity(PAGE_SIZE)
    }
}

// =============================================================================
// Page Store Contract
// =============================================================================

/// A live page as the storage engine holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub timestamp: i64,
    pub image: PageImage,
}

impl Page {
    pub fn new(timestamp: i64, image: PageImage) -> Self {
        Self { timestamp, image }
    }
}

/// Where recovery loads and stores live pages by virtual page id
pub trait PageStore: Send + Sync {
    fn load(&self, page_id: u64) -> Result<Page>;

    fn store(&self, page_id: u64, page: Page) -> Result<()>;
}

// =============================================================================
// Page Records
// =============================================================================

/// What a page record did to its page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageChange {
    Create { after: PageImage },
    Update { before: PageImage, after: PageImage },
    Delete { before: PageImage },
}

impl PageChange {
    pub fn kind(&self) -> RecordKind {
        match self {
            PageChange::Create { .. } => RecordKind::CreatePage,
            PageChange::Update { .. } => RecordKind::UpdatePage,
            PageChange::Delete { .. } => RecordKind::DeletePage,
        }
    }

    fn image_count(&self) -> usize {
        match self {
            PageChange::Update { .. } => 2,
            PageChange::Create { .. } | PageChange::Delete { .. } => 1,
        }
    }

    /// Image the page holds once the change is applied
    fn redo_image(&self) -> PageImage {
        match self {
            PageChange::Create { after } | PageChange::Update { after, .. } => after.clone(),
            PageChange::Delete { .. } => PageImage::zeroed(),
        }
    }

    /// Image the page held before the change
    fn undo_image(&self) -> PageImage {
        match self {
            PageChange::Create { .. } => PageImage::zeroed(),
            PageChange::Update { before, .. } | PageChange::Delete { before } => before.clone(),
        }
    }
}

/// A page-image record body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub transaction_id: u32,
    pub page_id: u64,
    /// Page timestamp after the change
    pub timestamp: i64,
    pub change: PageChange,
}

impl PageRecord {
    /// txn (4) + page id (8) + timestamp (8) + images
    pub fn encoded_len(&self) -> usize {
        4 + 8 + 8 + self.change.image_count() * PAGE_SIZE
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.transaction_id);
        buf.put_u64_le(self.page_id);
        buf.put_i64_le(self.timestamp);
        match &self.change {
            PageChange::Create { after } => buf.put_slice(after.as_bytes()),
            PageChange::Update { before, after } => {
                buf.put_slice(before.as_bytes());
                buf.put_slice(after.as_bytes());
            }
            PageChange::Delete { before } => buf.put_slice(before.as_bytes()),
        }
    }

    pub(crate) fn decode<R: Read + ?Sized>(
        kind: RecordKind,
        reader: &mut R,
        buffers: &dyn BufferSource,
    ) -> Result<Self> {
        let transaction_id = reader.read_u32_le().map_err(map_read_error)?;
        let page_id = reader.read_u64_le().map_err(map_read_error)?;
        let timestamp = reader.read_i64_le().map_err(map_read_error)?;

        let change = match kind {
            RecordKind::CreatePage => PageChange::Create {
                after: PageImage::read_from(reader, buffers)?,
            },
            RecordKind::UpdatePage => {
                let before = PageImage::read_from(reader, buffers)?;
                let after = PageImage::read_from(reader, buffers)?;
                PageChange::Update { before, after }
            }
            RecordKind::DeletePage => PageChange::Delete {
                before: PageImage::read_from(reader, buffers)?,
            },
            other => return Err(LogError::UnknownRecordKind(other.as_u8())),
        };

        Ok(Self {
            transaction_id,
            page_id,
            timestamp,
            change,
        })
    }

    /// Redo: install the post-change image and this record's timestamp.
    ///
    /// Returns whether the page was written.
    pub fn roll_forward(&self, pages: &dyn PageStore) -> Result<bool> {
        let page = pages.load(self.page_id)?;
        if page.timestamp == self.timestamp {
            return Ok(false);
        }

        pages.store(self.page_id, Page::new(self.timestamp, self.change.redo_image()))?;
        debug!(page_id = self.page_id, timestamp = self.timestamp, "redo applied");
        Ok(true)
    }

    /// Undo: restore the pre-change image, leaving the page timestamp as
    /// found.
    ///
    /// Returns whether the page was written.
    pub fn roll_back(&self, pages: &dyn PageStore) -> Result<bool> {
        let page = pages.load(self.page_id)?;
        if page.timestamp == self.timestamp {
            return Ok(false);
        }

        pages.store(self.page_id, Page::new(page.timestamp, self.change.undo_image()))?;
        debug!(page_id = self.page_id, timestamp = page.timestamp, "undo applied");
        Ok(true)
    }
}
