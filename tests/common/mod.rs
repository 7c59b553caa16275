//! Shared test helpers: temp log configs and an in-memory page store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use chainlog::{LogConfig, LogError, Page, PageImage, PageStore, Result, WalSyncStrategy};
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// Temp Logs
// =============================================================================

/// 64 pages -> four 16-page segments, no growth
pub fn setup_temp_log() -> (TempDir, LogConfig) {
    setup_temp_log_with(64, 0)
}

pub fn setup_temp_log_with(initial_pages: u32, growth_pages: u32) -> (TempDir, LogConfig) {
    let temp_dir = TempDir::new().unwrap();
    let config = LogConfig::builder()
        .path(temp_dir.path().join("master.log"))
        .initial_pages(initial_pages)
        .growth_pages(growth_pages)
        .sync_strategy(WalSyncStrategy::EveryWrite)
        .build();
    (temp_dir, config)
}

pub fn device_path(temp_dir: &TempDir, name: &str) -> PathBuf {
    temp_dir.path().join(format!("{}.log", name))
}

// =============================================================================
// Page Store
// =============================================================================

/// Pages held in a map; missing pages read as zeroed with timestamp 0
#[derive(Default)]
pub struct MemoryPageStore {
    pages: Mutex<HashMap<u64, Page>>,
    stores: Mutex<usize>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(page_id: u64, timestamp: i64, image: PageImage) -> Self {
        let store = Self::new();
        store.put(page_id, timestamp, image);
        store
    }

    pub fn put(&self, page_id: u64, timestamp: i64, image: PageImage) {
        self.pages.lock().insert(page_id, Page::new(timestamp, image));
    }

    pub fn get(&self, page_id: u64) -> Page {
        self.pages
            .lock()
            .get(&page_id)
            .cloned()
            .unwrap_or_else(|| Page::new(0, PageImage::zeroed()))
    }

    /// Number of store calls so far
    pub fn store_count(&self) -> usize {
        *self.stores.lock()
    }
}

impl PageStore for MemoryPageStore {
    fn load(&self, page_id: u64) -> Result<Page> {
        Ok(self.get(page_id))
    }

    fn store(&self, page_id: u64, page: Page) -> Result<()> {
        *self.stores.lock() += 1;
        self.pages.lock().insert(page_id, page);
        Ok(())
    }
}

/// A page store whose every call fails
pub struct FailingPageStore;

impl PageStore for FailingPageStore {
    fn load(&self, page_id: u64) -> Result<Page> {
        Err(LogError::Page(format!("page {} unavailable", page_id)))
    }

    fn store(&self, page_id: u64, _page: Page) -> Result<()> {
        Err(LogError::Page(format!("page {} unavailable", page_id)))
    }
}
