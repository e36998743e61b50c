use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use crate::models::DecodedBuffer;

/// Single-initialization slot for one locator
pub type CacheSlot = Arc<OnceCell<Arc<DecodedBuffer>>>;

/// Decoded buffers keyed by locator.
///
/// Entries are only ever inserted fully decoded and are never evicted until
/// [`BufferCache::clear`]; concurrent loads of one locator coordinate through
/// the shared slot.
#[derive(Debug, Default)]
pub struct BufferCache {
    entries: Mutex<HashMap<String, CacheSlot>>,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheSlot>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decoded buffer for a locator, if one has finished loading
    pub fn get(&self, locator: &str) -> Option<Arc<DecodedBuffer>> {
        self.entries().get(locator).and_then(|slot| slot.get().cloned())
    }

    /// Slot for a locator, created empty on first request
    pub fn slot(&self, locator: &str) -> CacheSlot {
        self.entries()
            .entry(locator.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.get(locator).is_some()
    }

    /// Number of fully decoded entries
    pub fn len(&self) -> usize {
        self.entries().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total decoded samples held, for status output
    pub fn total_samples(&self) -> usize {
        self.entries()
            .values()
            .filter_map(|slot| slot.get())
            .map(|buffer| buffer.samples.len())
            .sum()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
