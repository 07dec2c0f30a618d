//! Caches shared by the conversion pipeline: one for opened `DicomPyramidSource`
//! instances (expensive to parse: every instance in a series has to be opened
//! and its frame layout indexed), and one for decoded tiles (expensive to
//! decode: JPEG/JPEG2000/JPEG-LS all cost real CPU).
//!
//! Grounded on `slide/registry.rs`'s `SlideRegistry`: LRU eviction plus a
//! singleflight in-flight map so concurrent requests for the same series
//! share one open rather than racing duplicate work. The decoded-tile cache
//! additionally tracks a running byte total the way `tile/cache.rs`'s
//! `TileCache` does, since `lru` 0.12 only evicts by entry count.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::PyramidError;
use crate::pixel::Image;

const DEFAULT_PYRAMID_CACHE_CAPACITY: usize = 16;
const DEFAULT_TILE_CACHE_MAX_ENTRIES: usize = 10_000;
const DEFAULT_TILE_CACHE_MAX_BYTES: usize = 256 * 1024 * 1024;

struct InFlight<T> {
    notify: Notify,
    result: Mutex<Option<Result<Arc<T>, PyramidError>>>,
}

/// LRU cache of opened pyramid sources, keyed by an arbitrary series
/// identifier (a folder path, an Orthanc series UID, whatever the caller
/// uses to name a series). Singleflighted: concurrent `get_or_open` calls
/// for the same key block on one build rather than duplicating it.
pub struct PyramidCache<T> {
    cache: RwLock<LruCache<String, Arc<T>>>,
    in_flight: Mutex<HashMap<String, Arc<InFlight<T>>>>,
}

impl<T> PyramidCache<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PYRAMID_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        PyramidCache {
            cache: RwLock::new(LruCache::new(std::num::NonZeroUsize::new(capacity.max(1)).unwrap())),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached entry for `key`, or builds it with `open` if absent.
    /// `open` runs at most once per concurrent wave of callers.
    pub async fn get_or_open<F, Fut>(&self, key: &str, open: F) -> Result<Arc<T>, PyramidError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PyramidError>>,
    {
        {
            let mut cache = self.cache.write().await;
            if let Some(entry) = cache.get(key) {
                return Ok(entry.clone());
            }
        }

        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(state) = in_flight.get(key) {
                    state.clone()
                } else {
                    let state = Arc::new(InFlight { notify: Notify::new(), result: Mutex::new(None) });
                    in_flight.insert(key.to_string(), state.clone());
                    drop(in_flight);

                    let result = open().await.map(Arc::new);

                    {
                        let mut result_guard = state.result.lock().await;
                        *result_guard = Some(result.clone());
                    }

                    if let Ok(ref entry) = result {
                        let mut cache = self.cache.write().await;
                        cache.put(key.to_string(), entry.clone());
                    }

                    self.in_flight.lock().await.remove(key);
                    state.notify.notify_waiters();

                    return result;
                }
            };

            state.notify.notified().await;
            if let Some(result) = state.result.lock().await.clone() {
                return result;
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.write().await.pop(key);
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T> Default for PyramidCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key for a decoded tile: the DICOM instance (or other per-part file)
/// it came from plus its frame number within that instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedTileKey {
    pub instance_id: Arc<str>,
    pub frame_number: u32,
}

impl DecodedTileKey {
    pub fn new(instance_id: impl Into<Arc<str>>, frame_number: u32) -> Self {
        DecodedTileKey { instance_id: instance_id.into(), frame_number }
    }
}

/// LRU cache of decoded tile pixel buffers, bounded by both an entry count
/// and a total memory budget in bytes. Decoded `Image`s are not resized
/// on insert, so the memory budget is an approximation based on each
/// image's buffer length, not an exact RSS accounting.
pub struct DecodedTileCache {
    cache: RwLock<LruCache<DecodedTileKey, Arc<Image>>>,
    max_bytes: usize,
    current_bytes: RwLock<usize>,
}

impl DecodedTileCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_MAX_BYTES, DEFAULT_TILE_CACHE_MAX_ENTRIES)
    }

    pub fn with_capacity(max_bytes: usize, max_entries: usize) -> Self {
        DecodedTileCache {
            cache: RwLock::new(LruCache::new(std::num::NonZeroUsize::new(max_entries.max(1)).unwrap())),
            max_bytes,
            current_bytes: RwLock::new(0),
        }
    }

    pub async fn get(&self, key: &DecodedTileKey) -> Option<Arc<Image>> {
        self.cache.write().await.get(key).cloned()
    }

    pub async fn put(&self, key: DecodedTileKey, image: Arc<Image>) {
        let size = image.as_bytes().len();
        let mut cache = self.cache.write().await;
        let mut current_bytes = self.current_bytes.write().await;

        if let Some(old) = cache.peek(&key) {
            *current_bytes = current_bytes.saturating_sub(old.as_bytes().len());
        }

        cache.put(key, image);
        *current_bytes += size;

        while *current_bytes > self.max_bytes {
            match cache.pop_lru() {
                Some((_, evicted)) => *current_bytes = current_bytes.saturating_sub(evicted.as_bytes().len()),
                None => break,
            }
        }
    }

    pub async fn invalidate(&self, key: &DecodedTileKey) {
        let mut cache = self.cache.write().await;
        let mut current_bytes = self.current_bytes.write().await;
        if let Some(removed) = cache.pop(key) {
            *current_bytes = current_bytes.saturating_sub(removed.as_bytes().len());
        }
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
        *self.current_bytes.write().await = 0;
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn size_bytes(&self) -> usize {
        *self.current_bytes.read().await
    }
}

impl Default for DecodedTileCache {
    fn default() -> Self {
        Self::new()
    }
}
