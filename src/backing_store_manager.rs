/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The cache of backing stores for all render widgets of a browser process.
//!
//! The manager is an ordinary value owned by whoever dispatches paint
//! messages. It is not internally synchronized: every operation takes
//! `&mut self` (or `&self` for lookups), so calls for a host are serialized
//! by construction. Sharing it between threads requires an external lock.

use crate::backing_store::{BackingStore, PaintError};
use crate::pixel_buffer::PixelBufferAllocator;
use crate::shared_memory::{SharedBitmapHandle, SharedMemoryMapper};
use crate::types::{buffer_bytes, size_is_empty, DeviceIntRect, DeviceIntSize, RenderWidgetHostId};
use fnv::FnvHashMap;
use std::fmt;

/// Enough for three full screens on a typical desktop.
const DEFAULT_MEMORY_BUDGET: usize = 3 * 1920 * 1200 * 4;
const DEFAULT_MAX_ENTRIES: usize = 16;

#[derive(Debug, Clone)]
pub struct BackingStoreManagerOptions {
    /// Total pixel memory the cache may hold before it starts evicting.
    pub memory_budget_bytes: usize,
    pub max_entries: usize,
}

impl Default for BackingStoreManagerOptions {
    fn default() -> Self {
        BackingStoreManagerOptions {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareError {
    /// Zero or negative width or height.
    InvalidSize,
    AllocationFailed,
    Paint(PaintError),
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PrepareError::InvalidSize => write!(f, "invalid backing store size"),
            PrepareError::AllocationFailed => write!(f, "unable to allocate backing store"),
            PrepareError::Paint(ref err) => write!(f, "unable to paint backing store: {}", err),
        }
    }
}

impl std::error::Error for PrepareError {}

impl From<PaintError> for PrepareError {
    fn from(err: PaintError) -> PrepareError {
        PrepareError::Paint(err)
    }
}

pub type PrepareResult<T> = Result<T, PrepareError>;

/// A backing store ready to paint from, plus whether the renderer has to be
/// asked for a complete repaint because parts of the store hold no content.
pub struct PreparedBackingStore<'a> {
    pub backing_store: &'a mut BackingStore,
    pub needs_full_paint: bool,
}

struct CacheEntry {
    backing_store: BackingStore,
    last_access: u64,
    /// Set on allocation, cleared once a paint from the renderer landed.
    fresh: bool,
}

pub struct BackingStoreManager {
    allocator: Box<dyn PixelBufferAllocator>,
    options: BackingStoreManagerOptions,
    entries: FnvHashMap<RenderWidgetHostId, CacheEntry>,
    access_counter: u64,
}

impl BackingStoreManager {
    pub fn new(allocator: Box<dyn PixelBufferAllocator>,
               options: BackingStoreManagerOptions) -> BackingStoreManager {
        BackingStoreManager {
            allocator,
            options,
            entries: FnvHashMap::default(),
            access_counter: 0,
        }
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn allocate(&self, size: DeviceIntSize) -> Option<BackingStore> {
        match self.allocator.allocate(size) {
            Some(buffer) => Some(BackingStore::new(buffer)),
            None => {
                warn!("failed to allocate {}x{} backing store", size.width, size.height);
                None
            }
        }
    }

    fn insert(&mut self, host: RenderWidgetHostId, backing_store: BackingStore, fresh: bool) {
        let last_access = self.next_access();
        let size = backing_store.size();
        let previous = self.entries.insert(host, CacheEntry { backing_store, last_access, fresh });
        match previous {
            Some(old) => debug!("replaced {:?} backing store {:?} with {:?}",
                                host, old.backing_store.size(), size),
            None => debug!("created {:?} backing store for {:?}", size, host),
        }
        self.evict_to_fit(host);
    }

    /// Make sure `host` has a backing store of exactly `desired_size` and
    /// return it. A store of another size is discarded and replaced.
    ///
    /// Returns `None` for empty sizes and when allocation fails; in the latter
    /// case the previous entry (if any) stays in the cache.
    pub fn get_backing_store(&mut self,
                             host: RenderWidgetHostId,
                             desired_size: DeviceIntSize) -> Option<&mut BackingStore> {
        if size_is_empty(&desired_size) {
            return None;
        }

        let matches = self.entries
            .get(&host)
            .map_or(false, |entry| entry.backing_store.size() == desired_size);
        if matches {
            let access = self.next_access();
            let entry = self.entries.get_mut(&host)?;
            entry.last_access = access;
            return Some(&mut entry.backing_store);
        }

        let backing_store = self.allocate(desired_size)?;
        self.insert(host, backing_store, true);
        self.entries.get_mut(&host).map(|entry| &mut entry.backing_store)
    }

    /// Bring the backing store of `host` to `size` and copy the renderer's
    /// freshly painted pixels into it.
    ///
    /// `copy_rects` are the parts of `bitmap_rect` that were painted; when
    /// empty the whole `bitmap_rect` is copied. If the bitmap cannot be used
    /// the cache is left exactly as it was.
    pub fn prepare_backing_store(&mut self,
                                 host: RenderWidgetHostId,
                                 size: DeviceIntSize,
                                 mapper: &dyn SharedMemoryMapper,
                                 bitmap: SharedBitmapHandle,
                                 bitmap_rect: &DeviceIntRect,
                                 copy_rects: &[DeviceIntRect]) -> PrepareResult<PreparedBackingStore> {
        if size_is_empty(&size) {
            return Err(PrepareError::InvalidSize);
        }
        let whole = [*bitmap_rect];
        let copy_rects = if copy_rects.is_empty() { &whole[..] } else { copy_rects };

        let matches = self.entries
            .get(&host)
            .map_or(false, |entry| entry.backing_store.size() == size);

        if matches {
            let access = self.next_access();
            let entry = match self.entries.get_mut(&host) {
                Some(entry) => entry,
                None => return Err(PrepareError::AllocationFailed),
            };
            entry.backing_store.paint_rects(mapper, bitmap, bitmap_rect, copy_rects)?;
            entry.last_access = access;
            let needs_full_paint = entry.fresh;
            entry.fresh = false;
            return Ok(PreparedBackingStore {
                backing_store: &mut entry.backing_store,
                needs_full_paint,
            });
        }

        // Paint into the new store before it replaces the old one, so that a
        // failed paint does not cost us the previous contents.
        let mut backing_store = self.allocate(size).ok_or(PrepareError::AllocationFailed)?;
        backing_store.paint_rects(mapper, bitmap, bitmap_rect, copy_rects)?;
        self.insert(host, backing_store, false);

        match self.entries.get_mut(&host) {
            Some(entry) => Ok(PreparedBackingStore {
                backing_store: &mut entry.backing_store,
                needs_full_paint: true,
            }),
            None => Err(PrepareError::AllocationFailed),
        }
    }

    /// The cached store for `host`, if any. Does not count as a use.
    pub fn lookup(&self, host: RenderWidgetHostId) -> Option<&BackingStore> {
        self.entries.get(&host).map(|entry| &entry.backing_store)
    }

    pub fn remove_backing_store(&mut self, host: RenderWidgetHostId) {
        if self.entries.remove(&host).is_some() {
            debug!("removed backing store for {:?}", host);
        }
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pixel memory held by all cached stores.
    pub fn memory_size(&self) -> usize {
        self.entries.values().map(|entry| entry.backing_store.memory_size()).sum()
    }

    fn least_recently_used(&self, keep: Option<RenderWidgetHostId>) -> Option<RenderWidgetHostId> {
        self.entries
            .iter()
            .filter(|&(host, _)| Some(*host) != keep)
            .min_by_key(|&(_, entry)| entry.last_access)
            .map(|(host, _)| *host)
    }

    fn evict_lru(&mut self, keep: Option<RenderWidgetHostId>) -> bool {
        match self.least_recently_used(keep) {
            Some(host) => {
                if let Some(entry) = self.entries.remove(&host) {
                    debug!("evicted {:?} backing store of {:?}", entry.backing_store.size(), host);
                }
                true
            }
            None => false,
        }
    }

    fn evict_to_fit(&mut self, keep: RenderWidgetHostId) {
        while self.memory_size() > self.options.memory_budget_bytes ||
              self.entries.len() > self.options.max_entries {
            if !self.evict_lru(Some(keep)) {
                break;
            }
        }
    }

    /// Evict least recently used stores until at most `target_bytes` remain.
    /// Called by whatever watches for memory pressure. Returns the number of
    /// stores evicted.
    pub fn trim(&mut self, target_bytes: usize) -> usize {
        let mut evicted = 0;
        while self.memory_size() > target_bytes && self.evict_lru(None) {
            evicted += 1;
        }
        evicted
    }

    /// Whether a store of `size` would fit in the budget at all.
    pub fn fits_in_budget(&self, size: DeviceIntSize) -> bool {
        buffer_bytes(&size) <= self.options.memory_budget_bytes
    }
}
