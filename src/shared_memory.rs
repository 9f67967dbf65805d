/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Renderer-owned bitmaps living in shared memory.
//!
//! The browser never holds on to a renderer bitmap. It resolves a
//! `SharedBitmapHandle` through a `SharedMemoryMapper`, reads from the
//! resulting `MappedBitmap` and drops it before the paint call returns.

use byteorder::{ByteOrder, LittleEndian};
use fnv::FnvHashMap;
use ipc_channel::ipc::IpcSharedMemory;
use std::cell::Cell;
use std::fmt;
use crate::types::{buffer_bytes, DeviceIntRect, DeviceIntSize, ProcessId, TransportDibId, BYTES_PER_PIXEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedBitmapHandle {
    pub process: ProcessId,
    pub dib: TransportDibId,
}

impl SharedBitmapHandle {
    pub fn new(process: ProcessId, dib: TransportDibId) -> SharedBitmapHandle {
        SharedBitmapHandle { process, dib }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The process is gone or was never known to us.
    UnknownProcess,
    /// The process exists but has no bitmap with this id.
    UnknownSection,
    /// The section is smaller than the bitmap dimensions claim.
    TooSmall,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MapError::UnknownProcess => write!(f, "unknown renderer process"),
            MapError::UnknownSection => write!(f, "unknown shared memory section"),
            MapError::TooSmall => write!(f, "shared memory section is too small"),
        }
    }
}

impl std::error::Error for MapError {}

pub type MapResult<T> = Result<T, MapError>;

pub trait SharedMemoryMapper {
    /// Map the bitmap read-only. The mapping is released when the returned
    /// view is dropped.
    fn map(&self, handle: SharedBitmapHandle) -> MapResult<MappedBitmap>;
}

/// A scoped, read-only view of a renderer bitmap.
pub struct MappedBitmap<'a> {
    bytes: &'a [u8],
    size: DeviceIntSize,
    live_mappings: &'a Cell<usize>,
}

impl<'a> MappedBitmap<'a> {
    pub fn size(&self) -> DeviceIntSize {
        self.size
    }

    pub fn bounds(&self) -> DeviceIntRect {
        DeviceIntRect::from_size(self.size)
    }

    fn stride(&self) -> usize {
        self.size.width as usize * BYTES_PER_PIXEL
    }

    /// Copy `out.len()` pixels of row `y` starting at column `x`. The caller
    /// guarantees the span is inside `bounds()`.
    pub fn read_row(&self, x: i32, y: i32, out: &mut [u32]) {
        debug_assert!(x >= 0 && y >= 0);
        debug_assert!(x as usize + out.len() <= self.size.width as usize);
        let start = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        let end = start + out.len() * BYTES_PER_PIXEL;
        LittleEndian::read_u32_into(&self.bytes[start .. end], out);
    }
}

impl<'a> Drop for MappedBitmap<'a> {
    fn drop(&mut self) {
        self.live_mappings.set(self.live_mappings.get() - 1);
        trace!("unmapped {}x{} bitmap", self.size.width, self.size.height);
    }
}

struct TransportDib {
    memory: IpcSharedMemory,
    size: DeviceIntSize,
}

/// The browser-side table of bitmaps renderers have handed over, keyed by
/// the owning process.
pub struct TransportDibRegistry {
    processes: FnvHashMap<ProcessId, FnvHashMap<TransportDibId, TransportDib>>,
    live_mappings: Cell<usize>,
}

impl TransportDibRegistry {
    pub fn new() -> TransportDibRegistry {
        TransportDibRegistry {
            processes: FnvHashMap::default(),
            live_mappings: Cell::new(0),
        }
    }

    pub fn add_process(&mut self, process: ProcessId) {
        self.processes.entry(process).or_insert_with(FnvHashMap::default);
    }

    /// Forget a renderer and every bitmap it shared, e.g. after it crashed.
    pub fn remove_process(&mut self, process: ProcessId) {
        if self.processes.remove(&process).is_some() {
            debug!("dropped transport bitmaps of {:?}", process);
        }
    }

    /// Register a section received from `process`. Registering the same id
    /// again replaces the previous section.
    pub fn register(&mut self,
                    process: ProcessId,
                    dib: TransportDibId,
                    size: DeviceIntSize,
                    memory: IpcSharedMemory) -> SharedBitmapHandle {
        self.processes
            .entry(process)
            .or_insert_with(FnvHashMap::default)
            .insert(dib, TransportDib { memory, size });
        SharedBitmapHandle::new(process, dib)
    }

    /// Allocate a new section holding `pixels` (row-major, `size.width` per row).
    pub fn create(&mut self,
                  process: ProcessId,
                  dib: TransportDibId,
                  size: DeviceIntSize,
                  pixels: &[u32]) -> SharedBitmapHandle {
        let mut bytes = vec![0u8; pixels.len() * BYTES_PER_PIXEL];
        LittleEndian::write_u32_into(pixels, &mut bytes);
        self.register(process, dib, size, IpcSharedMemory::from_bytes(&bytes))
    }

    pub fn unregister(&mut self, handle: SharedBitmapHandle) {
        if let Some(dibs) = self.processes.get_mut(&handle.process) {
            dibs.remove(&handle.dib);
        }
    }

    /// Number of views currently outstanding.
    pub fn live_mappings(&self) -> usize {
        self.live_mappings.get()
    }
}

impl SharedMemoryMapper for TransportDibRegistry {
    fn map(&self, handle: SharedBitmapHandle) -> MapResult<MappedBitmap> {
        let dibs = self.processes.get(&handle.process).ok_or(MapError::UnknownProcess)?;
        let dib = dibs.get(&handle.dib).ok_or(MapError::UnknownSection)?;
        let needed = buffer_bytes(&dib.size);
        if dib.memory.len() < needed {
            return Err(MapError::TooSmall);
        }

        self.live_mappings.set(self.live_mappings.get() + 1);
        trace!("mapped {:?} ({} bytes)", handle, needed);
        Ok(MappedBitmap {
            bytes: &dib.memory[.. needed],
            size: dib.size,
            live_mappings: &self.live_mappings,
        })
    }
}
