/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::pixel_buffer::PixelBuffer;
use crate::shared_memory::{MapError, SharedBitmapHandle, SharedMemoryMapper};
use crate::types::{buffer_bytes, rect_is_empty, DeviceIntRect, DeviceIntSize, DeviceIntVector2D};
use crate::types::RectHelpers;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintError {
    /// The renderer bitmap could not be mapped (stale handle, dead renderer).
    Map(MapError),
    /// The destination rect is not inside the backing store.
    OutOfBounds,
    /// The renderer bitmap does not cover the rect it claims to have painted.
    SourceTooSmall,
}

impl fmt::Display for PaintError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PaintError::Map(ref err) => write!(f, "unable to map renderer bitmap: {}", err),
            PaintError::OutOfBounds => write!(f, "rect lies outside the backing store"),
            PaintError::SourceTooSmall => write!(f, "renderer bitmap does not cover the painted rect"),
        }
    }
}

impl std::error::Error for PaintError {}

impl From<MapError> for PaintError {
    fn from(err: MapError) -> PaintError {
        PaintError::Map(err)
    }
}

pub type PaintResult<T> = Result<T, PaintError>;

/// The last complete rendering of one render widget.
///
/// The size is fixed for the lifetime of the store; a widget that changes
/// size gets a new store from the `BackingStoreManager`.
pub struct BackingStore {
    buffer: Box<dyn PixelBuffer>,
}

impl BackingStore {
    pub fn new(buffer: Box<dyn PixelBuffer>) -> BackingStore {
        BackingStore { buffer }
    }

    pub fn size(&self) -> DeviceIntSize {
        self.buffer.size()
    }

    pub fn bounds(&self) -> DeviceIntRect {
        DeviceIntRect::from_size(self.size())
    }

    /// Bytes of pixel memory held by this store.
    pub fn memory_size(&self) -> usize {
        buffer_bytes(&self.size())
    }

    /// Copy `bitmap_rect` of the renderer bitmap into the same rect of this
    /// store. Nothing is modified if an error is returned.
    pub fn paint_rect(&mut self,
                      mapper: &dyn SharedMemoryMapper,
                      bitmap: SharedBitmapHandle,
                      bitmap_rect: &DeviceIntRect) -> PaintResult<()> {
        if rect_is_empty(bitmap_rect) {
            return Ok(());
        }
        if !self.bounds().contains_device_rect(bitmap_rect) {
            warn!("paint of {:?} outside {:?} backing store", bitmap_rect, self.size());
            return Err(PaintError::OutOfBounds);
        }

        let source = mapper.map(bitmap)?;
        if !source.bounds().contains_device_rect(bitmap_rect) {
            return Err(PaintError::SourceTooSmall);
        }
        self.buffer.blit(&source, bitmap_rect);
        Ok(())
    }

    /// Copy the parts of `copy_rects` that fall inside both `bitmap_rect` and
    /// this store. Rects (or parts of rects) outside either are skipped.
    pub fn paint_rects(&mut self,
                       mapper: &dyn SharedMemoryMapper,
                       bitmap: SharedBitmapHandle,
                       bitmap_rect: &DeviceIntRect,
                       copy_rects: &[DeviceIntRect]) -> PaintResult<()> {
        let valid_rect = match bitmap_rect.clipped_to(&self.bounds()) {
            Some(rect) => rect,
            None => return Ok(()),
        };

        let source = mapper.map(bitmap)?;
        if !source.bounds().contains_device_rect(&valid_rect) {
            return Err(PaintError::SourceTooSmall);
        }
        for copy_rect in copy_rects {
            if let Some(rect) = copy_rect.clipped_to(&valid_rect) {
                self.buffer.blit(&source, &rect);
            }
        }
        Ok(())
    }

    /// Shift the content inside `clip_rect` by `delta`, then paint the newly
    /// exposed `bitmap_rect` from the renderer bitmap.
    ///
    /// A scroll by at least the clip extent leaves nothing to reuse: only the
    /// paint happens, and `Ok(true)` is returned unless `bitmap_rect` covered
    /// the whole clip. The caller then has to repaint the clip.
    pub fn scroll_rect(&mut self,
                       mapper: &dyn SharedMemoryMapper,
                       bitmap: SharedBitmapHandle,
                       bitmap_rect: &DeviceIntRect,
                       delta: DeviceIntVector2D,
                       clip_rect: &DeviceIntRect,
                       view_size: DeviceIntSize) -> PaintResult<bool> {
        let target = match DeviceIntRect::from_size(view_size).clipped_to(&self.bounds()) {
            Some(rect) => rect,
            None => return Ok(false),
        };
        let paint_rect = bitmap_rect.clipped_to(&target);

        // Map before touching any pixels so a stale handle leaves the store
        // as it was.
        let source = match paint_rect {
            Some(ref rect) => {
                let source = mapper.map(bitmap)?;
                if !source.bounds().contains_device_rect(rect) {
                    return Err(PaintError::SourceTooSmall);
                }
                Some(source)
            }
            None => None,
        };

        let mut needs_full_paint = false;
        if let Some(clip) = clip_rect.clipped_to(&target) {
            if delta.x.abs() < clip.size.width && delta.y.abs() < clip.size.height {
                self.buffer.scroll(delta, &clip);
            } else {
                debug!("scroll by {:?} exceeds {:?}, nothing to reuse", delta, clip);
                needs_full_paint = !paint_rect.map_or(false, |rect| rect.contains_device_rect(&clip));
            }
        }

        if let (Some(source), Some(rect)) = (source, paint_rect) {
            self.buffer.blit(&source, &rect);
        }
        Ok(needs_full_paint)
    }

    /// Read back `rect`, row-major. Returns `None` if the rect is not inside
    /// the store.
    pub fn read_pixels(&self, rect: &DeviceIntRect) -> Option<Vec<u32>> {
        if rect_is_empty(rect) {
            return Some(Vec::new());
        }
        if !self.bounds().contains_device_rect(rect) {
            return None;
        }
        Some(self.buffer.read_pixels(rect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_buffer::SoftwarePixelBuffer;
    use crate::shared_memory::TransportDibRegistry;
    use crate::types::{ProcessId, TransportDibId};
    use euclid::{rect, size2, vec2};

    fn setup(size: DeviceIntSize, fill: u32) -> (TransportDibRegistry, SharedBitmapHandle, BackingStore) {
        let mut registry = TransportDibRegistry::new();
        let pixels = vec![fill; (size.width * size.height) as usize];
        let handle = registry.create(ProcessId(1), TransportDibId(1), size, &pixels);
        let store = BackingStore::new(Box::new(SoftwarePixelBuffer::new(size).unwrap()));
        (registry, handle, store)
    }

    #[test]
    fn paint_outside_bounds_is_rejected() {
        let (registry, handle, mut store) = setup(size2(10, 10), 0xff00ff00);
        assert_eq!(store.paint_rect(&registry, handle, &rect(5, 5, 6, 5)),
                   Err(PaintError::OutOfBounds));
        assert_eq!(store.read_pixels(&rect(5, 5, 5, 5)).unwrap(), vec![0; 25]);
    }

    #[test]
    fn empty_paint_is_a_no_op() {
        let (registry, _, mut store) = setup(size2(4, 4), 1);
        let bogus = SharedBitmapHandle::new(ProcessId(9), TransportDibId(9));
        assert_eq!(store.paint_rect(&registry, bogus, &rect(1, 1, 0, 3)), Ok(()));
        assert_eq!(store.scroll_rect(&registry, bogus, &rect(0, 0, 0, 0), vec2(0, 1),
                                     &rect(0, 0, 4, 4), size2(4, 4)), Ok(false));
    }

    #[test]
    fn stale_handle_leaves_store_untouched() {
        let (mut registry, handle, mut store) = setup(size2(4, 4), 7);
        store.paint_rect(&registry, handle, &rect(0, 0, 4, 4)).unwrap();
        registry.remove_process(ProcessId(1));

        assert_eq!(store.scroll_rect(&registry, handle, &rect(0, 3, 4, 1), vec2(0, -1),
                                     &rect(0, 0, 4, 4), size2(4, 4)),
                   Err(PaintError::Map(MapError::UnknownProcess)));
        assert_eq!(store.read_pixels(&rect(0, 0, 4, 4)).unwrap(), vec![7; 16]);
        assert_eq!(registry.live_mappings(), 0);
    }

    #[test]
    fn paint_rects_clips_to_bitmap_rect() {
        let (registry, handle, mut store) = setup(size2(6, 6), 3);
        store.paint_rects(&registry,
                          handle,
                          &rect(0, 0, 3, 6),
                          &[rect(2, 0, 4, 1), rect(4, 4, 2, 2)]).unwrap();
        assert_eq!(store.read_pixels(&rect(0, 0, 6, 1)).unwrap(), vec![0, 0, 3, 0, 0, 0]);
        assert_eq!(store.read_pixels(&rect(4, 4, 2, 2)).unwrap(), vec![0; 4]);
    }

    #[test]
    fn oversized_scroll_only_paints() {
        let (registry, handle, mut store) = setup(size2(4, 4), 5);
        assert_eq!(store.scroll_rect(&registry, handle, &rect(0, 0, 4, 4), vec2(0, 4),
                                     &rect(0, 0, 4, 4), size2(4, 4)), Ok(false));
        assert_eq!(store.read_pixels(&rect(0, 0, 4, 4)).unwrap(), vec![5; 16]);
    }

    #[test]
    fn oversized_scroll_reports_stale_clip() {
        let (registry, handle, mut store) = setup(size2(4, 4), 5);
        assert_eq!(store.scroll_rect(&registry, handle, &rect(0, 0, 4, 1), vec2(-5, 0),
                                     &rect(0, 0, 4, 4), size2(4, 4)), Ok(true));
        assert_eq!(store.read_pixels(&rect(0, 0, 4, 1)).unwrap(), vec![5; 4]);
        assert_eq!(store.read_pixels(&rect(0, 1, 4, 3)).unwrap(), vec![0; 12]);

        // A scroll the clip can absorb never asks for more than the strip.
        assert_eq!(store.scroll_rect(&registry, handle, &rect(0, 3, 4, 1), vec2(0, -1),
                                     &rect(0, 0, 4, 4), size2(4, 4)), Ok(false));
    }

    #[test]
    fn read_pixels_outside_is_none() {
        let (_, _, store) = setup(size2(4, 4), 0);
        assert_eq!(store.read_pixels(&rect(2, 2, 3, 1)), None);
        assert_eq!(store.memory_size(), 64);
    }
}
