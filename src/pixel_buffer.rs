/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::shared_memory::MappedBitmap;
use crate::types::{size_is_empty, DeviceIntRect, DeviceIntSize, DeviceIntVector2D, RectHelpers};

/// The storage behind a backing store. Implementations are picked once, when
/// the allocator is handed to the `BackingStoreManager`.
///
/// All rects passed in have already been clipped to `size()` (and, for blits,
/// to the source bitmap) by the caller.
pub trait PixelBuffer {
    fn size(&self) -> DeviceIntSize;

    /// Copy `rect` of `source` into the same coordinates of this buffer.
    fn blit(&mut self, source: &MappedBitmap, rect: &DeviceIntRect);

    /// Move the contents of `clip_rect` by `delta`. Pixels moved outside the
    /// clip are dropped, uncovered pixels keep their old value.
    fn scroll(&mut self, delta: DeviceIntVector2D, clip_rect: &DeviceIntRect);

    fn read_pixels(&self, rect: &DeviceIntRect) -> Vec<u32>;
}

pub trait PixelBufferAllocator {
    /// Returns `None` if the platform buffer could not be created.
    fn allocate(&self, size: DeviceIntSize) -> Option<Box<dyn PixelBuffer>>;
}

/// The part of `clip_rect` that still holds valid content after moving it by
/// `delta`, expressed in source coordinates.
pub fn scroll_source_rect(delta: DeviceIntVector2D, clip_rect: &DeviceIntRect) -> Option<DeviceIntRect> {
    clip_rect.translate(-delta).clipped_to(clip_rect)
}

/// System memory pixels, the equivalent of a DIB section.
pub struct SoftwarePixelBuffer {
    size: DeviceIntSize,
    pixels: Vec<u32>,
}

impl SoftwarePixelBuffer {
    /// Returns `None` for empty sizes and when the pixels cannot be
    /// allocated.
    pub fn new(size: DeviceIntSize) -> Option<SoftwarePixelBuffer> {
        if size_is_empty(&size) {
            return None;
        }
        let count = (size.width as usize).checked_mul(size.height as usize)?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(count).ok()?;
        pixels.resize(count, 0);
        Some(SoftwarePixelBuffer { size, pixels })
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        y as usize * self.size.width as usize + x as usize
    }
}

impl PixelBuffer for SoftwarePixelBuffer {
    fn size(&self) -> DeviceIntSize {
        self.size
    }

    fn blit(&mut self, source: &MappedBitmap, rect: &DeviceIntRect) {
        let width = rect.size.width as usize;
        for y in rect.min_y() .. rect.max_y() {
            let start = self.offset(rect.min_x(), y);
            source.read_row(rect.min_x(), y, &mut self.pixels[start .. start + width]);
        }
    }

    fn scroll(&mut self, delta: DeviceIntVector2D, clip_rect: &DeviceIntRect) {
        let src_rect = match scroll_source_rect(delta, clip_rect) {
            Some(rect) => rect,
            None => return,
        };
        let width = src_rect.size.width as usize;

        // Walk rows against the direction of motion so no source row is
        // overwritten before it has been copied.
        let rows: Box<dyn Iterator<Item = i32>> = if delta.y > 0 {
            Box::new((src_rect.min_y() .. src_rect.max_y()).rev())
        } else {
            Box::new(src_rect.min_y() .. src_rect.max_y())
        };
        for y in rows {
            let src = self.offset(src_rect.min_x(), y);
            let dst = self.offset(src_rect.min_x() + delta.x, y + delta.y);
            self.pixels.copy_within(src .. src + width, dst);
        }
    }

    fn read_pixels(&self, rect: &DeviceIntRect) -> Vec<u32> {
        let width = rect.size.width as usize;
        let mut out = Vec::with_capacity(width * rect.size.height as usize);
        for y in rect.min_y() .. rect.max_y() {
            let start = self.offset(rect.min_x(), y);
            out.extend_from_slice(&self.pixels[start .. start + width]);
        }
        out
    }
}

pub struct SoftwareAllocator {
    /// Requests above this many pixels fail, as a platform allocation would.
    pub max_pixels: Option<usize>,
}

impl Default for SoftwareAllocator {
    fn default() -> Self {
        SoftwareAllocator { max_pixels: None }
    }
}

impl PixelBufferAllocator for SoftwareAllocator {
    fn allocate(&self, size: DeviceIntSize) -> Option<Box<dyn PixelBuffer>> {
        if size_is_empty(&size) {
            return None;
        }
        let pixels = size.width as usize * size.height as usize;
        if self.max_pixels.map_or(false, |max| pixels > max) {
            warn!("refusing {}x{} pixel buffer", size.width, size.height);
            return None;
        }
        match SoftwarePixelBuffer::new(size) {
            Some(buffer) => Some(Box::new(buffer)),
            None => {
                warn!("out of memory for {}x{} pixel buffer", size.width, size.height);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory::{SharedMemoryMapper, TransportDibRegistry};
    use crate::types::{ProcessId, TransportDibId};
    use euclid::{rect, size2, vec2};

    fn numbered(size: DeviceIntSize) -> Vec<u32> {
        (0 .. (size.width * size.height) as u32).collect()
    }

    #[test]
    fn blit_copies_only_the_rect() {
        let size = size2(4, 4);
        let mut registry = TransportDibRegistry::new();
        let handle = registry.create(ProcessId(1), TransportDibId(1), size, &numbered(size));
        let mut buffer = SoftwarePixelBuffer::new(size).unwrap();

        buffer.blit(&registry.map(handle).unwrap(), &rect(1, 1, 2, 2));
        assert_eq!(buffer.read_pixels(&rect(0, 0, 4, 4)),
                   vec![0, 0, 0, 0,
                        0, 5, 6, 0,
                        0, 9, 10, 0,
                        0, 0, 0, 0]);
    }

    #[test]
    fn scroll_down_and_right() {
        let size = size2(3, 3);
        let mut registry = TransportDibRegistry::new();
        let handle = registry.create(ProcessId(1), TransportDibId(1), size, &numbered(size));
        let mut buffer = SoftwarePixelBuffer::new(size).unwrap();
        buffer.blit(&registry.map(handle).unwrap(), &rect(0, 0, 3, 3));

        buffer.scroll(vec2(1, 1), &rect(0, 0, 3, 3));
        assert_eq!(buffer.read_pixels(&rect(0, 0, 3, 3)),
                   vec![0, 1, 2,
                        3, 0, 1,
                        6, 3, 4]);
    }

    #[test]
    fn scroll_up_within_clip() {
        let size = size2(2, 4);
        let mut registry = TransportDibRegistry::new();
        let handle = registry.create(ProcessId(1), TransportDibId(1), size, &numbered(size));
        let mut buffer = SoftwarePixelBuffer::new(size).unwrap();
        buffer.blit(&registry.map(handle).unwrap(), &rect(0, 0, 2, 4));

        buffer.scroll(vec2(0, -1), &rect(0, 1, 2, 3));
        assert_eq!(buffer.read_pixels(&rect(0, 0, 2, 4)),
                   vec![0, 1,
                        4, 5,
                        6, 7,
                        6, 7]);
    }

    #[test]
    fn scroll_past_clip_is_a_no_op() {
        assert_eq!(scroll_source_rect(vec2(0, 10), &rect(0, 0, 10, 10)), None);
        assert_eq!(scroll_source_rect(vec2(-12, 0), &rect(0, 0, 10, 10)), None);
    }

    #[test]
    fn allocator_limits() {
        let allocator = SoftwareAllocator { max_pixels: Some(100) };
        assert!(allocator.allocate(size2(10, 10)).is_some());
        assert!(allocator.allocate(size2(10, 11)).is_none());
        assert!(allocator.allocate(size2(0, 11)).is_none());
    }

    #[test]
    fn unallocatable_size_fails_without_panicking() {
        let allocator = SoftwareAllocator::default();
        assert!(allocator.allocate(size2(i32::MAX, i32::MAX)).is_none());
        assert!(SoftwarePixelBuffer::new(size2(i32::MAX, i32::MAX)).is_none());
    }
}
