/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use euclid::{Point2D, Rect, Size2D, Vector2D};

#[derive(Hash, Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct DevicePixel;

pub type DeviceIntRect = Rect<i32, DevicePixel>;
pub type DeviceIntPoint = Point2D<i32, DevicePixel>;
pub type DeviceIntSize = Size2D<i32, DevicePixel>;
pub type DeviceIntVector2D = Vector2D<i32, DevicePixel>;

/// Bytes per pixel of the native framebuffer format (BGRA8, little endian `u32`).
pub const BYTES_PER_PIXEL: usize = 4;

/// Identity of the render widget that owns a backing store. The cache only
/// associates data with it, it never owns the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderWidgetHostId(pub u32);

/// A renderer process, as seen from the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

/// Identifies one shared-memory bitmap within the process that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransportDibId(pub u32);

pub fn rect_is_empty(rect: &DeviceIntRect) -> bool {
    rect.size.width <= 0 || rect.size.height <= 0
}

pub fn size_is_empty(size: &DeviceIntSize) -> bool {
    size.width <= 0 || size.height <= 0
}

/// Size in bytes of a BGRA buffer of the given dimensions. Saturates
/// instead of overflowing.
pub fn buffer_bytes(size: &DeviceIntSize) -> usize {
    if size_is_empty(size) {
        return 0;
    }
    (size.width as usize)
        .saturating_mul(size.height as usize)
        .saturating_mul(BYTES_PER_PIXEL)
}

pub trait RectHelpers where Self: Sized {
    /// Returns true if `other` lies entirely inside `self`. Empty rects are
    /// contained by everything.
    fn contains_device_rect(&self, other: &Self) -> bool;
    fn clipped_to(&self, bounds: &Self) -> Option<Self>;
}

impl RectHelpers for DeviceIntRect {
    fn contains_device_rect(&self, other: &DeviceIntRect) -> bool {
        rect_is_empty(other) ||
            (other.min_x() >= self.min_x() &&
             other.min_y() >= self.min_y() &&
             other.max_x() <= self.max_x() &&
             other.max_y() <= self.max_y())
    }

    fn clipped_to(&self, bounds: &DeviceIntRect) -> Option<DeviceIntRect> {
        self.intersection(bounds).filter(|r| !rect_is_empty(r))
    }
}
