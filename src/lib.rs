/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Browser process side of painting: a cache of per-widget backing stores
//! filled from renderer bitmaps in shared memory, and the scheduler that
//! drives a GL command buffer decoder for accelerated compositing.

extern crate byteorder;
extern crate euclid;
extern crate fnv;
extern crate gleam;
extern crate ipc_channel;
#[macro_use]
extern crate log;

pub mod backing_store;
pub mod backing_store_manager;
pub mod command_buffer;
pub mod decoder;
pub mod gl_context;
pub mod gl_pixel_buffer;
pub mod gpu_scheduler;
pub mod headless;
pub mod pixel_buffer;
pub mod shared_memory;
pub mod types;

pub use crate::backing_store::{BackingStore, PaintError, PaintResult};
pub use crate::backing_store_manager::{BackingStoreManager, BackingStoreManagerOptions};
pub use crate::backing_store_manager::{PrepareError, PrepareResult, PreparedBackingStore};
pub use crate::command_buffer::{CommandBuffer, CommandBufferState, CommandId, ParseError};
pub use crate::decoder::{Decoder, DecoderError, Gles2Decoder};
pub use crate::gl_context::{ContextAttribs, ContextError, ContextState, GLContext, GLContextFactory};
pub use crate::gl_context::{NativeWindow, ShareGroup};
pub use crate::gpu_scheduler::{GpuScheduler, SchedulerError, SchedulerResult};
pub use crate::headless::HeadlessContextFactory;
pub use crate::pixel_buffer::{PixelBuffer, PixelBufferAllocator, SoftwareAllocator};
pub use crate::shared_memory::{SharedBitmapHandle, SharedMemoryMapper, TransportDibRegistry};
pub use crate::types::{DeviceIntRect, DeviceIntSize, DeviceIntVector2D, RenderWidgetHostId};
