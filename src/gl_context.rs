/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! GL contexts as seen by the GPU scheduler.
//!
//! A context is either bound to a native window or offscreen (a pbuffer
//! style surface backed by a texture). Offscreen contexts may join the
//! share group of another context, which makes texture names created in
//! one usable in the other.

use crate::types::DeviceIntSize;
use gleam::gl::GLuint;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opaque native window handle (an `HWND`, X11 window, `NSView*`...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeWindow(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but never made current.
    Uninitialized,
    Current,
    NotCurrent,
    /// Terminal. Every further call fails.
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    AlreadyDestroyed,
    MakeCurrentFailed,
    /// The operation needs the context to be current on the calling thread.
    NotCurrent,
    /// The operation needs an offscreen context.
    NotOffscreen,
    InvalidSize,
    /// Unknown key or out of range value in an attribute list.
    InvalidAttribute(i32),
    /// The attribute list ended in the middle of a key/value pair.
    MissingAttributeValue(i32),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ContextError::AlreadyDestroyed => write!(f, "context was destroyed"),
            ContextError::MakeCurrentFailed => write!(f, "unable to make context current"),
            ContextError::NotCurrent => write!(f, "context is not current"),
            ContextError::NotOffscreen => write!(f, "context is not offscreen"),
            ContextError::InvalidSize => write!(f, "invalid surface size"),
            ContextError::InvalidAttribute(key) => write!(f, "invalid context attribute 0x{:x}", key),
            ContextError::MissingAttributeValue(key) => write!(f, "context attribute 0x{:x} has no value", key),
        }
    }
}

impl std::error::Error for ContextError {}

pub type ContextResult<T> = Result<T, ContextError>;

static NEXT_SHARE_GROUP_ID: AtomicUsize = AtomicUsize::new(1);

struct ShareGroupInner {
    id: usize,
    next_texture: Cell<GLuint>,
}

/// The object namespace a set of contexts shares.
#[derive(Clone)]
pub struct ShareGroup {
    inner: Rc<ShareGroupInner>,
}

impl ShareGroup {
    pub fn new() -> ShareGroup {
        let id = NEXT_SHARE_GROUP_ID.fetch_add(1, Ordering::Relaxed);
        ShareGroup {
            inner: Rc::new(ShareGroupInner { id, next_texture: Cell::new(1) }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Reserve a texture name in this namespace. Names are never reused.
    pub fn gen_texture(&self) -> GLuint {
        let name = self.inner.next_texture.get();
        self.inner.next_texture.set(name + 1);
        name
    }

    pub fn is_same_group(&self, other: &ShareGroup) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ShareGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ShareGroup({})", self.inner.id)
    }
}

pub trait GLContext {
    /// Bind the context to the calling thread. Currency is per thread: a
    /// context made current here is not current anywhere else.
    fn make_current(&mut self) -> ContextResult<()>;
    fn release_current(&mut self) -> ContextResult<()>;
    fn state(&self) -> ContextState;

    fn is_current(&self) -> bool {
        self.state() == ContextState::Current
    }

    fn is_offscreen(&self) -> bool;
    fn size(&self) -> DeviceIntSize;

    /// Reallocate the offscreen surface. Fails for view contexts.
    fn resize(&mut self, size: DeviceIntSize) -> ContextResult<()>;
    fn swap_buffers(&mut self) -> ContextResult<()>;

    fn share_group(&self) -> ShareGroup;

    /// Space separated list, as `glGetString(GL_EXTENSIONS)` reports it.
    fn extensions(&self) -> String;

    /// Texture holding the color buffer of an offscreen context, named in
    /// the context's share group.
    fn backing_texture(&self) -> Option<GLuint>;

    /// Release the native context. Irreversible.
    fn destroy(&mut self);
}

/// Creates platform contexts. Returns `None` when the platform refuses.
pub trait GLContextFactory {
    fn create_view_context(&self,
                           window: NativeWindow,
                           multisampled: bool) -> Option<Box<dyn GLContext>>;

    fn create_offscreen_context(&self,
                                share_with: Option<&ShareGroup>) -> Option<Box<dyn GLContext>>;
}

pub const ATTRIB_ALPHA_SIZE: i32 = 0x3021;
pub const ATTRIB_BLUE_SIZE: i32 = 0x3022;
pub const ATTRIB_GREEN_SIZE: i32 = 0x3023;
pub const ATTRIB_RED_SIZE: i32 = 0x3024;
pub const ATTRIB_DEPTH_SIZE: i32 = 0x3025;
pub const ATTRIB_STENCIL_SIZE: i32 = 0x3026;
pub const ATTRIB_SAMPLES: i32 = 0x3031;
pub const ATTRIB_SAMPLE_BUFFERS: i32 = 0x3032;
pub const ATTRIB_NONE: i32 = 0x3038;

/// Surface requirements requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAttribs {
    pub alpha_size: i32,
    pub red_size: i32,
    pub green_size: i32,
    pub blue_size: i32,
    pub depth_size: i32,
    pub stencil_size: i32,
    pub samples: i32,
    pub sample_buffers: i32,
}

impl Default for ContextAttribs {
    fn default() -> Self {
        ContextAttribs {
            alpha_size: 8,
            red_size: 8,
            green_size: 8,
            blue_size: 8,
            depth_size: 24,
            stencil_size: 8,
            samples: 0,
            sample_buffers: 0,
        }
    }
}

impl ContextAttribs {
    /// Parse a key/value list. Parsing stops at `ATTRIB_NONE` or the end of
    /// the slice.
    pub fn parse(list: &[i32]) -> ContextResult<ContextAttribs> {
        let mut attribs = ContextAttribs::default();
        for pair in list.chunks(2) {
            let key = pair[0];
            if key == ATTRIB_NONE {
                break;
            }
            let value = match pair.get(1) {
                Some(&value) => value,
                None => return Err(ContextError::MissingAttributeValue(key)),
            };
            if value < 0 {
                return Err(ContextError::InvalidAttribute(key));
            }
            match key {
                ATTRIB_ALPHA_SIZE => attribs.alpha_size = value,
                ATTRIB_RED_SIZE => attribs.red_size = value,
                ATTRIB_GREEN_SIZE => attribs.green_size = value,
                ATTRIB_BLUE_SIZE => attribs.blue_size = value,
                ATTRIB_DEPTH_SIZE => attribs.depth_size = value,
                ATTRIB_STENCIL_SIZE => attribs.stencil_size = value,
                ATTRIB_SAMPLES => attribs.samples = value,
                ATTRIB_SAMPLE_BUFFERS => attribs.sample_buffers = value,
                _ => return Err(ContextError::InvalidAttribute(key)),
            }
        }
        Ok(attribs)
    }

    pub fn multisampled(&self) -> bool {
        self.samples > 0 && self.sample_buffers > 0
    }
}
