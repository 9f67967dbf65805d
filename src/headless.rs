/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Contexts that need neither a display nor a GPU. They track currency,
//! surfaces and share groups exactly like a platform context would, but
//! never execute GL.

use crate::gl_context::{ContextError, ContextResult, ContextState, GLContext, GLContextFactory};
use crate::gl_context::{NativeWindow, ShareGroup};
use crate::types::{size_is_empty, DeviceIntSize};
use gleam::gl::GLuint;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_EXTENSIONS: &str = "GL_OES_packed_depth_stencil GL_OES_rgb8_rgba8 \
                                  GL_EXT_texture_format_BGRA8888 GL_EXT_read_format_bgra \
                                  GL_CHROMIUM_map_sub GL_ANGLE_framebuffer_multisample";

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<usize>> = Cell::new(None);
}

fn current_context() -> Option<usize> {
    CURRENT_CONTEXT.with(|current| current.get())
}

fn set_current_context(id: Option<usize>) {
    CURRENT_CONTEXT.with(|current| current.set(id));
}

/// Counters shared by a factory and every context it created.
#[derive(Debug, Default)]
pub struct HeadlessStats {
    pub contexts_created: Cell<usize>,
    pub contexts_destroyed: Cell<usize>,
    pub swaps: Cell<usize>,
}

enum Surface {
    View(NativeWindow),
    Offscreen(Option<GLuint>),
}

pub struct HeadlessContext {
    id: usize,
    surface: Surface,
    size: DeviceIntSize,
    multisampled: bool,
    share_group: ShareGroup,
    extensions: String,
    ever_current: bool,
    destroyed: bool,
    stats: Rc<HeadlessStats>,
}

impl HeadlessContext {
    fn new(surface: Surface,
           size: DeviceIntSize,
           multisampled: bool,
           share_group: ShareGroup,
           extensions: String,
           stats: Rc<HeadlessStats>) -> HeadlessContext {
        stats.contexts_created.set(stats.contexts_created.get() + 1);
        HeadlessContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            surface,
            size,
            multisampled,
            share_group,
            extensions,
            ever_current: false,
            destroyed: false,
            stats,
        }
    }

    pub fn window(&self) -> Option<NativeWindow> {
        match self.surface {
            Surface::View(window) => Some(window),
            Surface::Offscreen(..) => None,
        }
    }

    pub fn is_multisampled(&self) -> bool {
        self.multisampled
    }

    fn check_alive(&self) -> ContextResult<()> {
        if self.destroyed {
            Err(ContextError::AlreadyDestroyed)
        } else {
            Ok(())
        }
    }
}

impl GLContext for HeadlessContext {
    fn make_current(&mut self) -> ContextResult<()> {
        self.check_alive()?;
        set_current_context(Some(self.id));
        self.ever_current = true;
        Ok(())
    }

    fn release_current(&mut self) -> ContextResult<()> {
        self.check_alive()?;
        if current_context() == Some(self.id) {
            set_current_context(None);
        }
        Ok(())
    }

    fn state(&self) -> ContextState {
        if self.destroyed {
            ContextState::Destroyed
        } else if !self.ever_current {
            ContextState::Uninitialized
        } else if current_context() == Some(self.id) {
            ContextState::Current
        } else {
            ContextState::NotCurrent
        }
    }

    fn is_offscreen(&self) -> bool {
        match self.surface {
            Surface::View(..) => false,
            Surface::Offscreen(..) => true,
        }
    }

    fn size(&self) -> DeviceIntSize {
        self.size
    }

    fn resize(&mut self, size: DeviceIntSize) -> ContextResult<()> {
        self.check_alive()?;
        if size_is_empty(&size) {
            return Err(ContextError::InvalidSize);
        }
        match self.surface {
            Surface::View(..) => Err(ContextError::NotOffscreen),
            Surface::Offscreen(ref mut texture) => {
                *texture = Some(self.share_group.gen_texture());
                self.size = size;
                Ok(())
            }
        }
    }

    fn swap_buffers(&mut self) -> ContextResult<()> {
        self.check_alive()?;
        if !self.is_current() {
            return Err(ContextError::NotCurrent);
        }
        self.stats.swaps.set(self.stats.swaps.get() + 1);
        Ok(())
    }

    fn share_group(&self) -> ShareGroup {
        self.share_group.clone()
    }

    fn extensions(&self) -> String {
        self.extensions.clone()
    }

    fn backing_texture(&self) -> Option<GLuint> {
        match self.surface {
            Surface::View(..) => None,
            Surface::Offscreen(texture) => texture,
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if current_context() == Some(self.id) {
            set_current_context(None);
        }
        self.destroyed = true;
        self.stats.contexts_destroyed.set(self.stats.contexts_destroyed.get() + 1);
    }
}

pub struct HeadlessContextFactory {
    extensions: String,
    window_size: DeviceIntSize,
    fail_creation: Cell<bool>,
    stats: Rc<HeadlessStats>,
}

impl HeadlessContextFactory {
    pub fn new(window_size: DeviceIntSize) -> HeadlessContextFactory {
        HeadlessContextFactory {
            extensions: DEFAULT_EXTENSIONS.to_owned(),
            window_size,
            fail_creation: Cell::new(false),
            stats: Rc::new(HeadlessStats::default()),
        }
    }

    pub fn with_extensions(mut self, extensions: &str) -> HeadlessContextFactory {
        self.extensions = extensions.to_owned();
        self
    }

    /// Make every following creation fail, as a driver out of resources would.
    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.set(fail);
    }

    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }
}

impl GLContextFactory for HeadlessContextFactory {
    fn create_view_context(&self,
                           window: NativeWindow,
                           multisampled: bool) -> Option<Box<dyn GLContext>> {
        if self.fail_creation.get() {
            return None;
        }
        Some(Box::new(HeadlessContext::new(Surface::View(window),
                                           self.window_size,
                                           multisampled,
                                           ShareGroup::new(),
                                           self.extensions.clone(),
                                           self.stats.clone())))
    }

    fn create_offscreen_context(&self,
                                share_with: Option<&ShareGroup>) -> Option<Box<dyn GLContext>> {
        if self.fail_creation.get() {
            return None;
        }
        let share_group = share_with.cloned().unwrap_or_else(ShareGroup::new);
        Some(Box::new(HeadlessContext::new(Surface::Offscreen(None),
                                           DeviceIntSize::zero(),
                                           false,
                                           share_group,
                                           self.extensions.clone(),
                                           self.stats.clone())))
    }
}
