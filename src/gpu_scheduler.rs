/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Binds a command buffer to a decoder and the GL context it renders with.
//!
//! A scheduler may be parented to another one. The child then renders into
//! an offscreen context in the parent's share group, and its color buffer
//! shows up in the parent decoder under `parent_texture_id`. The child only
//! holds a weak link to the parent decoder: destroying the parent first is
//! allowed, the child then stops updating the shared texture.

use crate::command_buffer::{CommandBuffer, CommandBufferState, ParseError};
use crate::decoder::{CommandAction, Decoder, DecoderError, Gles2Decoder};
use crate::gl_context::{ContextAttribs, ContextError, GLContextFactory, NativeWindow};
use crate::types::DeviceIntSize;
use gleam::gl::GLuint;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    AlreadyInitialized,
    Context(ContextError),
    /// The parent scheduler was never initialized or has been destroyed.
    ParentHasNoContext,
    /// A context bound to a window cannot share the parent's namespace.
    ViewContextWithParent,
    ContextCreationFailed,
    Decoder(DecoderError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SchedulerError::AlreadyInitialized => write!(f, "scheduler already initialized"),
            SchedulerError::Context(ref err) => write!(f, "{}", err),
            SchedulerError::ParentHasNoContext => write!(f, "parent scheduler has no GL context"),
            SchedulerError::ViewContextWithParent => {
                write!(f, "a view context cannot share textures with a parent")
            }
            SchedulerError::ContextCreationFailed => write!(f, "could not create GL context"),
            SchedulerError::Decoder(ref err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for SchedulerError {}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

pub struct GpuScheduler {
    command_buffer: CommandBuffer,
    decoder: Rc<RefCell<dyn Decoder>>,
    factory: Rc<dyn GLContextFactory>,
    swap_buffers_callback: Option<Box<dyn FnMut()>>,
    destroyed: bool,
}

impl GpuScheduler {
    pub fn new(command_buffer: CommandBuffer, factory: Rc<dyn GLContextFactory>) -> GpuScheduler {
        GpuScheduler::with_decoder(command_buffer,
                                   Rc::new(RefCell::new(Gles2Decoder::new())),
                                   factory)
    }

    pub fn with_decoder(command_buffer: CommandBuffer,
                        decoder: Rc<RefCell<dyn Decoder>>,
                        factory: Rc<dyn GLContextFactory>) -> GpuScheduler {
        GpuScheduler {
            command_buffer,
            decoder,
            factory,
            swap_buffers_callback: None,
            destroyed: false,
        }
    }

    /// Create the GL context and bring the decoder up.
    ///
    /// With a `window` the context renders to it, otherwise it is offscreen
    /// at `size`, in the share group of `parent` if one is given. `attribs`
    /// is a key/value list terminated by `ATTRIB_NONE`. Nothing is kept if
    /// any step fails.
    pub fn initialize(&mut self,
                      window: Option<NativeWindow>,
                      size: DeviceIntSize,
                      disallowed_extensions: &str,
                      allowed_extensions: &str,
                      attribs: &[i32],
                      parent: Option<&GpuScheduler>,
                      parent_texture_id: GLuint) -> SchedulerResult<()> {
        if self.decoder.borrow().gl_context().is_some() {
            return Err(SchedulerError::AlreadyInitialized);
        }
        let attribs = ContextAttribs::parse(attribs).map_err(SchedulerError::Context)?;

        let parent = match parent {
            Some(parent) => {
                let share_group = parent.decoder.borrow().gl_context().map(|context| {
                    context.share_group()
                });
                match share_group {
                    Some(share_group) => Some((Rc::downgrade(&parent.decoder), share_group)),
                    None => {
                        error!("parent scheduler has no GL context");
                        return Err(SchedulerError::ParentHasNoContext);
                    }
                }
            }
            None => None,
        };

        let context = match window {
            Some(window) => {
                if parent.is_some() {
                    error!("view context for {:?} requested with a parent", window);
                    return Err(SchedulerError::ViewContextWithParent);
                }
                self.factory.create_view_context(window, attribs.multisampled())
            }
            None => {
                let share_group = parent.as_ref().map(|&(_, ref share_group)| share_group);
                self.factory.create_offscreen_context(share_group)
            }
        };
        let context = match context {
            Some(context) => context,
            None => {
                error!("GL context creation failed (window {:?})", window);
                return Err(SchedulerError::ContextCreationFailed);
            }
        };

        self.decoder
            .borrow_mut()
            .initialize(context,
                        size,
                        disallowed_extensions,
                        allowed_extensions,
                        &attribs,
                        parent.map(|(decoder, _)| decoder),
                        parent_texture_id)
            .map_err(SchedulerError::Decoder)?;
        self.destroyed = false;
        Ok(())
    }

    /// Tear down the decoder and its context.
    pub fn destroy(&mut self) {
        if self.destroyed {
            warn!("scheduler destroyed twice");
            return;
        }
        self.decoder.borrow_mut().destroy();
        self.destroyed = true;
    }

    pub fn decoder(&self) -> Rc<RefCell<dyn Decoder>> {
        self.decoder.clone()
    }

    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    pub fn set_swap_buffers_callback<F>(&mut self, callback: F) where F: FnMut() + 'static {
        self.swap_buffers_callback = Some(Box::new(callback));
    }

    pub fn will_swap_buffers(&mut self) {
        if let Some(ref mut callback) = self.swap_buffers_callback {
            callback();
        }
    }

    pub fn resize_offscreen_frame_buffer(&mut self, size: DeviceIntSize) -> SchedulerResult<()> {
        self.decoder.borrow_mut().resize_offscreen(size).map_err(SchedulerError::Decoder)
    }

    /// Run every command between the get offset and `put_offset`. The first
    /// parse error is latched and stops all further processing.
    pub fn put_changed(&mut self, put_offset: u32) -> CommandBufferState {
        if self.command_buffer.state().error.is_some() {
            return self.command_buffer.state();
        }
        if let Err(err) = self.command_buffer.set_put_offset(put_offset) {
            self.fail(err);
            return self.command_buffer.state();
        }

        while !self.command_buffer.is_empty() {
            let result = match self.command_buffer.peek() {
                Ok((header, args)) => {
                    self.decoder
                        .borrow_mut()
                        .do_command(header.command, args)
                        .map(|action| (header.size, action))
                }
                Err(err) => Err(err),
            };
            let (size, action) = match result {
                Ok(decoded) => decoded,
                Err(err) => {
                    self.fail(err);
                    break;
                }
            };
            self.command_buffer.advance(size);

            match action {
                CommandAction::Continue => {}
                CommandAction::SetToken(token) => self.command_buffer.set_token(token),
                CommandAction::SwapBuffers => {
                    self.will_swap_buffers();
                    let swapped = self.decoder.borrow_mut().swap_buffers();
                    if let Err(err) = swapped {
                        warn!("swap failed: {}", err);
                        self.fail(ParseError::ContextLost);
                        break;
                    }
                }
            }
        }
        self.command_buffer.state()
    }

    fn fail(&mut self, err: ParseError) {
        warn!("command buffer error at {}: {}", self.command_buffer.state().get_offset, err);
        self.command_buffer.set_parse_error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::CommandId;
    use crate::headless::HeadlessContextFactory;
    use euclid::size2;
    use std::cell::Cell;

    fn offscreen(factory: &Rc<HeadlessContextFactory>) -> GpuScheduler {
        let mut scheduler = GpuScheduler::new(CommandBuffer::new(32), factory.clone());
        scheduler.initialize(None, size2(64, 64), "", "*", &[], None, 0).unwrap();
        scheduler
    }

    #[test]
    fn tokens_and_swaps() {
        let factory = Rc::new(HeadlessContextFactory::new(size2(100, 100)));
        let mut scheduler = offscreen(&factory);
        let swaps = Rc::new(Cell::new(0));
        let counter = swaps.clone();
        scheduler.set_swap_buffers_callback(move || counter.set(counter.get() + 1));

        let buffer = scheduler.command_buffer_mut();
        assert!(buffer.push(CommandId::SetToken, &[7]));
        assert!(buffer.push(CommandId::SwapBuffers, &[]));
        assert!(buffer.push(CommandId::SwapBuffers, &[]));
        let put = buffer.write_offset();

        let state = scheduler.put_changed(put);
        assert_eq!(state.token, 7);
        assert_eq!(state.get_offset, put);
        assert_eq!(state.error, None);
        assert_eq!(swaps.get(), 2);
        assert_eq!(factory.stats().swaps.get(), 2);
        scheduler.destroy();
    }

    #[test]
    fn parse_errors_latch() {
        let factory = Rc::new(HeadlessContextFactory::new(size2(100, 100)));
        let mut scheduler = offscreen(&factory);
        let buffer = scheduler.command_buffer_mut();
        assert!(buffer.push(CommandId::SetToken, &[1, 2]));
        assert!(buffer.push(CommandId::SetToken, &[3]));
        let put = buffer.write_offset();

        let state = scheduler.put_changed(put);
        assert_eq!(state.error, Some(ParseError::InvalidArguments));
        assert_eq!(state.get_offset, 0);
        assert_eq!(state.token, 0);

        // Nothing moves once an error is latched.
        let state = scheduler.put_changed(put);
        assert_eq!(state.get_offset, 0);
        scheduler.destroy();
    }

    #[test]
    fn put_offset_out_of_range() {
        let factory = Rc::new(HeadlessContextFactory::new(size2(100, 100)));
        let mut scheduler = offscreen(&factory);
        let state = scheduler.put_changed(32);
        assert_eq!(state.error, Some(ParseError::OutOfBounds));
        scheduler.destroy();
    }

    #[test]
    fn resize_command() {
        let factory = Rc::new(HeadlessContextFactory::new(size2(100, 100)));
        let mut scheduler = offscreen(&factory);
        let buffer = scheduler.command_buffer_mut();
        assert!(buffer.push(CommandId::ResizeOffscreen, &[128, 96]));
        let put = buffer.write_offset();
        assert_eq!(scheduler.put_changed(put).error, None);
        assert_eq!(scheduler.decoder().borrow().gl_context().unwrap().size(), size2(128, 96));
        scheduler.destroy();
    }

    #[test]
    fn destroy_twice_is_harmless() {
        let factory = Rc::new(HeadlessContextFactory::new(size2(100, 100)));
        let mut scheduler = offscreen(&factory);
        scheduler.destroy();
        scheduler.destroy();
        assert_eq!(factory.stats().contexts_destroyed.get(), 1);
    }
}
