/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::command_buffer::{CommandBufferEntry, CommandId, ParseError};
use crate::gl_context::{ContextAttribs, ContextError, GLContext};
use crate::types::{size_is_empty, DeviceIntSize};
use euclid::size2;
use fnv::{FnvHashMap, FnvHashSet};
use gleam::gl::GLuint;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    AlreadyInitialized,
    NotInitialized,
    Context(ContextError),
    /// Offscreen surfaces need a non-empty size.
    InvalidSize,
    /// The parent decoder went away before the child was done with it.
    ParentLost,
    /// The context has no texture the parent could share.
    NoBackingTexture,
    InvalidParentTexture(GLuint),
    /// The parent already maps this texture id to another child.
    ParentTextureInUse(GLuint),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecoderError::AlreadyInitialized => write!(f, "decoder already initialized"),
            DecoderError::NotInitialized => write!(f, "decoder not initialized"),
            DecoderError::Context(ref err) => write!(f, "{}", err),
            DecoderError::InvalidSize => write!(f, "invalid offscreen size"),
            DecoderError::ParentLost => write!(f, "parent decoder was destroyed"),
            DecoderError::NoBackingTexture => write!(f, "context has no backing texture"),
            DecoderError::InvalidParentTexture(id) => write!(f, "invalid parent texture {}", id),
            DecoderError::ParentTextureInUse(id) => write!(f, "parent texture {} already in use", id),
        }
    }
}

impl std::error::Error for DecoderError {}

impl From<ContextError> for DecoderError {
    fn from(err: ContextError) -> DecoderError {
        DecoderError::Context(err)
    }
}

pub type DecoderResult<T> = Result<T, DecoderError>;

/// What the scheduler has to do after a command was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Continue,
    SetToken(i32),
    /// The scheduler runs its swap callback, then `Decoder::swap_buffers`.
    SwapBuffers,
}

/// Interprets command buffer contents against one GL context.
pub trait Decoder {
    /// Take ownership of `context` and make the decoder ready to execute
    /// commands. On failure the context is destroyed and the decoder stays
    /// uninitialized.
    fn initialize(&mut self,
                  context: Box<dyn GLContext>,
                  size: DeviceIntSize,
                  disallowed_extensions: &str,
                  allowed_extensions: &str,
                  attribs: &ContextAttribs,
                  parent: Option<Weak<RefCell<dyn Decoder>>>,
                  parent_texture_id: GLuint) -> DecoderResult<()>;

    /// Release the context and any texture shared with a parent.
    fn destroy(&mut self);

    fn gl_context(&self) -> Option<&dyn GLContext>;

    fn resize_offscreen(&mut self, size: DeviceIntSize) -> DecoderResult<()>;
    fn swap_buffers(&mut self) -> DecoderResult<()>;

    fn do_command(&mut self,
                  command: u32,
                  args: &[CommandBufferEntry]) -> Result<CommandAction, ParseError>;

    /// Parent side of texture sharing: make `client_id` name the child's
    /// `service_id` texture.
    fn register_shared_texture(&mut self, client_id: GLuint, service_id: GLuint) -> DecoderResult<()>;
    fn unregister_shared_texture(&mut self, client_id: GLuint);
    fn shared_texture(&self, client_id: GLuint) -> Option<GLuint>;
}

/// The extensions a client gets to see: those the driver reports, limited to
/// `allowed` (`"*"` allows everything) and minus `disallowed`. Both lists are
/// whitespace separated.
pub fn filter_extensions(available: &str, allowed: &str, disallowed: &str) -> Vec<String> {
    let allow_all = allowed.trim() == "*";
    let allowed: FnvHashSet<&str> = allowed.split_whitespace().collect();
    let disallowed: FnvHashSet<&str> = disallowed.split_whitespace().collect();
    available
        .split_whitespace()
        .filter(|name| allow_all || allowed.contains(name))
        .filter(|name| !disallowed.contains(name))
        .map(|name| name.to_owned())
        .collect()
}

struct ParentLink {
    decoder: Weak<RefCell<dyn Decoder>>,
    texture_id: GLuint,
}

impl ParentLink {
    /// The parent decoder, as long as it is alive, initialized and still maps
    /// `texture_id` to `texture`. A parent that was destroyed (and possibly
    /// initialized again) no longer knows about this child.
    fn live_parent(&self, texture: Option<GLuint>) -> Option<Rc<RefCell<dyn Decoder>>> {
        let parent = self.decoder.upgrade()?;
        let bound = {
            let decoder = parent.borrow();
            decoder.gl_context().is_some() &&
                texture.is_some() &&
                decoder.shared_texture(self.texture_id) == texture
        };
        if bound {
            Some(parent)
        } else {
            None
        }
    }
}

pub struct Gles2Decoder {
    context: Option<Box<dyn GLContext>>,
    extensions: Vec<String>,
    attribs: ContextAttribs,
    parent: Option<ParentLink>,
    /// Client texture ids of this decoder that alias a child's backing texture.
    shared_textures: FnvHashMap<GLuint, GLuint>,
}

impl Default for Gles2Decoder {
    fn default() -> Gles2Decoder {
        Gles2Decoder::new()
    }
}

impl Gles2Decoder {
    pub fn new() -> Gles2Decoder {
        Gles2Decoder {
            context: None,
            extensions: Vec::new(),
            attribs: ContextAttribs::default(),
            parent: None,
            shared_textures: FnvHashMap::default(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }

    pub fn attribs(&self) -> &ContextAttribs {
        &self.attribs
    }

    fn bind_context(context: &mut dyn GLContext, size: DeviceIntSize) -> DecoderResult<()> {
        context.make_current()?;
        if context.is_offscreen() {
            if size_is_empty(&size) {
                return Err(DecoderError::InvalidSize);
            }
            context.resize(size)?;
        }
        Ok(())
    }

    fn link_parent(context: &dyn GLContext,
                   parent: &Weak<RefCell<dyn Decoder>>,
                   parent_texture_id: GLuint) -> DecoderResult<()> {
        let parent = parent.upgrade().ok_or(DecoderError::ParentLost)?;
        if parent_texture_id == 0 {
            return Err(DecoderError::InvalidParentTexture(parent_texture_id));
        }
        let texture = context.backing_texture().ok_or(DecoderError::NoBackingTexture)?;
        let result = parent.borrow_mut().register_shared_texture(parent_texture_id, texture);
        result
    }
}

impl Decoder for Gles2Decoder {
    fn initialize(&mut self,
                  mut context: Box<dyn GLContext>,
                  size: DeviceIntSize,
                  disallowed_extensions: &str,
                  allowed_extensions: &str,
                  attribs: &ContextAttribs,
                  parent: Option<Weak<RefCell<dyn Decoder>>>,
                  parent_texture_id: GLuint) -> DecoderResult<()> {
        if self.context.is_some() {
            context.destroy();
            return Err(DecoderError::AlreadyInitialized);
        }

        let mut result = Gles2Decoder::bind_context(&mut *context, size);
        if let (true, Some(parent)) = (result.is_ok(), parent.as_ref()) {
            result = Gles2Decoder::link_parent(&*context, parent, parent_texture_id);
        }
        if let Err(err) = result {
            error!("decoder initialization failed: {}", err);
            context.destroy();
            return Err(err);
        }

        self.extensions = filter_extensions(&context.extensions(),
                                            allowed_extensions,
                                            disallowed_extensions);
        self.attribs = *attribs;
        self.parent = parent.map(|decoder| ParentLink { decoder, texture_id: parent_texture_id });
        self.context = Some(context);
        debug!("decoder ready with {} extensions", self.extensions.len());
        Ok(())
    }

    fn destroy(&mut self) {
        let texture = self.context.as_ref().and_then(|context| context.backing_texture());
        if let Some(link) = self.parent.take() {
            if let Some(parent) = link.live_parent(texture) {
                parent.borrow_mut().unregister_shared_texture(link.texture_id);
            }
        }
        if let Some(mut context) = self.context.take() {
            context.destroy();
        }
        self.extensions.clear();
        if !self.shared_textures.is_empty() {
            debug!("releasing {} textures shared by children", self.shared_textures.len());
            self.shared_textures.clear();
        }
    }

    fn gl_context(&self) -> Option<&dyn GLContext> {
        self.context.as_deref()
    }

    fn resize_offscreen(&mut self, size: DeviceIntSize) -> DecoderResult<()> {
        let context = self.context.as_mut().ok_or(DecoderError::NotInitialized)?;
        if !context.is_offscreen() {
            return Err(DecoderError::Context(ContextError::NotOffscreen));
        }
        if size_is_empty(&size) {
            return Err(DecoderError::InvalidSize);
        }
        let old_texture = context.backing_texture();
        context.make_current()?;
        context.resize(size)?;

        // The parent keeps its texture id, now naming the new color buffer.
        let texture = context.backing_texture();
        let mut parent_gone = false;
        if let Some(ref link) = self.parent {
            match link.live_parent(old_texture) {
                Some(parent) => {
                    let texture = texture.ok_or(DecoderError::NoBackingTexture)?;
                    let mut parent = parent.borrow_mut();
                    parent.unregister_shared_texture(link.texture_id);
                    parent.register_shared_texture(link.texture_id, texture)?;
                }
                None => parent_gone = true,
            }
        }
        if parent_gone {
            debug!("parent decoder is gone or was reset, dropping texture link");
            self.parent = None;
        }
        Ok(())
    }

    fn swap_buffers(&mut self) -> DecoderResult<()> {
        let context = self.context.as_mut().ok_or(DecoderError::NotInitialized)?;
        context.make_current()?;
        context.swap_buffers()?;
        Ok(())
    }

    fn do_command(&mut self,
                  command: u32,
                  args: &[CommandBufferEntry]) -> Result<CommandAction, ParseError> {
        let id = CommandId::from_u32(command).ok_or(ParseError::UnknownCommand(command))?;
        match id {
            CommandId::Noop => Ok(CommandAction::Continue),
            CommandId::SetToken => match *args {
                [token] => Ok(CommandAction::SetToken(token as i32)),
                _ => Err(ParseError::InvalidArguments),
            },
            CommandId::SwapBuffers => {
                if !args.is_empty() {
                    return Err(ParseError::InvalidArguments);
                }
                if self.context.is_none() {
                    return Err(ParseError::ContextLost);
                }
                Ok(CommandAction::SwapBuffers)
            }
            CommandId::ResizeOffscreen => {
                let size = match *args {
                    [width, height] => size2(width as i32, height as i32),
                    _ => return Err(ParseError::InvalidArguments),
                };
                match self.resize_offscreen(size) {
                    Ok(()) => Ok(CommandAction::Continue),
                    Err(DecoderError::NotInitialized) => Err(ParseError::ContextLost),
                    Err(err) => {
                        warn!("resize to {:?} failed: {}", size, err);
                        Err(ParseError::InvalidArguments)
                    }
                }
            }
        }
    }

    fn register_shared_texture(&mut self, client_id: GLuint, service_id: GLuint) -> DecoderResult<()> {
        if self.context.is_none() {
            return Err(DecoderError::NotInitialized);
        }
        if self.shared_textures.contains_key(&client_id) {
            return Err(DecoderError::ParentTextureInUse(client_id));
        }
        self.shared_textures.insert(client_id, service_id);
        Ok(())
    }

    fn unregister_shared_texture(&mut self, client_id: GLuint) {
        self.shared_textures.remove(&client_id);
    }

    fn shared_texture(&self, client_id: GLuint) -> Option<GLuint> {
        self.shared_textures.get(&client_id).cloned()
    }
}
