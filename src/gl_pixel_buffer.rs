/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Texture backed pixel buffers.
//!
//! Every call goes through `gleam` and needs a real GL context current on the
//! calling thread. The headless contexts in `crate::headless` do not provide
//! one, so this module is only exercised by embedders running on a GPU. The
//! scroll rectangle math it relies on is shared with the software buffer and
//! tested there.

use byteorder::{ByteOrder, LittleEndian};
use crate::pixel_buffer::{scroll_source_rect, PixelBuffer, PixelBufferAllocator};
use crate::shared_memory::MappedBitmap;
use crate::types::{size_is_empty, DeviceIntRect, DeviceIntSize, DeviceIntVector2D, BYTES_PER_PIXEL};
use gleam::gl;
use std::rc::Rc;

#[cfg(not(any(target_os = "android", target_os = "gonk")))]
const GL_FORMAT_BGRA: gl::GLuint = gl::BGRA;

#[cfg(any(target_os = "android", target_os = "gonk"))]
const GL_FORMAT_BGRA: gl::GLuint = gl::BGRA_EXT;

/// A backing store kept in a texture, with a framebuffer attached so it can
/// be read back.
pub struct GlPixelBuffer {
    gl: Rc<dyn gl::Gl>,
    texture: gl::GLuint,
    fbo: gl::GLuint,
    size: DeviceIntSize,
}

impl GlPixelBuffer {
    /// The caller must have made a context current.
    pub fn new(gl: Rc<dyn gl::Gl>, size: DeviceIntSize) -> Option<GlPixelBuffer> {
        if size_is_empty(&size) {
            return None;
        }

        let texture = gl.gen_textures(1)[0];
        gl.bind_texture(gl::TEXTURE_2D, texture);
        gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as gl::GLint);
        gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as gl::GLint);
        gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as gl::GLint);
        gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as gl::GLint);
        gl.tex_image_2d(gl::TEXTURE_2D,
                        0,
                        gl::RGBA as gl::GLint,
                        size.width, size.height,
                        0,
                        GL_FORMAT_BGRA,
                        gl::UNSIGNED_BYTE,
                        None);

        let fbo = gl.gen_framebuffers(1)[0];
        gl.bind_framebuffer(gl::FRAMEBUFFER, fbo);
        gl.framebuffer_texture_2d(gl::FRAMEBUFFER,
                                  gl::COLOR_ATTACHMENT0,
                                  gl::TEXTURE_2D,
                                  texture,
                                  0);
        let status = gl.check_frame_buffer_status(gl::FRAMEBUFFER);
        gl.bind_framebuffer(gl::FRAMEBUFFER, 0);

        let error = gl.get_error();
        if error != gl::NO_ERROR || status != gl::FRAMEBUFFER_COMPLETE {
            warn!("texture backing store {:?} failed: error 0x{:x} status 0x{:x}",
                  size, error, status);
            gl.delete_framebuffers(&[fbo]);
            gl.delete_textures(&[texture]);
            return None;
        }

        Some(GlPixelBuffer { gl, texture, fbo, size })
    }

    pub fn texture(&self) -> gl::GLuint {
        self.texture
    }

    fn upload(&self, rect: &DeviceIntRect, pixels: &[u32]) {
        let mut bytes = vec![0; pixels.len() * BYTES_PER_PIXEL];
        LittleEndian::write_u32_into(pixels, &mut bytes);
        self.gl.bind_texture(gl::TEXTURE_2D, self.texture);
        self.gl.tex_sub_image_2d(gl::TEXTURE_2D,
                                 0,
                                 rect.min_x(), rect.min_y(),
                                 rect.size.width, rect.size.height,
                                 GL_FORMAT_BGRA,
                                 gl::UNSIGNED_BYTE,
                                 &bytes);
    }
}

impl PixelBuffer for GlPixelBuffer {
    fn size(&self) -> DeviceIntSize {
        self.size
    }

    fn blit(&mut self, source: &MappedBitmap, rect: &DeviceIntRect) {
        let width = rect.size.width as usize;
        let mut pixels = vec![0; width * rect.size.height as usize];
        for (row, y) in pixels.chunks_mut(width).zip(rect.min_y() .. rect.max_y()) {
            source.read_row(rect.min_x(), y, row);
        }
        self.upload(rect, &pixels);
    }

    fn scroll(&mut self, delta: DeviceIntVector2D, clip_rect: &DeviceIntRect) {
        if let Some(src_rect) = scroll_source_rect(delta, clip_rect) {
            let pixels = self.read_pixels(&src_rect);
            self.upload(&src_rect.translate(delta), &pixels);
        }
    }

    fn read_pixels(&self, rect: &DeviceIntRect) -> Vec<u32> {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.fbo);
        let bytes = self.gl.read_pixels(rect.min_x(), rect.min_y(),
                                        rect.size.width, rect.size.height,
                                        GL_FORMAT_BGRA,
                                        gl::UNSIGNED_BYTE);
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, 0);

        let mut pixels = vec![0; bytes.len() / BYTES_PER_PIXEL];
        LittleEndian::read_u32_into(&bytes[.. pixels.len() * BYTES_PER_PIXEL], &mut pixels);
        pixels
    }
}

impl Drop for GlPixelBuffer {
    fn drop(&mut self) {
        self.gl.delete_framebuffers(&[self.fbo]);
        self.gl.delete_textures(&[self.texture]);
    }
}

/// Hands out texture backed stores on the context `gl` belongs to.
pub struct GlAllocator {
    gl: Rc<dyn gl::Gl>,
}

impl GlAllocator {
    pub fn new(gl: Rc<dyn gl::Gl>) -> GlAllocator {
        GlAllocator { gl }
    }
}

impl PixelBufferAllocator for GlAllocator {
    fn allocate(&self, size: DeviceIntSize) -> Option<Box<dyn PixelBuffer>> {
        GlPixelBuffer::new(self.gl.clone(), size).map(|buffer| Box::new(buffer) as Box<dyn PixelBuffer>)
    }
}
