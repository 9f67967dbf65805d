/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The ring of 32-bit entries a client fills with commands and the GPU
//! scheduler drains.
//!
//! Every command starts with a header entry: the low 21 bits hold the size
//! of the command in entries (header included), the high 11 bits the
//! command id.

use std::fmt;

pub type CommandBufferEntry = u32;

const SIZE_BITS: u32 = 21;
const SIZE_MASK: u32 = (1 << SIZE_BITS) - 1;
pub const MAX_COMMAND_SIZE: u32 = SIZE_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Noop = 0,
    SetToken = 1,
    SwapBuffers = 256,
    ResizeOffscreen = 257,
}

impl CommandId {
    pub fn from_u32(id: u32) -> Option<CommandId> {
        match id {
            0 => Some(CommandId::Noop),
            1 => Some(CommandId::SetToken),
            256 => Some(CommandId::SwapBuffers),
            257 => Some(CommandId::ResizeOffscreen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub size: u32,
    pub command: u32,
}

impl CommandHeader {
    pub fn new(command: CommandId, size: u32) -> CommandHeader {
        debug_assert!(size <= MAX_COMMAND_SIZE);
        CommandHeader { size, command: command as u32 }
    }

    pub fn encode(&self) -> CommandBufferEntry {
        (self.command << SIZE_BITS) | (self.size & SIZE_MASK)
    }

    pub fn decode(entry: CommandBufferEntry) -> CommandHeader {
        CommandHeader {
            size: entry & SIZE_MASK,
            command: entry >> SIZE_BITS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A header announced a size of zero.
    InvalidSize,
    /// A command would run past the end of the buffer.
    OutOfBounds,
    UnknownCommand(u32),
    InvalidArguments,
    /// The decoder has no usable context.
    ContextLost,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseError::InvalidSize => write!(f, "command with invalid size"),
            ParseError::OutOfBounds => write!(f, "command runs past the end of the buffer"),
            ParseError::UnknownCommand(id) => write!(f, "unknown command {}", id),
            ParseError::InvalidArguments => write!(f, "invalid command arguments"),
            ParseError::ContextLost => write!(f, "context lost"),
        }
    }
}

impl std::error::Error for ParseError {}

/// What both sides of the buffer know about its progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBufferState {
    pub num_entries: u32,
    pub get_offset: u32,
    pub put_offset: u32,
    pub token: i32,
    /// Latched by the first parse error; nothing is processed afterwards.
    pub error: Option<ParseError>,
}

pub struct CommandBuffer {
    entries: Vec<CommandBufferEntry>,
    /// Where the client writes its next command. Only published to the
    /// service side through `put_changed`.
    write_offset: u32,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub fn new(num_entries: u32) -> CommandBuffer {
        debug_assert!(num_entries > 0);
        CommandBuffer {
            entries: vec![0; num_entries as usize],
            write_offset: 0,
            state: CommandBufferState {
                num_entries,
                get_offset: 0,
                put_offset: 0,
                token: 0,
                error: None,
            },
        }
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }

    fn num_entries(&self) -> u32 {
        self.state.num_entries
    }

    /// Entries the client may still write without overtaking the reader.
    fn free_entries(&self) -> u32 {
        let n = self.num_entries();
        (self.state.get_offset + n - self.write_offset - 1) % n
    }

    /// Append a command, wrapping around with a `Noop` filler when it does
    /// not fit before the end of the ring. Returns `false` if there is not
    /// enough room.
    pub fn push(&mut self, command: CommandId, args: &[CommandBufferEntry]) -> bool {
        let size = args.len() as u32 + 1;
        let to_end = self.num_entries() - self.write_offset;
        let needed = if size > to_end { size + to_end } else { size };
        if size > MAX_COMMAND_SIZE || needed > self.free_entries() {
            return false;
        }

        if size > to_end {
            let filler = CommandHeader::new(CommandId::Noop, to_end);
            self.entries[self.write_offset as usize] = filler.encode();
            self.write_offset = 0;
        }

        let start = self.write_offset as usize;
        self.entries[start] = CommandHeader::new(command, size).encode();
        self.entries[start + 1 .. start + size as usize].copy_from_slice(args);
        self.write_offset = (self.write_offset + size) % self.num_entries();
        true
    }

    pub(crate) fn set_put_offset(&mut self, put_offset: u32) -> Result<(), ParseError> {
        if put_offset >= self.num_entries() {
            return Err(ParseError::OutOfBounds);
        }
        self.state.put_offset = put_offset;
        Ok(())
    }

    pub(crate) fn set_token(&mut self, token: i32) {
        self.state.token = token;
    }

    pub(crate) fn set_parse_error(&mut self, error: ParseError) {
        if self.state.error.is_none() {
            self.state.error = Some(error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.get_offset == self.state.put_offset
    }

    /// Decode the command at the get offset without consuming it. A command
    /// may neither cross the put offset nor the end of the ring.
    pub(crate) fn peek(&self) -> Result<(CommandHeader, &[CommandBufferEntry]), ParseError> {
        let get = self.state.get_offset as usize;
        let put = self.state.put_offset as usize;
        let header = CommandHeader::decode(self.entries[get]);
        if header.size == 0 {
            return Err(ParseError::InvalidSize);
        }
        let end = get + header.size as usize;
        let limit = if put > get { put } else { self.entries.len() };
        if end > limit {
            return Err(ParseError::OutOfBounds);
        }
        Ok((header, &self.entries[get + 1 .. end]))
    }

    pub(crate) fn advance(&mut self, size: u32) {
        self.state.get_offset = (self.state.get_offset + size) % self.num_entries();
    }
}
