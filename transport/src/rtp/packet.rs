//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::{convert::TryInto, ops::Range};

use thiserror::Error;

use super::RtpHeader;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum PacketError {
    #[error("packet region {offset}+{length} exceeds buffer of {buffer_len} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        buffer_len: usize,
    },
    #[error("packet of {actual} bytes is shorter than the required {required}")]
    TooShort { actual: usize, required: usize },
}

/// A datagram as it moves through the transform chain: a byte buffer plus the
/// `offset` and `length` of the packet inside it.
///
/// All accessors take positions relative to `offset`. Accessors panic when the
/// position is outside of the packet; callers check `len()` first, or use the
/// `get_*` variants when the input is untrusted.
#[derive(Clone, PartialEq, Eq)]
pub struct RawPacket {
    buffer: Vec<u8>,
    offset: usize,
    length: usize,
}

impl RawPacket {
    /// Wraps `buffer` without copying it.
    pub fn new(buffer: Vec<u8>, offset: usize, length: usize) -> Result<Self, PacketError> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                offset,
                length,
            }),
            _ => Err(PacketError::OutOfBounds {
                offset,
                length,
                buffer_len: buffer.len(),
            }),
        }
    }

    /// The whole backing buffer, including bytes outside of this packet.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.range()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let range = self.range();
        &mut self.buffer[range]
    }

    /// Gives back the backing buffer, e.g. to reuse it for the next receive.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Copies out just the bytes of this packet.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    pub fn read_u8(&self, at: usize) -> u8 {
        self.read_region(at, 1)[0]
    }

    pub fn read_u16(&self, at: usize) -> u16 {
        u16::from_be_bytes(self.read_region(at, 2).try_into().unwrap())
    }

    pub fn read_u32(&self, at: usize) -> u32 {
        u32::from_be_bytes(self.read_region(at, 4).try_into().unwrap())
    }

    pub fn get_u8(&self, at: usize) -> Option<u8> {
        self.as_slice().get(at).copied()
    }

    pub fn get_u16(&self, at: usize) -> Option<u16> {
        let bytes = self.as_slice().get(at..at.checked_add(2)?)?;
        Some(u16::from_be_bytes(bytes.try_into().ok()?))
    }

    pub fn get_u32(&self, at: usize) -> Option<u32> {
        let bytes = self.as_slice().get(at..at.checked_add(4)?)?;
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    }

    pub fn write_u8(&mut self, at: usize, value: u8) {
        self.region_mut(at, 1)[0] = value;
    }

    pub fn write_u16(&mut self, at: usize, value: u16) {
        self.region_mut(at, 2).copy_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, at: usize, value: u32) {
        self.region_mut(at, 4).copy_from_slice(&value.to_be_bytes());
    }

    pub fn read_region(&self, at: usize, len: usize) -> &[u8] {
        let range = self.region_range(at, len);
        &self.buffer[range]
    }

    pub fn region_mut(&mut self, at: usize, len: usize) -> &mut [u8] {
        let range = self.region_range(at, len);
        &mut self.buffer[range]
    }

    /// Extends the packet by `extra` zeroed bytes at its end. The backing
    /// buffer is reallocated only if there isn't room after the packet.
    /// Everything before the old end keeps its position relative to `offset`.
    pub fn grow(&mut self, extra: usize) {
        let old_end = self.offset + self.length;
        let new_end = old_end + extra;
        if new_end > self.buffer.len() {
            self.buffer.resize(new_end, 0);
        }
        self.buffer[old_end..new_end].fill(0);
        self.length += extra;
    }

    /// Shortens the packet to `length` bytes. Does nothing if it's already shorter.
    pub fn truncate(&mut self, length: usize) {
        self.length = self.length.min(length);
    }

    pub fn rtp_header(&self) -> Option<RtpHeader> {
        RtpHeader::parse(self.as_slice())
    }

    fn range(&self) -> Range<usize> {
        self.offset..(self.offset + self.length)
    }

    fn region_range(&self, at: usize, len: usize) -> Range<usize> {
        assert!(
            at + len <= self.length,
            "access to {}..{} outside of packet of {} bytes",
            at,
            at + len,
            self.length
        );
        (self.offset + at)..(self.offset + at + len)
    }
}

impl From<Vec<u8>> for RawPacket {
    fn from(buffer: Vec<u8>) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            offset: 0,
            length,
        }
    }
}

impl std::fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = &self.as_slice()[..self.length.min(32)];
        write!(
            f,
            "RawPacket {{ offset: {}, length: {}, data: {}{} }}",
            self.offset,
            self.length,
            hex::encode(shown),
            if self.length > shown.len() { "..." } else { "" }
        )
    }
}
