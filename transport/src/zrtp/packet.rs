//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::borrow::{Borrow, BorrowMut};

use crc::{Crc, CRC_32_ISCSI};

use crate::rtp::{PacketError, RawPacket, Ssrc};

// See https://tools.ietf.org/html/rfc6189#section-5
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |0 0 0 1|Not Used (set to zero) |         Sequence Number       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                 Magic Cookie 'ZRTP' (0x5a525450)              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Source Identifier                      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           ZRTP Message (length depends on Message Type)       |
// |                            . . .                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          CRC (1 word)                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
pub const ZRTP_MARKER: u8 = 0x10;
pub const ZRTP_MAGIC: [u8; 4] = *b"ZRTP";
pub const ZRTP_PACKET_HEADER_LEN: usize = 12;
pub const ZRTP_CRC_LEN: usize = 4;
pub const ZRTP_MIN_PACKET_LEN: usize = ZRTP_PACKET_HEADER_LEN + ZRTP_CRC_LEN;
const ZRTP_SEQNUM_OFFSET: usize = 2;
const ZRTP_MAGIC_OFFSET: usize = 4;
const ZRTP_SSRC_OFFSET: usize = 8;

pub const ZRTP_MESSAGE_PREAMBLE: u16 = 0x505a;
pub const ZRTP_MESSAGE_HEADER_LEN: usize = 12;

// Castagnoli, as RFC 6189 section 5 requires.
const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// The ZRTP packet checksum of `covered`, in the byte order it goes on the wire.
///
/// libzrtp stores the CRC byte-swapped relative to network order, and every
/// deployed peer expects that, so the trailer holds the little-endian bytes.
pub fn zrtp_crc(covered: &[u8]) -> [u8; ZRTP_CRC_LEN] {
    CRC32C.checksum(covered).to_le_bytes()
}

/// A ZRTP view over a [`RawPacket`], which can be borrowed, mutably borrowed
/// or owned.
///
/// The checks (`is_zrtp_packet`, `has_magic`, `check_crc`) are safe on any
/// input and simply answer false for packets too short to be ZRTP. The setters
/// expect a packet of at least [`ZRTP_MIN_PACKET_LEN`] bytes and panic
/// otherwise.
#[derive(Debug, Clone)]
pub struct ZrtpRawPacket<T> {
    packet: T,
}

impl<T: Borrow<RawPacket>> ZrtpRawPacket<T> {
    /// Looks at a received packet as ZRTP. Nothing is checked or copied.
    pub fn new(packet: T) -> Self {
        Self { packet }
    }

    pub fn raw(&self) -> &RawPacket {
        self.packet.borrow()
    }

    pub fn into_inner(self) -> T {
        self.packet
    }

    pub fn len(&self) -> usize {
        self.raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }

    /// The cheap test: the marker bit that RTP uses for its extension flag.
    pub fn is_zrtp_packet(&self) -> bool {
        let raw = self.raw();
        raw.len() >= ZRTP_MIN_PACKET_LEN && (raw.read_u8(0) & ZRTP_MARKER) != 0
    }

    /// The authoritative test that tells ZRTP apart from RTP with extensions.
    pub fn has_magic(&self) -> bool {
        let raw = self.raw();
        raw.len() >= ZRTP_MIN_PACKET_LEN && raw.read_region(ZRTP_MAGIC_OFFSET, 4) == ZRTP_MAGIC
    }

    pub fn seq_num(&self) -> Option<u16> {
        self.raw().get_u16(ZRTP_SEQNUM_OFFSET)
    }

    pub fn ssrc(&self) -> Option<Ssrc> {
        self.raw().get_u32(ZRTP_SSRC_OFFSET)
    }

    /// Recomputes the checksum over everything before the trailer and compares
    /// it with the trailer.
    pub fn check_crc(&self) -> bool {
        let raw = self.raw();
        if raw.len() < ZRTP_MIN_PACKET_LEN {
            return false;
        }
        let crc_at = raw.len() - ZRTP_CRC_LEN;
        zrtp_crc(raw.read_region(0, crc_at)) == raw.read_region(crc_at, ZRTP_CRC_LEN)
    }

    /// The message between the packet header and the CRC; empty for packets
    /// too short to be ZRTP.
    pub fn message_part(&self) -> &[u8] {
        let raw = self.raw();
        if raw.len() < ZRTP_MIN_PACKET_LEN {
            return &[];
        }
        raw.read_region(
            ZRTP_PACKET_HEADER_LEN,
            raw.len() - ZRTP_PACKET_HEADER_LEN - ZRTP_CRC_LEN,
        )
    }

    pub fn message_header(&self) -> Option<ZrtpMessageHeader> {
        ZrtpMessageHeader::parse(self.message_part())
    }
}

impl<T: BorrowMut<RawPacket>> ZrtpRawPacket<T> {
    fn raw_mut(&mut self) -> &mut RawPacket {
        self.packet.borrow_mut()
    }

    pub fn set_seq_num(&mut self, seq_num: u16) {
        self.raw_mut().write_u16(ZRTP_SEQNUM_OFFSET, seq_num);
    }

    pub fn set_ssrc(&mut self, ssrc: Ssrc) {
        self.raw_mut().write_u32(ZRTP_SSRC_OFFSET, ssrc);
    }

    pub fn message_part_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        assert!(
            len >= ZRTP_MIN_PACKET_LEN,
            "ZRTP packet of {} bytes has no message",
            len
        );
        self.raw_mut().region_mut(
            ZRTP_PACKET_HEADER_LEN,
            len - ZRTP_PACKET_HEADER_LEN - ZRTP_CRC_LEN,
        )
    }

    /// Seals the packet. Call it once, after every other change; anything
    /// written afterwards isn't covered.
    pub fn set_crc(&mut self) {
        let raw = self.raw_mut();
        let crc_at = raw.len() - ZRTP_CRC_LEN;
        let crc = zrtp_crc(raw.read_region(0, crc_at));
        raw.region_mut(crc_at, ZRTP_CRC_LEN).copy_from_slice(&crc);
    }

    fn mark(&mut self) {
        let raw = self.raw_mut();
        raw.write_u8(0, ZRTP_MARKER);
        raw.write_u8(1, 0);
        raw.region_mut(ZRTP_MAGIC_OFFSET, ZRTP_MAGIC.len())
            .copy_from_slice(&ZRTP_MAGIC);
    }
}

impl ZrtpRawPacket<RawPacket> {
    /// Prepares `buffer[offset..offset + length]` as an outgoing ZRTP packet.
    /// The marker and the magic cookie are in place when this returns.
    pub fn for_sending(buffer: Vec<u8>, offset: usize, length: usize) -> Result<Self, PacketError> {
        if length < ZRTP_MIN_PACKET_LEN {
            return Err(PacketError::TooShort {
                actual: length,
                required: ZRTP_MIN_PACKET_LEN,
            });
        }
        let mut packet = Self::new(RawPacket::new(buffer, offset, length)?);
        packet.mark();
        Ok(packet)
    }

    /// An outgoing packet carrying `message`, with room for the CRC.
    pub fn with_message(message: &[u8]) -> Self {
        let length = ZRTP_PACKET_HEADER_LEN + message.len() + ZRTP_CRC_LEN;
        let mut packet = Self::new(RawPacket::from(vec![0u8; length]));
        packet.mark();
        packet.message_part_mut().copy_from_slice(message);
        packet
    }
}

/// The start of every ZRTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZrtpMessageHeader {
    /// Length of the whole message, header included, in 32-bit words.
    pub length_in_words: u16,
    /// Space padded, e.g. `"Hello   "` or `"Commit  "`.
    pub message_type: [u8; 8],
}

impl ZrtpMessageHeader {
    pub fn parse(message: &[u8]) -> Option<Self> {
        let (preamble, rest) = media_common::read_u16(message)?;
        if preamble != ZRTP_MESSAGE_PREAMBLE {
            return None;
        }
        let (length_in_words, rest) = media_common::read_u16(rest)?;
        let (message_type, _body) = media_common::read_bytes(rest, 8)?;
        Some(Self {
            length_in_words,
            message_type: message_type.try_into().ok()?,
        })
    }

    /// The message type without its padding, if it's printable.
    pub fn message_type_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.message_type)
            .ok()
            .map(|s| s.trim_end())
    }
}
