//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Packet views for RTP/RTCP and the SRTP keying around them. See
//! https://tools.ietf.org/html/rfc3550 and https://tools.ietf.org/html/rfc7714.
//! Assumes AES-GCM 128.

use std::ops::RangeInclusive;

use media_common::{parse_u16, parse_u32, CheckedSplitAt};

mod packet;
pub mod srtp;
mod types;

pub use packet::*;
pub use types::*;

pub const VERSION: u8 = 2;
pub const RTP_MIN_HEADER_LEN: usize = 12;
pub const RTP_PAYLOAD_TYPE_OFFSET: usize = 1;
pub const RTP_SEQNUM_OFFSET: usize = 2;
pub const RTP_TIMESTAMP_OFFSET: usize = 4;
pub const RTP_SSRC_OFFSET: usize = 8;
const RTP_EXTENSIONS_HEADER_LEN: usize = 4;
pub const RTCP_PAYLOAD_TYPES: RangeInclusive<u8> = 64..=95;
pub const RTCP_HEADER_LEN: usize = 8;
pub const RTCP_PAYLOAD_TYPE_OFFSET: usize = 1;
pub const RTCP_SENDER_SSRC_OFFSET: usize = 4;

pub fn looks_like_rtp(packet: &[u8]) -> bool {
    packet.len() > RTP_PAYLOAD_TYPE_OFFSET
        && (packet[0] >> 6) == VERSION
        && !RTCP_PAYLOAD_TYPES.contains(&(packet[RTP_PAYLOAD_TYPE_OFFSET] & 0b01111111))
}

pub fn looks_like_rtcp(packet: &[u8]) -> bool {
    packet.len() > RTCP_PAYLOAD_TYPE_OFFSET
        && (packet[0] >> 6) == VERSION
        && RTCP_PAYLOAD_TYPES.contains(&(packet[RTCP_PAYLOAD_TYPE_OFFSET] & 0b01111111))
}

/// The fixed RTP header plus the length of everything up to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub has_padding: bool,
    pub has_extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: PayloadType,
    pub seqnum: TruncatedSequenceNumber,
    pub timestamp: TruncatedTimestamp,
    pub ssrc: Ssrc,
    /// Fixed header, CSRCs and the extension block.
    /// The payload starts here.
    pub header_len: usize,
}

impl RtpHeader {
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let (main_header, csrcs_extensions_payload) =
            packet.checked_split_at(RTP_MIN_HEADER_LEN)?;
        if (main_header[0] >> 6) != VERSION {
            return None;
        }

        let has_padding = (main_header[0] & 0b0010_0000) > 0;
        let has_extension = (main_header[0] & 0b0001_0000) > 0;
        let csrc_count = main_header[0] & 0b0000_1111;
        let payload_type = main_header[RTP_PAYLOAD_TYPE_OFFSET] & 0b0111_1111;
        let marker = (main_header[RTP_PAYLOAD_TYPE_OFFSET] & 0b1000_0000) > 0;
        let seqnum = parse_u16(&main_header[RTP_SEQNUM_OFFSET..]);
        let timestamp = parse_u32(&main_header[RTP_TIMESTAMP_OFFSET..]);
        let ssrc = parse_u32(&main_header[RTP_SSRC_OFFSET..]);

        let csrcs_len = 4 * csrc_count as usize;
        let (_csrcs, extension_payload) = csrcs_extensions_payload.checked_split_at(csrcs_len)?;

        let mut header_len = RTP_MIN_HEADER_LEN + csrcs_len;
        if has_extension {
            let (extensions_header, extensions_payload) =
                extension_payload.checked_split_at(RTP_EXTENSIONS_HEADER_LEN)?;
            let extensions_len = (parse_u16(&extensions_header[2..4]) as usize) * 4;
            let (_extensions, _payload) = extensions_payload.checked_split_at(extensions_len)?;
            header_len += RTP_EXTENSIONS_HEADER_LEN + extensions_len;
        }

        Some(Self {
            has_padding,
            has_extension,
            csrc_count,
            marker,
            payload_type,
            seqnum,
            timestamp,
            ssrc,
            header_len,
        })
    }
}
