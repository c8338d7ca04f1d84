//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use media_transport::{
    rtp::{RawPacket, Ssrc},
    transform::PacketTransformer,
    zrtp::{SessionType, ZrtpHandshake, ZrtpMessageHeader, ZrtpRawPacket, ZrtpTransformer},
};

struct IgnoreHandshake;

impl ZrtpHandshake for IgnoreHandshake {
    fn process_message(&self, message: &[u8], _peer_ssrc: Ssrc) {
        let _ = ZrtpMessageHeader::parse(message);
    }
}

fuzz_target!(|data: Vec<u8>| {
    let packet = RawPacket::from(data);
    let zrtp = ZrtpRawPacket::new(&packet);
    let _ = (
        zrtp.seq_num(),
        zrtp.ssrc(),
        zrtp.check_crc(),
        zrtp.message_part().len(),
    );

    let transformer = ZrtpTransformer::new(SessionType::Audio, Arc::new(IgnoreHandshake));
    let _ = transformer.reverse_transform(packet);
});
