//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use media_transport::{
    rtp::{
        srtp::{KeyAndSalt, SRTP_KEY_LEN, SRTP_SALT_LEN},
        RawPacket,
    },
    transform::{PacketTransformer, SrtcpTransformer, SrtpTransformer},
};
use zeroize::Zeroizing;

#[derive(Arbitrary, Debug)]
struct Input {
    key: [u8; SRTP_KEY_LEN],
    salt: [u8; SRTP_SALT_LEN],
    rtcp: bool,
    packets: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let master = KeyAndSalt {
        key: Zeroizing::new(input.key),
        salt: input.salt,
    };
    let transformer: Box<dyn PacketTransformer> = if input.rtcp {
        Box::new(SrtcpTransformer::from_master(&master))
    } else {
        Box::new(SrtpTransformer::from_master(&master))
    };
    for packet in input.packets {
        let _ = transformer.reverse_transform(RawPacket::from(packet));
    }
});
