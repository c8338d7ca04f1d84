//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! SRTP and SRTCP with AEAD_AES_128_GCM (RFC 7714) as [`PacketTransformer`]s.
//! One instance serves one direction: `transform` seals, `reverse_transform`
//! opens.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
};

use aes::cipher::{generic_array::GenericArray, KeyInit};
use aes_gcm::{AeadInPlace, Aes128Gcm};
use log::*;
use media_common::expand_truncated_counter;
use parking_lot::Mutex;

use super::{PacketTransformer, TransformError};
use crate::rtp::{
    srtp::{
        rtcp_iv, rtp_iv, KeyAndSalt, KeysAndSalts, Salt, SRTCP_ENCRYPTED_FLAG, SRTCP_FOOTER_LEN,
        SRTP_AUTH_TAG_LEN,
    },
    FullSequenceNumber, RawPacket, SrtcpIndex, Ssrc, RTCP_HEADER_LEN, RTCP_SENDER_SSRC_OFFSET,
};

const SEQNUM_BITS: u32 = 16;

pub struct SrtpTransformer {
    cipher: Aes128Gcm,
    salt: Salt,
    // Highest extended sequence number seen per SSRC, which carries the ROC.
    max_seqnums: Mutex<HashMap<Ssrc, FullSequenceNumber>>,
}

impl SrtpTransformer {
    pub fn from_master(master: &KeyAndSalt) -> Self {
        Self::new(&KeysAndSalts::derive_from_master(master).rtp)
    }

    /// Uses `session` as is, without key derivation.
    pub fn new(session: &KeyAndSalt) -> Self {
        Self {
            cipher: Aes128Gcm::new(GenericArray::from_slice(&session.key[..])),
            salt: session.salt,
            max_seqnums: Mutex::new(HashMap::new()),
        }
    }

    fn peek_seqnum(&self, ssrc: Ssrc, truncated: u16) -> FullSequenceNumber {
        let mut max = self.max_seqnums.lock().get(&ssrc).copied().unwrap_or(0);
        expand_truncated_counter(truncated as u64, &mut max, SEQNUM_BITS)
    }

    fn commit_seqnum(&self, ssrc: Ssrc, seqnum: FullSequenceNumber) {
        let mut max_seqnums = self.max_seqnums.lock();
        let max = max_seqnums.entry(ssrc).or_insert(seqnum);
        *max = (*max).max(seqnum);
    }
}

impl PacketTransformer for SrtpTransformer {
    fn transform(&self, mut packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        let header = packet
            .rtp_header()
            .ok_or(TransformError::Malformed("not an RTP packet"))?;
        let seqnum = self.peek_seqnum(header.ssrc, header.seqnum);
        let payload_len = packet.len() - header.header_len;

        packet.grow(SRTP_AUTH_TAG_LEN);
        let iv = rtp_iv(header.ssrc, seqnum, &self.salt);
        let (aad, payload_plus_tag) = packet.as_mut_slice().split_at_mut(header.header_len);
        let (plaintext, tag) = payload_plus_tag.split_at_mut(payload_len);
        let computed_tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), aad, plaintext)
            .map_err(|_| TransformError::EncryptionFailed)?;
        tag.copy_from_slice(&computed_tag);

        self.commit_seqnum(header.ssrc, seqnum);
        Ok(Some(packet))
    }

    fn reverse_transform(
        &self,
        mut packet: RawPacket,
    ) -> Result<Option<RawPacket>, TransformError> {
        let header = packet
            .rtp_header()
            .ok_or(TransformError::Malformed("not an RTP packet"))?;
        if packet.len() < header.header_len + SRTP_AUTH_TAG_LEN {
            return Err(TransformError::Malformed("SRTP packet too short for tag"));
        }
        let seqnum = self.peek_seqnum(header.ssrc, header.seqnum);
        let payload_len = packet.len() - header.header_len - SRTP_AUTH_TAG_LEN;

        let iv = rtp_iv(header.ssrc, seqnum, &self.salt);
        let (aad, payload_plus_tag) = packet.as_mut_slice().split_at_mut(header.header_len);
        let (ciphertext, tag) = payload_plus_tag.split_at_mut(payload_len);
        if self
            .cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                aad,
                ciphertext,
                GenericArray::from_slice(tag),
            )
            .is_err()
        {
            debug!(
                "SRTP authentication failed: ssrc={} seqnum={} header={}",
                header.ssrc,
                seqnum,
                hex::encode(&aad[..aad.len().min(16)])
            );
            return Err(TransformError::AuthenticationFailed {
                ssrc: header.ssrc,
                index: seqnum,
            });
        }

        self.commit_seqnum(header.ssrc, seqnum);
        packet.truncate(packet.len() - SRTP_AUTH_TAG_LEN);
        Ok(Some(packet))
    }

    fn close(&self) {
        self.max_seqnums.lock().clear();
    }
}

pub struct SrtcpTransformer {
    cipher: Aes128Gcm,
    salt: Salt,
    next_outbound_index: AtomicU32,
}

impl SrtcpTransformer {
    pub fn from_master(master: &KeyAndSalt) -> Self {
        Self::new(&KeysAndSalts::derive_from_master(master).rtcp)
    }

    pub fn new(session: &KeyAndSalt) -> Self {
        Self {
            cipher: Aes128Gcm::new(GenericArray::from_slice(&session.key[..])),
            salt: session.salt,
            next_outbound_index: AtomicU32::new(0),
        }
    }

    // Stops at the E flag for good. Wrapping around would reuse IVs.
    fn next_index(&self) -> Result<SrtcpIndex, TransformError> {
        self.next_outbound_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |index| {
                (index & SRTCP_ENCRYPTED_FLAG == 0).then_some(index + 1)
            })
            .map_err(|_| TransformError::IndexExhausted)
    }
}

impl PacketTransformer for SrtcpTransformer {
    // The packet grows by the tag and the footer:
    // header (AAD) | payload | tag | E + index (AAD)
    fn transform(&self, mut packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        if packet.len() < RTCP_HEADER_LEN {
            return Err(TransformError::Malformed("RTCP packet too short"));
        }
        let sender_ssrc = packet.read_u32(RTCP_SENDER_SSRC_OFFSET);
        let index = self.next_index()?;
        let iv = rtcp_iv(sender_ssrc, index, &self.salt).ok_or(TransformError::IndexExhausted)?;

        let payload_len = packet.len() - RTCP_HEADER_LEN;
        packet.grow(SRTP_AUTH_TAG_LEN + SRTCP_FOOTER_LEN);
        let footer_at = packet.len() - SRTCP_FOOTER_LEN;
        packet.write_u32(footer_at, index | SRTCP_ENCRYPTED_FLAG);

        let (header, rest) = packet.as_mut_slice().split_at_mut(RTCP_HEADER_LEN);
        let (plaintext, tag_plus_footer) = rest.split_at_mut(payload_len);
        let (tag, footer) = tag_plus_footer.split_at_mut(SRTP_AUTH_TAG_LEN);
        let aad = [&header[..], &footer[..]].concat();
        let computed_tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), &aad, plaintext)
            .map_err(|_| TransformError::EncryptionFailed)?;
        tag.copy_from_slice(&computed_tag);
        Ok(Some(packet))
    }

    fn reverse_transform(
        &self,
        mut packet: RawPacket,
    ) -> Result<Option<RawPacket>, TransformError> {
        if packet.len() < RTCP_HEADER_LEN + SRTP_AUTH_TAG_LEN + SRTCP_FOOTER_LEN {
            return Err(TransformError::Malformed("SRTCP packet too short"));
        }
        let sender_ssrc = packet.read_u32(RTCP_SENDER_SSRC_OFFSET);
        let footer = packet.read_u32(packet.len() - SRTCP_FOOTER_LEN);
        if footer & SRTCP_ENCRYPTED_FLAG == 0 {
            return Err(TransformError::Unencrypted);
        }
        let index = footer & !SRTCP_ENCRYPTED_FLAG;
        let iv = rtcp_iv(sender_ssrc, index, &self.salt).ok_or(TransformError::IndexExhausted)?;

        let payload_len = packet.len() - RTCP_HEADER_LEN - SRTP_AUTH_TAG_LEN - SRTCP_FOOTER_LEN;
        let (header, rest) = packet.as_mut_slice().split_at_mut(RTCP_HEADER_LEN);
        let (ciphertext, tag_plus_footer) = rest.split_at_mut(payload_len);
        let (tag, footer) = tag_plus_footer.split_at(SRTP_AUTH_TAG_LEN);
        let aad = [&header[..], footer].concat();
        if self
            .cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                &aad,
                ciphertext,
                GenericArray::from_slice(tag),
            )
            .is_err()
        {
            debug!(
                "SRTCP authentication failed: ssrc={} index={}",
                sender_ssrc, index
            );
            return Err(TransformError::AuthenticationFailed {
                ssrc: sender_ssrc,
                index: index as u64,
            });
        }

        packet.truncate(packet.len() - SRTP_AUTH_TAG_LEN - SRTCP_FOOTER_LEN);
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod test {
    use hex_literal::hex;

    use super::*;
    use crate::rtp::srtp::{key_from, salt_from};

    fn master(seed: u8) -> KeyAndSalt {
        KeyAndSalt {
            key: key_from(seed),
            salt: salt_from(seed + 1),
        }
    }

    fn rtp_packet(seqnum: u16, payload: &[u8]) -> RawPacket {
        let mut bytes = hex!("80 66 0000 00001000 12345678").to_vec();
        bytes[2..4].copy_from_slice(&seqnum.to_be_bytes());
        bytes.extend_from_slice(payload);
        RawPacket::from(bytes)
    }

    #[test]
    fn test_srtp_round_trip() {
        let sender = SrtpTransformer::from_master(&master(1));
        let receiver = SrtpTransformer::from_master(&master(1));

        let plaintext = rtp_packet(1, b"audio frame");
        let sealed = sender.transform(plaintext.clone()).unwrap().unwrap();
        assert_eq!(plaintext.len() + SRTP_AUTH_TAG_LEN, sealed.len());
        assert_eq!(plaintext.read_region(0, 12), sealed.read_region(0, 12));
        assert_ne!(plaintext.read_region(12, 11), sealed.read_region(12, 11));

        let opened = receiver.reverse_transform(sealed).unwrap().unwrap();
        assert_eq!(plaintext.as_slice(), opened.as_slice());
    }

    #[test]
    fn test_srtp_respects_offset() {
        let sender = SrtpTransformer::from_master(&master(1));
        let receiver = SrtpTransformer::from_master(&master(1));

        let inner = rtp_packet(7, b"hello").to_vec();
        let mut buffer = vec![0xaa; 4];
        buffer.extend_from_slice(&inner);
        let packet = RawPacket::new(buffer, 4, inner.len()).unwrap();

        let sealed = sender.transform(packet).unwrap().unwrap();
        assert_eq!(4, sealed.offset());
        assert_eq!(&[0xaa; 4], &sealed.buffer()[..4]);
        let opened = receiver.reverse_transform(sealed).unwrap().unwrap();
        assert_eq!(&inner[..], opened.as_slice());
    }

    #[test]
    fn test_srtp_wrong_key_or_tamper_fails() {
        let sender = SrtpTransformer::from_master(&master(1));
        let stranger = SrtpTransformer::from_master(&master(2));
        let receiver = SrtpTransformer::from_master(&master(1));

        let sealed = sender.transform(rtp_packet(1, b"secret")).unwrap().unwrap();
        assert_eq!(
            Err(TransformError::AuthenticationFailed {
                ssrc: 0x12345678,
                index: 1
            }),
            stranger.reverse_transform(sealed.clone())
        );

        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered.write_u8(last, tampered.read_u8(last) ^ 1);
        assert!(receiver.reverse_transform(tampered).is_err());

        // The header is authenticated too.
        let mut tampered = sealed;
        tampered.write_u8(1, 0x67);
        assert!(receiver.reverse_transform(tampered).is_err());
    }

    #[test]
    fn test_srtp_rejects_garbage() {
        let receiver = SrtpTransformer::from_master(&master(1));
        assert_eq!(
            Err(TransformError::Malformed("not an RTP packet")),
            receiver.reverse_transform(RawPacket::from(vec![0x80, 0x66]))
        );
        assert_eq!(
            Err(TransformError::Malformed("SRTP packet too short for tag")),
            receiver.reverse_transform(rtp_packet(1, b"short"))
        );
    }

    #[test]
    fn test_srtp_rollover() {
        let sender = SrtpTransformer::from_master(&master(3));
        let receiver = SrtpTransformer::from_master(&master(3));

        let sealed: Vec<RawPacket> = [0xfffe, 0xffff, 0x0000, 0x0001]
            .iter()
            .map(|seqnum| sender.transform(rtp_packet(*seqnum, b"x")).unwrap().unwrap())
            .collect();

        // Deliver the packet from before the wrap late.
        for i in [0, 2, 1, 3] {
            let opened = receiver
                .reverse_transform(sealed[i].clone())
                .unwrap()
                .unwrap();
            assert_eq!(b"x", opened.read_region(12, 1));
        }

        // The ROC is only inferred relative to what the receiver has seen.
        let late_joiner = SrtpTransformer::from_master(&master(3));
        late_joiner.reverse_transform(sealed[0].clone()).unwrap();
        assert!(late_joiner.reverse_transform(sealed[3].clone()).is_ok());
        let fresh = SrtpTransformer::from_master(&master(3));
        assert!(fresh.reverse_transform(sealed[3].clone()).is_err());
    }

    fn rtcp_packet() -> RawPacket {
        // Receiver report with one block
        RawPacket::from(
            hex!(
                "81c9 0007 00001000"
                "12345678 00000000 00000001 00000000 00000000 00000000"
            )
            .to_vec(),
        )
    }

    #[test]
    fn test_srtcp_round_trip() {
        let sender = SrtcpTransformer::from_master(&master(4));
        let receiver = SrtcpTransformer::from_master(&master(4));

        let plaintext = rtcp_packet();
        for index in 0..3u32 {
            let sealed = sender.transform(plaintext.clone()).unwrap().unwrap();
            assert_eq!(
                plaintext.len() + SRTP_AUTH_TAG_LEN + SRTCP_FOOTER_LEN,
                sealed.len()
            );
            assert_eq!(
                index | SRTCP_ENCRYPTED_FLAG,
                sealed.read_u32(sealed.len() - SRTCP_FOOTER_LEN)
            );
            let opened = receiver.reverse_transform(sealed).unwrap().unwrap();
            assert_eq!(plaintext.as_slice(), opened.as_slice());
        }
    }

    #[test]
    fn test_srtcp_rejects_unencrypted_and_tampered() {
        let sender = SrtcpTransformer::from_master(&master(4));
        let receiver = SrtcpTransformer::from_master(&master(4));

        let mut unencrypted = rtcp_packet();
        unencrypted.grow(SRTP_AUTH_TAG_LEN + SRTCP_FOOTER_LEN);
        assert_eq!(
            Err(TransformError::Unencrypted),
            receiver.reverse_transform(unencrypted)
        );

        let mut tampered = sender.transform(rtcp_packet()).unwrap().unwrap();
        // Flip the index; it's authenticated.
        let footer_at = tampered.len() - SRTCP_FOOTER_LEN;
        tampered.write_u32(footer_at, SRTCP_ENCRYPTED_FLAG | 5);
        assert_eq!(
            Err(TransformError::AuthenticationFailed {
                ssrc: 0x1000,
                index: 5
            }),
            receiver.reverse_transform(tampered)
        );

        assert_eq!(
            Err(TransformError::Malformed("SRTCP packet too short")),
            receiver.reverse_transform(RawPacket::from(hex!("81c9 0001 00001000").to_vec()))
        );
    }

    #[test]
    fn test_srtcp_index_exhaustion_is_permanent() {
        let sender = SrtcpTransformer::from_master(&master(4));
        let receiver = SrtcpTransformer::from_master(&master(4));
        let last_index = SRTCP_ENCRYPTED_FLAG - 1;
        sender.next_outbound_index.store(last_index, Ordering::Relaxed);

        let sealed = sender.transform(rtcp_packet()).unwrap().unwrap();
        assert_eq!(u32::MAX, sealed.read_u32(sealed.len() - SRTCP_FOOTER_LEN));
        assert!(receiver.reverse_transform(sealed).unwrap().is_some());

        for _ in 0..3 {
            assert_eq!(
                Err(TransformError::IndexExhausted),
                sender.transform(rtcp_packet())
            );
        }
        // The counter never moves past the limit, so it can't wrap to 0.
        assert_eq!(
            SRTCP_ENCRYPTED_FLAG,
            sender.next_outbound_index.load(Ordering::Relaxed)
        );
    }
}
