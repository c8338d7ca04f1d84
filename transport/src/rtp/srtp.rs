//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! SRTP keying for AEAD_AES_128_GCM: master keys as the ZRTP handshake
//! exports them, session key derivation and the per-packet IVs.

use std::convert::TryInto;

use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
    Aes128,
};
use zeroize::Zeroizing;

use super::types::{FullSequenceNumber, SrtcpIndex, Ssrc};

pub const SRTP_KEY_LEN: usize = 16;
pub const SRTP_SALT_LEN: usize = 12;
pub const SRTP_IV_LEN: usize = 12;
pub const SRTP_AUTH_TAG_LEN: usize = 16;
pub const SRTCP_FOOTER_LEN: usize = 4;
pub const SRTCP_ENCRYPTED_FLAG: u32 = 0x8000_0000;

pub type Key = Zeroizing<[u8; SRTP_KEY_LEN]>;
pub type Salt = [u8; SRTP_SALT_LEN];
pub type Iv = [u8; SRTP_IV_LEN];

// Laid out as [initiator_key, initiator_salt, responder_key, responder_salt]
pub const MASTER_KEY_MATERIAL_LEN: usize =
    SRTP_KEY_LEN + SRTP_SALT_LEN + SRTP_KEY_LEN + SRTP_SALT_LEN;
pub type MasterKeyMaterial = Zeroizing<[u8; MASTER_KEY_MATERIAL_LEN]>;

// RFC 3711 section 4.3.2
const LABEL_RTP_KEY: u8 = 0;
const LABEL_RTP_SALT: u8 = 2;
const LABEL_RTCP_KEY: u8 = 3;
const LABEL_RTCP_SALT: u8 = 5;

#[derive(Debug, Clone)]
pub struct KeyAndSalt {
    pub key: Key,
    pub salt: Salt,
}

/// Session keys for one direction of one stream.
#[derive(Debug, Clone)]
pub struct KeysAndSalts {
    pub rtp: KeyAndSalt,
    pub rtcp: KeyAndSalt,
}

impl KeysAndSalts {
    /// Derives the RTP and RTCP session keys from a master key and salt
    /// with the AES-CM PRF at key derivation rate zero.
    pub fn derive_from_master(master: &KeyAndSalt) -> Self {
        let prf = Aes128::new(GenericArray::from_slice(&master.key[..]));
        let derive = |label: u8| -> Key {
            // x = label << 48 XOR master_salt, padded to a full block
            let mut block = Zeroizing::new([0u8; SRTP_KEY_LEN]);
            block[..SRTP_SALT_LEN].copy_from_slice(&master.salt);
            block[7] ^= label;
            prf.encrypt_block(GenericArray::from_mut_slice(&mut block[..]));
            block
        };
        let salt = |label: u8| -> Salt {
            let mut salt = [0u8; SRTP_SALT_LEN];
            salt.copy_from_slice(&derive(label)[..SRTP_SALT_LEN]);
            salt
        };
        Self {
            rtp: KeyAndSalt {
                key: derive(LABEL_RTP_KEY),
                salt: salt(LABEL_RTP_SALT),
            },
            rtcp: KeyAndSalt {
                key: derive(LABEL_RTCP_KEY),
                salt: salt(LABEL_RTCP_SALT),
            },
        }
    }
}

/// Which side of the ZRTP exchange we were. The initiator sends with the
/// initiator's key and receives with the responder's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// The master keys the handshake hands over when SRTP can start.
#[derive(Debug, Clone)]
pub struct SrtpSecrets {
    pub initiator: KeyAndSalt,
    pub responder: KeyAndSalt,
    pub role: Role,
}

impl SrtpSecrets {
    pub fn from_master_key_material(material: &MasterKeyMaterial, role: Role) -> Self {
        let (initiator, responder) = material.split_at(SRTP_KEY_LEN + SRTP_SALT_LEN);
        Self {
            initiator: key_and_salt_from_slice(initiator),
            responder: key_and_salt_from_slice(responder),
            role,
        }
    }

    /// The master key we encrypt with.
    pub fn outbound_master(&self) -> &KeyAndSalt {
        match self.role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }

    /// The master key the peer encrypts with.
    pub fn inbound_master(&self) -> &KeyAndSalt {
        match self.role {
            Role::Initiator => &self.responder,
            Role::Responder => &self.initiator,
        }
    }
}

// Panics unless `bytes` is exactly a key followed by a salt.
fn key_and_salt_from_slice(bytes: &[u8]) -> KeyAndSalt {
    let (key, salt) = bytes.split_at(SRTP_KEY_LEN);
    KeyAndSalt {
        key: Zeroizing::new(key.try_into().unwrap()),
        salt: salt.try_into().unwrap(),
    }
}

/// RFC 7714 section 8.1: `00 00 | SSRC | ROC | SEQ` XOR salt, where ROC and
/// SEQ together are the 48-bit extended sequence number.
pub fn rtp_iv(ssrc: Ssrc, seqnum: FullSequenceNumber, salt: &Salt) -> Iv {
    let mut iv = *salt;
    for (iv, byte) in iv[2..6].iter_mut().zip(ssrc.to_be_bytes()) {
        *iv ^= byte;
    }
    for (iv, byte) in iv[6..].iter_mut().zip(&seqnum.to_be_bytes()[2..]) {
        *iv ^= byte;
    }
    iv
}

/// RFC 7714 section 9.1: `00 00 | SSRC | 00 00 | 0 + SRTCP index` XOR salt.
/// None if the index doesn't fit in 31 bits.
pub fn rtcp_iv(sender_ssrc: Ssrc, index: SrtcpIndex, salt: &Salt) -> Option<Iv> {
    if index & SRTCP_ENCRYPTED_FLAG != 0 {
        return None;
    }
    let mut iv = *salt;
    for (iv, byte) in iv[2..6].iter_mut().zip(sender_ssrc.to_be_bytes()) {
        *iv ^= byte;
    }
    for (iv, byte) in iv[8..].iter_mut().zip(index.to_be_bytes()) {
        *iv ^= byte;
    }
    Some(iv)
}

/// Creates a test key by repeating the byte
#[cfg(test)]
pub fn key_from(seed: u8) -> Key {
    [seed; SRTP_KEY_LEN].into()
}

/// Creates a test salt by repeating the byte
#[cfg(test)]
pub fn salt_from(seed: u8) -> Salt {
    [seed; SRTP_SALT_LEN]
}

#[cfg(test)]
pub fn new_srtp_secrets(seed: u8, role: Role) -> SrtpSecrets {
    SrtpSecrets {
        initiator: KeyAndSalt {
            key: key_from(seed),
            salt: salt_from(seed + 1),
        },
        responder: KeyAndSalt {
            key: key_from(seed + 2),
            salt: salt_from(seed + 3),
        },
        role,
    }
}
