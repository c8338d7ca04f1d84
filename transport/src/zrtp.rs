//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! ZRTP (RFC 6189) shares the media socket with SRTP. [`ZrtpTransformer`] sits
//! at the bottom of the transform chain, takes the ZRTP packets out of the
//! inbound flow for the key agreement and lets everything else through the
//! SRTP contexts the key agreement installs.

use std::sync::{
    atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering},
    Arc,
};

use log::*;
use parking_lot::{Mutex, RwLock};

use crate::{
    rtp::{looks_like_rtcp, looks_like_rtp, srtp::SrtpSecrets, RawPacket, Ssrc},
    transform::{
        PacketTransformer, SrtcpTransformer, SrtpTransformer, TransformError, TransformerPair,
    },
};

mod packet;

pub use packet::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Severe,
    ZrtpError,
}

/// Which half of the SRTP keys a handshake callback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableSecurity {
    ForReceiver,
    ForSender,
}

/// The ZRTP key agreement state machine. It gets the message part of every
/// valid inbound ZRTP packet and calls back into [`ZrtpTransformer`] to send
/// messages and to turn SRTP on and off.
pub trait ZrtpHandshake: Send + Sync {
    fn process_message(&self, message: &[u8], peer_ssrc: Ssrc);
}

/// Whoever shows call security to the user.
pub trait SecurityListener: Send + Sync {
    /// `multi_stream_data` is only set for the master stream of a
    /// multistream session; the other streams use it to start their own.
    fn security_turned_on(
        &self,
        session_type: SessionType,
        cipher: &str,
        sas: &str,
        verified: bool,
        multi_stream_data: Option<&[u8]>,
    );
    fn security_turned_off(&self, session_type: SessionType);
    fn security_message(&self, message: &str, severity: Severity);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZrtpStats {
    pub zrtp_received: u64,
    pub crc_failures: u64,
    pub dropped_while_disabled: u64,
    pub media_passed: u64,
}

#[derive(Default)]
struct Counters {
    zrtp_received: AtomicU64,
    crc_failures: AtomicU64,
    dropped_while_disabled: AtomicU64,
    media_passed: AtomicU64,
}

#[derive(Default)]
struct Peers {
    own_ssrc: Option<Ssrc>,
    peer_ssrc: Option<Ssrc>,
}

/// What a datagram on a media socket looks like from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Zrtp { crc_ok: bool },
    Rtp,
    Rtcp,
    Unknown,
}

pub fn classify(packet: &RawPacket) -> PacketKind {
    let zrtp = ZrtpRawPacket::new(packet);
    if zrtp.is_zrtp_packet() && zrtp.has_magic() {
        PacketKind::Zrtp {
            crc_ok: zrtp.check_crc(),
        }
    } else if looks_like_rtcp(packet.as_slice()) {
        PacketKind::Rtcp
    } else if looks_like_rtp(packet.as_slice()) {
        PacketKind::Rtp
    } else {
        PacketKind::Unknown
    }
}

/// The RTP side of one ZRTP protected media stream. The matching RTCP flow
/// goes through [`ZrtpTransformer::rtcp_transformer`].
pub struct ZrtpTransformer {
    session_type: SessionType,
    srtp: TransformerPair,
    srtcp: Arc<TransformerPair>,
    handshake: Arc<dyn ZrtpHandshake>,
    listener: RwLock<Option<Arc<dyn SecurityListener>>>,
    multi_stream_data: Mutex<Option<Vec<u8>>>,
    peers: Mutex<Peers>,
    next_zrtp_seqnum: AtomicU16,
    enabled: AtomicBool,
    counters: Counters,
}

impl ZrtpTransformer {
    pub fn new(session_type: SessionType, handshake: Arc<dyn ZrtpHandshake>) -> Self {
        Self {
            session_type,
            srtp: TransformerPair::new(),
            srtcp: Arc::new(TransformerPair::new()),
            handshake,
            listener: RwLock::new(None),
            multi_stream_data: Mutex::new(None),
            peers: Mutex::new(Peers::default()),
            next_zrtp_seqnum: AtomicU16::new(1),
            enabled: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    pub fn set_security_listener(&self, listener: Option<Arc<dyn SecurityListener>>) {
        *self.listener.write() = listener;
    }

    /// With ZRTP disabled, inbound ZRTP packets are dropped instead of being
    /// handed to the handshake. Media is not affected.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_multi_stream_data(&self, data: Option<Vec<u8>>) {
        *self.multi_stream_data.lock() = data;
    }

    pub fn own_ssrc(&self) -> Option<Ssrc> {
        self.peers.lock().own_ssrc
    }

    pub fn peer_ssrc(&self) -> Option<Ssrc> {
        self.peers.lock().peer_ssrc
    }

    pub fn rtcp_transformer(&self) -> Arc<TransformerPair> {
        self.srtcp.clone()
    }

    pub fn stats(&self) -> ZrtpStats {
        ZrtpStats {
            zrtp_received: self.counters.zrtp_received.load(Ordering::Relaxed),
            crc_failures: self.counters.crc_failures.load(Ordering::Relaxed),
            dropped_while_disabled: self.counters.dropped_while_disabled.load(Ordering::Relaxed),
            media_passed: self.counters.media_passed.load(Ordering::Relaxed),
        }
    }

    /// Wraps a handshake message into a sealed ZRTP packet, ready for the
    /// socket.
    pub fn zrtp_packet(&self, message: &[u8]) -> RawPacket {
        let mut packet = ZrtpRawPacket::with_message(message);
        packet.set_seq_num(self.next_zrtp_seqnum.fetch_add(1, Ordering::Relaxed));
        packet.set_ssrc(self.own_ssrc().unwrap_or(0));
        packet.set_crc();
        packet.into_inner()
    }

    /// Installs the SRTP and SRTCP contexts for one direction.
    pub fn srtp_secrets_ready(
        &self,
        secrets: &SrtpSecrets,
        part: EnableSecurity,
    ) -> Result<(), TransformError> {
        match part {
            EnableSecurity::ForSender => {
                let master = secrets.outbound_master();
                self.srtp
                    .set_outbound(Box::new(SrtpTransformer::from_master(master)))?;
                self.srtcp
                    .set_outbound(Box::new(SrtcpTransformer::from_master(master)))?;
            }
            EnableSecurity::ForReceiver => {
                let master = secrets.inbound_master();
                self.srtp
                    .set_inbound(Box::new(SrtpTransformer::from_master(master)))?;
                self.srtcp
                    .set_inbound(Box::new(SrtcpTransformer::from_master(master)))?;
            }
        }
        info!(
            "SRTP {:?} ready for {:?} stream (role {:?})",
            part, self.session_type, secrets.role
        );
        Ok(())
    }

    pub fn srtp_secrets_on(&self, cipher: &str, sas: &str, verified: bool) {
        info!(
            "security on for {:?} stream: cipher={} verified={}",
            self.session_type, cipher, verified
        );
        if let Some(listener) = self.listener() {
            let multi_stream_data = self.multi_stream_data.lock().clone();
            listener.security_turned_on(
                self.session_type,
                cipher,
                sas,
                verified,
                multi_stream_data.as_deref(),
            );
        }
    }

    /// Drops the contexts of one direction. The listener hears about it once
    /// neither direction is protected any more.
    pub fn srtp_secrets_off(&self, part: EnableSecurity) {
        match part {
            EnableSecurity::ForSender => {
                self.srtp.clear_outbound();
                self.srtcp.clear_outbound();
            }
            EnableSecurity::ForReceiver => {
                self.srtp.clear_inbound();
                self.srtcp.clear_inbound();
            }
        }
        info!("SRTP {:?} off for {:?} stream", part, self.session_type);
        if self.srtp.state() == crate::transform::PairState::Uninitialized {
            if let Some(listener) = self.listener() {
                listener.security_turned_off(self.session_type);
            }
        }
    }

    pub fn close(&self) {
        self.srtp.close();
        self.srtcp.close();
    }

    fn listener(&self) -> Option<Arc<dyn SecurityListener>> {
        self.listener.read().clone()
    }

    fn handle_zrtp(&self, zrtp: ZrtpRawPacket<&RawPacket>) {
        self.counters.zrtp_received.fetch_add(1, Ordering::Relaxed);
        if !self.is_enabled() {
            self.counters
                .dropped_while_disabled
                .fetch_add(1, Ordering::Relaxed);
            debug!("dropping ZRTP packet, ZRTP is disabled");
            return;
        }
        if !zrtp.check_crc() {
            self.counters.crc_failures.fetch_add(1, Ordering::Relaxed);
            debug!(
                "dropping ZRTP packet with bad CRC: {}",
                hex::encode(&zrtp.raw().as_slice()[..zrtp.len().min(32)])
            );
            if let Some(listener) = self.listener() {
                listener.security_message("ZRTP packet with bad CRC dropped", Severity::Warning);
            }
            return;
        }
        // has_magic() means the packet is long enough to have an SSRC.
        let peer_ssrc = zrtp.ssrc().unwrap_or_default();
        self.peers.lock().peer_ssrc = Some(peer_ssrc);
        if let Some(header) = zrtp.message_header() {
            trace!(
                "ZRTP {:?} from {} (seq {:?})",
                header.message_type_str(),
                peer_ssrc,
                zrtp.seq_num()
            );
        }
        self.handshake.process_message(zrtp.message_part(), peer_ssrc);
    }
}

impl PacketTransformer for ZrtpTransformer {
    fn transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        if let Some(header) = packet.rtp_header() {
            let mut peers = self.peers.lock();
            if peers.own_ssrc != Some(header.ssrc) {
                debug!("own SSRC is now {}", header.ssrc);
                peers.own_ssrc = Some(header.ssrc);
            }
        }
        self.srtp.transform(packet)
    }

    fn reverse_transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        let zrtp = ZrtpRawPacket::new(&packet);
        if zrtp.is_zrtp_packet() && zrtp.has_magic() {
            self.handle_zrtp(zrtp);
            return Ok(None);
        }
        self.counters.media_passed.fetch_add(1, Ordering::Relaxed);
        self.srtp.reverse_transform(packet)
    }

    fn close(&self) {
        ZrtpTransformer::close(self)
    }
}
