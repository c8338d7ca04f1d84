//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Passive classification of the datagrams arriving on a media port.

use std::{
    fmt,
    net::{SocketAddr, UdpSocket},
    time::Duration,
};

use anyhow::Result;
use log::*;
use media_common::Instant;

use crate::{
    config::Config,
    rtp::RawPacket,
    zrtp::{classify, PacketKind, ZrtpRawPacket},
};

const MAX_DATAGRAM_LEN: usize = 1500;
const HEXDUMP_LIMIT: usize = 64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorCounts {
    pub zrtp: u64,
    pub zrtp_bad_crc: u64,
    pub rtp: u64,
    pub rtcp: u64,
    pub unknown: u64,
}

impl MonitorCounts {
    pub fn total(&self) -> u64 {
        self.zrtp + self.zrtp_bad_crc + self.rtp + self.rtcp + self.unknown
    }
}

impl fmt::Display for MonitorCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "zrtp={} zrtp_bad_crc={} rtp={} rtcp={} unknown={}",
            self.zrtp, self.zrtp_bad_crc, self.rtp, self.rtcp, self.unknown
        )
    }
}

pub struct Monitor {
    validate_zrtp: bool,
    hexdump_unknown: bool,
    counts: MonitorCounts,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        Self {
            validate_zrtp: config.validate_zrtp,
            hexdump_unknown: config.hexdump_unknown,
            counts: MonitorCounts::default(),
        }
    }

    pub fn counts(&self) -> MonitorCounts {
        self.counts
    }

    pub fn observe(&mut self, sender: SocketAddr, datagram: &[u8]) -> PacketKind {
        let packet = RawPacket::from(datagram.to_vec());
        let kind = if self.validate_zrtp {
            classify(&packet)
        } else if ZrtpRawPacket::new(&packet).is_zrtp_packet() {
            PacketKind::Zrtp { crc_ok: true }
        } else {
            classify(&packet)
        };

        match kind {
            PacketKind::Zrtp { crc_ok: true } => {
                self.counts.zrtp += 1;
                if let Some(header) = ZrtpRawPacket::new(&packet).message_header() {
                    debug!(
                        "{}: zrtp {} ({} words)",
                        sender,
                        header.message_type_str().unwrap_or("?"),
                        header.length_in_words
                    );
                }
            }
            PacketKind::Zrtp { crc_ok: false } => {
                self.counts.zrtp_bad_crc += 1;
                debug!(
                    "{}: zrtp packet with bad CRC: {}",
                    sender,
                    hex::encode(&datagram[..datagram.len().min(HEXDUMP_LIMIT)])
                );
            }
            PacketKind::Rtp => self.counts.rtp += 1,
            PacketKind::Rtcp => self.counts.rtcp += 1,
            PacketKind::Unknown => {
                self.counts.unknown += 1;
                if self.hexdump_unknown {
                    info!(
                        "{}: unknown {} byte packet: {}",
                        sender,
                        datagram.len(),
                        hex::encode(&datagram[..datagram.len().min(HEXDUMP_LIMIT)])
                    );
                }
            }
        }
        kind
    }
}

/// Reads from `socket` until `max_packets` have been seen, or forever.
pub fn run(config: &Config, socket: &UdpSocket) -> Result<MonitorCounts> {
    let report_interval = Duration::from_secs(config.report_interval_secs.max(1));
    socket.set_read_timeout(Some(report_interval))?;

    let mut monitor = Monitor::new(config);
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    let mut next_report = Instant::now() + report_interval;
    loop {
        if config
            .max_packets
            .map_or(false, |max| monitor.counts().total() >= max)
        {
            break;
        }
        match socket.recv_from(&mut buf) {
            Ok((len, sender)) => {
                monitor.observe(sender, &buf[..len]);
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(err) => return Err(err.into()),
        }
        let now = Instant::now();
        if now >= next_report {
            info!("{}", monitor.counts());
            next_report = now + report_interval;
        }
    }
    Ok(monitor.counts())
}
