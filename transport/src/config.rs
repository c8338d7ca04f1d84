//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Configuration options for the ZRTP monitor.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap;

/// Set by command line arguments, falling back to defaults.
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "zrtp_monitor")]
pub struct Config {
    /// The IP address to bind to.
    #[clap(long, default_value = "0.0.0.0")]
    pub binding_ip: String,

    /// The UDP port to watch.
    #[clap(long, default_value = "5004")]
    pub port: u16,

    /// Check the magic cookie and CRC of ZRTP packets. When off, anything
    /// with the ZRTP marker bit is counted as ZRTP.
    #[clap(long, default_value = "true", action = clap::ArgAction::Set)]
    pub validate_zrtp: bool,

    /// Log a hex dump of every packet that is neither ZRTP nor RTP/RTCP.
    #[clap(long)]
    pub hexdump_unknown: bool,

    /// Exit after this many packets. Runs forever if not given.
    #[clap(long)]
    pub max_packets: Option<u64>,

    /// How often to log the running counts (seconds).
    #[clap(long, default_value = "10")]
    pub report_interval_secs: u64,
}

impl Config {
    pub fn binding_address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .binding_ip
            .parse()
            .with_context(|| format!("invalid binding_ip {:?}", self.binding_ip))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
pub(crate) fn default_test_config() -> Config {
    Config {
        binding_ip: "127.0.0.1".to_string(),
        port: 0,
        validate_zrtp: true,
        hexdump_unknown: false,
        max_packets: Some(10),
        report_interval_secs: 1,
    }
}
