//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#[macro_use]
extern crate log;

use std::net::UdpSocket;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use media_transport::{config::Config, monitor};

#[rustfmt::skip]
fn print_config(config: &Config) {
    info!("config:");
    info!("  {:38}{}", "binding_ip:", config.binding_ip);
    info!("  {:38}{}", "port:", config.port);
    info!("  {:38}{}", "validate_zrtp:", config.validate_zrtp);
    info!("  {:38}{}", "hexdump_unknown:", config.hexdump_unknown);
    info!("  {:38}{:?}", "max_packets:", config.max_packets);
    info!("  {:38}{}", "report_interval_secs:", config.report_interval_secs);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        Env::default()
            .default_filter_or("media_transport=info,zrtp_monitor=info")
            .default_write_style_or("never"),
    )
    .format(media_common::format_log_line)
    .init();

    info!(
        "zrtp_monitor: v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );

    let config = Config::parse();
    print_config(&config);

    let address = config.binding_address()?;
    let socket =
        UdpSocket::bind(address).with_context(|| format!("failed to bind {}", address))?;
    info!("listening on {}", socket.local_addr()?);

    let counts = monitor::run(&config, &socket)?;
    info!("done: {}", counts);
    Ok(())
}
