//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common functionality for the packet, zrtp, and audio layers.

mod counters;
mod time;

use std::{convert::TryInto, io::Write};

pub use counters::*;
pub use time::*;

// It's (value, rest)
pub type ReadOption<'a, T> = Option<(T, &'a [u8])>;

pub fn read_u16(input: &[u8]) -> ReadOption<u16> {
    let (bytes, rest) = read_bytes(input, 2)?;
    Some((parse_u16(bytes), rest))
}

pub fn read_u32(input: &[u8]) -> ReadOption<u32> {
    let (bytes, rest) = read_bytes(input, 4)?;
    Some((parse_u32(bytes), rest))
}

// Returns (read, rest)
pub fn read_bytes(input: &[u8], len: usize) -> ReadOption<&[u8]> {
    let bytes = input.get(0..len)?;
    let rest = &input[len..];
    Some((bytes, rest))
}

/// Panics if `bytes` is shorter than 2.
pub fn parse_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes(bytes[0..2].try_into().unwrap())
}

/// Panics if `bytes` is shorter than 4.
pub fn parse_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes[0..4].try_into().unwrap())
}

pub trait CheckedSplitAt {
    fn checked_split_at(&self, mid: usize) -> Option<(&[u8], &[u8])>;
}

impl CheckedSplitAt for [u8] {
    fn checked_split_at(&self, mid: usize) -> Option<(&[u8], &[u8])> {
        if self.len() < mid {
            None
        } else {
            Some(self.split_at(mid))
        }
    }
}

/// Log line format shared by the binaries, for use with
/// `env_logger::Builder::format`.
pub fn format_log_line(
    buf: &mut env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "{} {:5} {}: {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"),
        record.level(),
        record.target(),
        record.args()
    )
}
