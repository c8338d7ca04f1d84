//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

pub type PayloadType = u8;
pub type FullSequenceNumber = u64; // Really u48 due to limitations of SRTP
pub type TruncatedSequenceNumber = u16; // What actually goes in the packet
pub type TruncatedTimestamp = u32;
pub type Ssrc = u32;
pub type SrtcpIndex = u32; // Really u31; the top bit is the E flag
