//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

pub mod capture;
pub mod conference;
pub mod config;
pub mod monitor;
pub mod rtp;
pub mod transform;
pub mod zrtp;
