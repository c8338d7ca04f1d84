//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

/// Expands a counter that travels truncated to `width` bits (such as the 16-bit
/// RTP sequence number) to its full value, using the largest full value seen
/// so far to decide between rollover and rollunder. `max` is updated when the
/// expanded value is a new maximum.
///
/// Only the low `width` bits of `truncated` are used. `width` must be in 1..=32.
pub fn expand_truncated_counter(truncated: u64, max: &mut u64, width: u32) -> u64 {
    assert!((1..=32).contains(&width), "unsupported counter width {width}");
    let mask = (1u64 << width) - 1;
    let half_range = 1u64 << (width - 1);

    let truncated = truncated & mask;
    let truncated_max = *max & mask;
    let max_roc = *max >> width;

    let roc = if truncated_max > truncated && truncated_max - truncated > half_range {
        // Far below the max: we wrapped forward.
        max_roc + 1
    } else if max_roc > 0 && truncated > truncated_max && truncated - truncated_max > half_range {
        // Far above the max: a late packet from before the last wrap.
        max_roc - 1
    } else {
        max_roc
    };

    let full = (roc << width) | truncated;
    if full > *max {
        *max = full;
    }
    full
}
