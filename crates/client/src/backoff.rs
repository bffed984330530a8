// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Delay before reconnect attempt number `attempt` (zero-based).
///
/// `min(initial * 2^attempt, max)` — geometric growth capped at `max` so a
/// long outage never produces unbounded delays. The supervisor resets the
/// attempt counter on a successful connect, so one outage never penalizes
/// the next.
pub fn reconnect_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
