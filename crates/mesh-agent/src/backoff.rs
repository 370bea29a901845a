// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

const BASE_RECONNECT_DELAY_SECS: u64 = 1;
const RECONNECT_FACTOR: f64 = 2.0;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Delay before reconnect attempt `attempt` (1-based), capped at a minute.
pub fn calculate_backoff_delay(attempt: u32) -> u64 {
	let exponent = attempt.saturating_sub(1).min(16) as i32;
	let delay = BASE_RECONNECT_DELAY_SECS as f64 * RECONNECT_FACTOR.powi(exponent);
	(delay as u64).min(MAX_RECONNECT_DELAY_SECS)
}

/// [`calculate_backoff_delay`] plus up to 25% random jitter.
pub fn jittered_delay(attempt: u32) -> Duration {
	let base_ms = calculate_backoff_delay(attempt) * 1000;
	let jitter_ms = fastrand::u64(0..=base_ms / 4);
	Duration::from_millis(base_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_doubles_then_caps() {
		assert_eq!(calculate_backoff_delay(1), 1);
		assert_eq!(calculate_backoff_delay(2), 2);
		assert_eq!(calculate_backoff_delay(3), 4);
		assert_eq!(calculate_backoff_delay(6), 32);
		assert_eq!(calculate_backoff_delay(7), 60);
		assert_eq!(calculate_backoff_delay(1_000), 60);
	}

	#[test]
	fn attempt_zero_is_treated_as_first() {
		assert_eq!(calculate_backoff_delay(0), 1);
	}

	#[test]
	fn jitter_stays_within_a_quarter() {
		for attempt in 1..10 {
			let base = Duration::from_secs(calculate_backoff_delay(attempt));
			let delay = jittered_delay(attempt);
			assert!(delay >= base);
			assert!(delay <= base + base / 4);
		}
	}
}
