// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Slot a long-running watcher occupies. At most one watcher per category is
/// live at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherCategory {
	Topology,
	Telemetry,
	LatencyProbe,
	ThroughputTest,
}

impl WatcherCategory {
	pub const ALL: [WatcherCategory; 4] = [
		WatcherCategory::Topology,
		WatcherCategory::Telemetry,
		WatcherCategory::LatencyProbe,
		WatcherCategory::ThroughputTest,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			WatcherCategory::Topology => "topology",
			WatcherCategory::Telemetry => "telemetry",
			WatcherCategory::LatencyProbe => "latency_probe",
			WatcherCategory::ThroughputTest => "throughput_test",
		}
	}
}

impl fmt::Display for WatcherCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A cyclic background task.
///
/// `run` must return promptly once `stop` is cancelled; the supervisor only
/// waits a bounded time before abandoning the task.
#[async_trait]
pub trait Watcher: Send + Sync + 'static {
	fn category(&self) -> WatcherCategory;

	async fn run(self: Arc<Self>, stop: CancellationToken);
}

/// Sleeps for `duration` unless `stop` fires first. Returns `true` when the
/// watcher should exit.
pub async fn sleep_or_stop(stop: &CancellationToken, duration: Duration) -> bool {
	if stop.is_cancelled() {
		return true;
	}
	tokio::select! {
		biased;

		_ = stop.cancelled() => true,
		_ = tokio::time::sleep(duration) => stop.is_cancelled(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn sleep_or_stop_returns_false_after_full_sleep() {
		let stop = CancellationToken::new();
		assert!(!sleep_or_stop(&stop, Duration::from_secs(60)).await);
	}

	#[tokio::test(start_paused = true)]
	async fn sleep_or_stop_wakes_on_cancel() {
		let stop = CancellationToken::new();
		let child = stop.clone();
		let handle = tokio::spawn(async move { sleep_or_stop(&child, Duration::from_secs(3600)).await });
		tokio::time::sleep(Duration::from_millis(10)).await;
		stop.cancel();
		assert!(handle.await.unwrap());
	}

	#[tokio::test]
	async fn sleep_or_stop_short_circuits_when_already_cancelled() {
		let stop = CancellationToken::new();
		stop.cancel();
		assert!(sleep_or_stop(&stop, Duration::from_secs(3600)).await);
	}

	#[test]
	fn categories_have_distinct_names() {
		let names: std::collections::HashSet<_> =
			WatcherCategory::ALL.iter().map(|c| c.as_str()).collect();
		assert_eq!(names.len(), WatcherCategory::ALL.len());
	}
}
