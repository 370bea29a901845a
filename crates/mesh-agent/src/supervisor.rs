// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mesh_common_core::{CancellationToken, Watcher, WatcherCategory};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct WatcherHandle {
	stop: CancellationToken,
	task: JoinHandle<()>,
}

impl WatcherHandle {
	fn is_live(&self) -> bool {
		!self.task.is_finished()
	}
}

/// Owns the one live watcher per category.
///
/// The slot map stays locked across stop, join and start so two concurrent
/// replacements of the same category cannot both end up running.
pub struct WatcherSupervisor {
	slots: Mutex<HashMap<WatcherCategory, WatcherHandle>>,
	join_timeout: Duration,
	root: CancellationToken,
}

impl WatcherSupervisor {
	pub fn new(join_timeout: Duration) -> Self {
		Self {
			slots: Mutex::new(HashMap::new()),
			join_timeout,
			root: CancellationToken::new(),
		}
	}

	/// Retires whatever runs in `watcher`'s category, then starts `watcher`.
	pub async fn replace(&self, watcher: Arc<dyn Watcher>) {
		let category = watcher.category();
		let mut slots = self.slots.lock().await;
		if let Some(previous) = slots.remove(&category) {
			self.retire_handle(category, previous).await;
		}

		let stop = self.root.child_token();
		let task = tokio::spawn(watcher.run(stop.clone()));
		info!(category = %category, "watcher started");
		slots.insert(category, WatcherHandle { stop, task });
	}

	/// Stops the watcher in `category`, if any. Returns whether one was running.
	pub async fn retire(&self, category: WatcherCategory) -> bool {
		let mut slots = self.slots.lock().await;
		match slots.remove(&category) {
			Some(handle) => {
				let was_live = handle.is_live();
				self.retire_handle(category, handle).await;
				was_live
			}
			None => false,
		}
	}

	async fn retire_handle(&self, category: WatcherCategory, handle: WatcherHandle) {
		handle.stop.cancel();
		let mut task = handle.task;
		match tokio::time::timeout(self.join_timeout, &mut task).await {
			Ok(Ok(())) => debug!(category = %category, "watcher stopped"),
			Ok(Err(e)) => warn!(category = %category, error = %e, "watcher task ended abnormally"),
			Err(_) => {
				warn!(
					category = %category,
					timeout_ms = self.join_timeout.as_millis() as u64,
					"watcher did not stop in time, abandoning it"
				);
				task.abort();
			}
		}
	}

	pub async fn is_live(&self, category: WatcherCategory) -> bool {
		self
			.slots
			.lock()
			.await
			.get(&category)
			.is_some_and(WatcherHandle::is_live)
	}

	pub async fn live_categories(&self) -> Vec<WatcherCategory> {
		let slots = self.slots.lock().await;
		WatcherCategory::ALL
			.into_iter()
			.filter(|c| slots.get(c).is_some_and(WatcherHandle::is_live))
			.collect()
	}

	/// Retires every watcher.
	pub async fn shutdown(&self) {
		self.root.cancel();
		let mut slots = self.slots.lock().await;
		for category in WatcherCategory::ALL {
			if let Some(handle) = slots.remove(&category) {
				self.retire_handle(category, handle).await;
			}
		}
		info!("all watchers stopped");
	}
}
