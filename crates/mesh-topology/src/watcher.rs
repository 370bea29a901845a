// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_common_core::{
	sleep_or_stop, CancellationToken, ReportEnvelope, SharedSink, Watcher, WatcherCategory,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::kubernetes::{KubePodLister, KubernetesSource};
use crate::source::{NetworkApi, NetworkRecord, SharedSource};
use crate::{DockerSource, HostSource};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Polls one [`NetworkSource`](crate::NetworkSource) and reports only when
/// the record set changes.
pub struct TopologyWatcher {
	source: SharedSource,
	sink: SharedSink,
	interval: Duration,
	last: Mutex<Vec<NetworkRecord>>,
}

impl TopologyWatcher {
	pub fn new(source: SharedSource, sink: SharedSink) -> Self {
		Self {
			source,
			sink,
			interval: DEFAULT_INTERVAL,
			last: Mutex::new(Vec::new()),
		}
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn report_type(&self) -> &'static str {
		self.source.report_type()
	}

	/// Polls once. Returns whether a report was sent.
	pub async fn cycle(&self) -> Result<bool> {
		let mut records = self.source.poll().await?;
		records.sort();
		records.dedup();

		let mut last = self.last.lock().await;
		if *last == records {
			debug!(records = records.len(), "topology unchanged");
			return Ok(false);
		}

		let report = ReportEnvelope::new(
			format!("ID.{}", chrono::Utc::now().timestamp()),
			self.source.report_type(),
			serde_json::to_value(&records)?,
		);
		self.sink.send(report).await?;
		info!(records = records.len(), report_type = self.source.report_type(), "topology changed");
		*last = records;
		Ok(true)
	}
}

#[async_trait]
impl Watcher for TopologyWatcher {
	fn category(&self) -> WatcherCategory {
		WatcherCategory::Topology
	}

	async fn run(self: Arc<Self>, stop: CancellationToken) {
		info!(report_type = self.report_type(), "topology watcher started");
		loop {
			if stop.is_cancelled() {
				break;
			}
			if let Err(e) = self.cycle().await {
				error!(report_type = self.report_type(), error = %e, "topology poll failed");
			}
			if sleep_or_stop(&stop, self.interval).await {
				break;
			}
		}
		info!("topology watcher stopped");
	}
}

/// Builds the source for the configured backend. `Ok(None)` means topology
/// discovery is disabled. A kubernetes credential failure is returned as an
/// error so the caller can run on without topology.
pub async fn select_source(api: NetworkApi) -> Result<Option<SharedSource>> {
	let source: SharedSource = match api {
		NetworkApi::Docker => Arc::new(DockerSource::new()),
		NetworkApi::Kubernetes => match KubePodLister::connect().await {
			Ok(lister) => Arc::new(KubernetesSource::new(Arc::new(lister))),
			Err(e) => {
				warn!(error = %e, "kubernetes topology unavailable");
				return Err(e);
			}
		},
		NetworkApi::Host => Arc::new(HostSource),
		NetworkApi::None => return Ok(None),
	};
	Ok(Some(source))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::TopologyError;
	use crate::source::NetworkSource;
	use mesh_common_core::report_types;
	use mesh_common_core::testing::RecordingSink;
	use std::sync::Mutex as StdMutex;

	/// Returns queued poll results in order, repeating the last one.
	struct ScriptedSource {
		polls: StdMutex<Vec<Vec<NetworkRecord>>>,
		failures: StdMutex<usize>,
	}

	impl ScriptedSource {
		fn new(polls: Vec<Vec<NetworkRecord>>) -> Self {
			Self {
				polls: StdMutex::new(polls),
				failures: StdMutex::new(0),
			}
		}

		/// Fails the first `times` polls before following the script.
		fn failing(self, times: usize) -> Self {
			*self.failures.lock().unwrap() = times;
			self
		}
	}

	#[async_trait]
	impl NetworkSource for ScriptedSource {
		fn report_type(&self) -> &'static str {
			report_types::KUBERNETES_NETWORK_INFO
		}

		async fn poll(&self) -> Result<Vec<NetworkRecord>> {
			let mut failures = self.failures.lock().unwrap();
			if *failures > 0 {
				*failures -= 1;
				return Err(TopologyError::Parse {
					what: "pod list",
					reason: "connection reset".into(),
				});
			}
			drop(failures);
			let mut polls = self.polls.lock().unwrap();
			if polls.len() > 1 {
				Ok(polls.remove(0))
			} else {
				Ok(polls.first().cloned().unwrap_or_default())
			}
		}
	}

	fn watcher(polls: Vec<Vec<NetworkRecord>>) -> (Arc<RecordingSink>, TopologyWatcher) {
		let sink = Arc::new(RecordingSink::new());
		let watcher = TopologyWatcher::new(Arc::new(ScriptedSource::new(polls)), sink.clone());
		(sink, watcher)
	}

	#[tokio::test]
	async fn identical_polls_emit_one_report() {
		let records = vec![NetworkRecord::new("10.0.0.1/32", "a")];
		let (sink, watcher) = watcher(vec![records.clone(), records]);

		assert!(watcher.cycle().await.unwrap());
		assert!(!watcher.cycle().await.unwrap());
		assert_eq!(sink.reports().len(), 1);
	}

	#[tokio::test]
	async fn order_does_not_count_as_change() {
		let a = NetworkRecord::new("10.0.0.1/32", "a");
		let b = NetworkRecord::new("10.0.0.2/32", "b");
		let (sink, watcher) = watcher(vec![vec![a.clone(), b.clone()], vec![b, a]]);

		watcher.cycle().await.unwrap();
		watcher.cycle().await.unwrap();
		assert_eq!(sink.reports().len(), 1);
	}

	#[tokio::test]
	async fn changed_set_is_reported_with_timestamp_id() {
		let (sink, watcher) = watcher(vec![
			vec![NetworkRecord::new("10.0.0.1/32", "a")],
			vec![NetworkRecord::new("10.0.0.9/32", "z")],
		]);

		watcher.cycle().await.unwrap();
		watcher.cycle().await.unwrap();

		let reports = sink.reports_of(report_types::KUBERNETES_NETWORK_INFO);
		assert_eq!(reports.len(), 2);
		assert!(reports[1].id.starts_with("ID."));
		assert_eq!(reports[1].data[0]["agent_network_subnets"], "10.0.0.9/32");
		assert_eq!(reports[1].data[0]["agent_network_name"], "z");
	}

	#[tokio::test]
	async fn empty_set_is_never_reported_initially() {
		let (sink, watcher) = watcher(vec![vec![]]);
		assert!(!watcher.cycle().await.unwrap());
		assert!(sink.reports().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn stops_within_one_tick() {
		let (sink, watcher) = watcher(vec![vec![NetworkRecord::new("10.0.0.1/32", "a")]]);
		let watcher = Arc::new(watcher);
		let stop = CancellationToken::new();
		let handle = tokio::spawn(watcher.clone().run(stop.clone()));

		sink.wait_for(report_types::KUBERNETES_NETWORK_INFO, 1, Duration::from_secs(1))
			.await;
		tokio::time::sleep(Duration::from_secs(35)).await;
		stop.cancel();
		tokio::time::timeout(DEFAULT_INTERVAL, handle)
			.await
			.expect("watcher stopped")
			.unwrap();
		assert_eq!(sink.reports().len(), 1, "unchanged cluster reports once");
	}

	#[tokio::test(start_paused = true)]
	async fn failed_poll_does_not_end_the_loop() {
		let sink = Arc::new(RecordingSink::new());
		let source = ScriptedSource::new(vec![vec![NetworkRecord::new("10.0.0.1/32", "a")]]).failing(2);
		let watcher = Arc::new(TopologyWatcher::new(Arc::new(source), sink.clone()));
		let stop = CancellationToken::new();
		let handle = tokio::spawn(watcher.clone().run(stop.clone()));

		tokio::time::sleep(Duration::from_secs(15)).await;
		assert!(sink.reports().is_empty(), "two failed polls report nothing");

		let reports = sink
			.wait_for(report_types::KUBERNETES_NETWORK_INFO, 1, Duration::from_secs(30))
			.await;
		assert_eq!(reports.len(), 1);

		stop.cancel();
		tokio::time::timeout(DEFAULT_INTERVAL, handle)
			.await
			.expect("watcher stopped")
			.unwrap();
	}

	#[tokio::test]
	async fn host_and_disabled_selection() {
		let host = select_source(NetworkApi::Host).await.unwrap().unwrap();
		assert_eq!(host.report_type(), report_types::HOST_NETWORK_INFO);
		assert!(host.poll().await.unwrap().is_empty());
		assert!(select_source(NetworkApi::None).await.unwrap().is_none());
	}
}
