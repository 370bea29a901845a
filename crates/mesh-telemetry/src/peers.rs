// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_common_core::{
	report_types, sleep_or_stop, CancellationToken, ReportEnvelope, SharedSink, Watcher,
	WatcherCategory,
};
use mesh_common_snapshot::{read_or_default, SharedStore};
use mesh_wgconf::SharedBackend;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::sample::{
	calculate_bw, format_for_controller, InterfaceSample, PeerSample, PeerSnapshot, PEERS_INFO_KEY,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Wall clock in fractional unix seconds.
pub type Clock = fn() -> f64;

pub fn unix_now() -> f64 {
	chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
	Reported,
	Empty,
}

/// Samples per-peer transfer counters, derives throughput against the
/// previous persisted sample and reports `IFACES_PEERS_BW_DATA`.
pub struct PeerWatcher {
	backend: SharedBackend,
	store: SharedStore,
	sink: SharedSink,
	interval: Duration,
	idle_interval: Duration,
	clock: Clock,
}

impl PeerWatcher {
	pub fn new(backend: SharedBackend, store: SharedStore, sink: SharedSink) -> Self {
		Self {
			backend,
			store,
			sink,
			interval: DEFAULT_INTERVAL,
			idle_interval: DEFAULT_IDLE_INTERVAL,
			clock: unix_now,
		}
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
		self.idle_interval = idle_interval;
		self
	}

	pub fn with_clock(mut self, clock: Clock) -> Self {
		self.clock = clock;
		self
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Reads every interface and its peers. An interface that vanishes
	/// between listing and reading is skipped.
	pub async fn sample(&self) -> Result<PeerSnapshot> {
		let mut snapshot = PeerSnapshot::new();
		for iface in self.backend.list_interfaces().await? {
			let peers = match self.backend.list_peers(&iface.name).await {
				Ok(peers) => peers,
				Err(e) => {
					warn!(iface = %iface.name, error = %e, "failed to read peers, skipping interface");
					continue;
				}
			};
			let timestamp = (self.clock)();
			snapshot.insert(
				iface.name,
				InterfaceSample {
					iface_public_key: iface.public_key.to_string(),
					peers: peers
						.into_iter()
						.map(|p| (p.public_key.to_string(), PeerSample::new(p, timestamp)))
						.collect(),
				},
			);
		}
		Ok(snapshot)
	}

	#[instrument(skip(self))]
	pub async fn cycle(&self) -> Result<CycleOutcome> {
		let current = self.sample().await?;
		let previous: PeerSnapshot = read_or_default(self.store.as_ref(), PEERS_INFO_KEY).await;
		let current = calculate_bw(&previous, current);

		let persisted = serde_json::to_value(&current)?;
		self.store.write(PEERS_INFO_KEY, &persisted).await?;

		if current.is_empty() {
			return Ok(CycleOutcome::Empty);
		}

		let report = ReportEnvelope::unsolicited(
			report_types::IFACES_PEERS_BW_DATA,
			format_for_controller(&current),
		);
		self.sink.send(report).await?;
		debug!(interfaces = current.len(), "sent peer telemetry");
		Ok(CycleOutcome::Reported)
	}
}

#[async_trait]
impl Watcher for PeerWatcher {
	fn category(&self) -> WatcherCategory {
		WatcherCategory::Telemetry
	}

	async fn run(self: Arc<Self>, stop: CancellationToken) {
		info!(interval_secs = self.interval.as_secs(), "peer watcher started");
		loop {
			if stop.is_cancelled() {
				break;
			}
			let delay = match self.cycle().await {
				Ok(CycleOutcome::Reported) => self.interval,
				Ok(CycleOutcome::Empty) => self.idle_interval,
				Err(e) => {
					error!(error = %e, "peer telemetry cycle failed");
					self.interval
				}
			};
			if sleep_or_stop(&stop, delay).await {
				break;
			}
		}
		info!("peer watcher stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_common_core::testing::RecordingSink;
	use mesh_common_snapshot::{MemoryStore, SnapshotStore};
	use mesh_wgconf::{MemoryBackend, MeshBackend, PeerSpec, PrivateKey};
	use std::sync::atomic::{AtomicU64, Ordering};

	static NOW: AtomicU64 = AtomicU64::new(1_000);

	fn test_clock() -> f64 {
		NOW.load(Ordering::SeqCst) as f64
	}

	struct Fixture {
		backend: Arc<MemoryBackend>,
		store: Arc<MemoryStore>,
		sink: Arc<RecordingSink>,
		watcher: Arc<PeerWatcher>,
	}

	fn fixture(clock: Clock) -> Fixture {
		let backend = Arc::new(MemoryBackend::new());
		let store = Arc::new(MemoryStore::new());
		let sink = Arc::new(RecordingSink::new());
		let watcher = Arc::new(
			PeerWatcher::new(backend.clone(), store.clone(), sink.clone())
				.with_interval(Duration::from_secs(10))
				.with_clock(clock),
		);
		Fixture {
			backend,
			store,
			sink,
			watcher,
		}
	}

	async fn add_peer(backend: &MemoryBackend) -> mesh_wgconf::PublicKey {
		backend
			.create_interface(&mesh_wgconf::model::InterfaceSpec {
				name: "mesh_PUBLIC".into(),
				internal_ip: None,
				listen_port: None,
			})
			.await
			.unwrap();
		let key = PrivateKey::generate().public_key();
		backend
			.add_peer(
				"mesh_PUBLIC",
				&PeerSpec {
					public_key: key,
					allowed_ips: ["10.0.0.2/32".parse().unwrap()].into_iter().collect(),
					endpoint: None,
					persistent_keepalive: None,
				},
			)
			.await
			.unwrap();
		key
	}

	#[tokio::test]
	async fn empty_host_persists_but_does_not_report() {
		let f = fixture(unix_now);
		assert_eq!(f.watcher.cycle().await.unwrap(), CycleOutcome::Empty);
		assert!(f.sink.reports().is_empty());
		assert!(f.store.exists(PEERS_INFO_KEY).await);
	}

	#[tokio::test]
	async fn second_cycle_reports_rates() {
		let f = fixture(test_clock);
		let key = add_peer(&f.backend).await;

		f.backend.set_counters("mesh_PUBLIC", &key, 1_000_000, 500_000).await;
		NOW.store(1_000, Ordering::SeqCst);
		assert_eq!(f.watcher.cycle().await.unwrap(), CycleOutcome::Reported);

		f.backend.set_counters("mesh_PUBLIC", &key, 2_000_000, 1_500_000).await;
		NOW.store(1_010, Ordering::SeqCst);
		f.watcher.cycle().await.unwrap();

		let reports = f.sink.reports_of(report_types::IFACES_PEERS_BW_DATA);
		assert_eq!(reports.len(), 2);
		assert_eq!(reports[0].id, "UNKNOWN");

		let first_peer = &reports[0].data[0]["peers"][0];
		assert!(first_peer.get("rx_speed_mbps").is_none());

		let peer = &reports[1].data[0]["peers"][0];
		assert_eq!(reports[1].data[0]["iface"], "mesh_PUBLIC");
		assert!((peer["rx_speed_mbps"].as_f64().unwrap() - 0.1).abs() < 1e-9);
		assert!((peer["tx_speed_mbps"].as_f64().unwrap() + 0.1).abs() < 1e-9);
	}

	#[tokio::test]
	async fn corrupt_snapshot_degrades_to_first_sample() {
		let f = fixture(unix_now);
		add_peer(&f.backend).await;
		f.store.insert_raw(PEERS_INFO_KEY, "{ truncated").await;

		assert_eq!(f.watcher.cycle().await.unwrap(), CycleOutcome::Reported);
		let reports = f.sink.reports();
		assert!(reports[0].data[0]["peers"][0].get("rx_speed_mbps").is_none());
		assert!(f.store.read(PEERS_INFO_KEY).await.is_object());
	}

	#[tokio::test(start_paused = true)]
	async fn stops_promptly_during_sleep() {
		let f = fixture(unix_now);
		add_peer(&f.backend).await;
		let stop = CancellationToken::new();
		let handle = tokio::spawn(f.watcher.clone().run(stop.clone()));

		let reports = f
			.sink
			.wait_for(report_types::IFACES_PEERS_BW_DATA, 1, Duration::from_secs(5))
			.await;
		assert_eq!(reports.len(), 1);

		stop.cancel();
		tokio::time::timeout(Duration::from_millis(100), handle)
			.await
			.expect("watcher observed stop within one tick")
			.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn failed_cycle_is_retried_on_the_next_tick() {
		let f = fixture(unix_now);
		add_peer(&f.backend).await;
		f.backend.fail_listings(1);
		let stop = CancellationToken::new();
		let handle = tokio::spawn(f.watcher.clone().run(stop.clone()));

		tokio::time::sleep(Duration::from_secs(1)).await;
		assert!(f.sink.reports().is_empty());
		assert!(!f.store.exists(PEERS_INFO_KEY).await);

		let reports = f
			.sink
			.wait_for(report_types::IFACES_PEERS_BW_DATA, 1, Duration::from_secs(30))
			.await;
		assert_eq!(reports.len(), 1);

		stop.cancel();
		tokio::time::timeout(Duration::from_millis(100), handle)
			.await
			.expect("watcher observed stop within one tick")
			.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn reports_once_per_interval() {
		let f = fixture(unix_now);
		f.backend
			.create_interface(&mesh_wgconf::model::InterfaceSpec {
				name: "mesh_PUBLIC".into(),
				internal_ip: None,
				listen_port: None,
			})
			.await
			.unwrap();
		let stop = CancellationToken::new();
		let handle = tokio::spawn(f.watcher.clone().run(stop.clone()));

		let reports = f
			.sink
			.wait_for(report_types::IFACES_PEERS_BW_DATA, 3, Duration::from_secs(60))
			.await;
		assert_eq!(reports.len(), 3, "one report per 10s interval");

		stop.cancel();
		handle.await.unwrap();
	}
}
