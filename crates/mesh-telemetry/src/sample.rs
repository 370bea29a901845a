// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer counter samples and the throughput derived from two of them.

use std::collections::BTreeMap;

use mesh_wgconf::PeerRecord;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Store key the latest sample is persisted under.
pub const PEERS_INFO_KEY: &str = "peers_info";

const BYTES_PER_MB: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSample {
	#[serde(flatten)]
	pub record: PeerRecord,
	/// Unix seconds at which the counters were read.
	pub timestamp: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rx_speed_mbps: Option<f64>,
	/// Negative: transmit is reported with inverted sign.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tx_speed_mbps: Option<f64>,
}

impl PeerSample {
	pub fn new(record: PeerRecord, timestamp: f64) -> Self {
		Self {
			record,
			timestamp,
			rx_speed_mbps: None,
			tx_speed_mbps: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSample {
	pub iface_public_key: String,
	/// Keyed by the peer's base64 public key.
	pub peers: BTreeMap<String, PeerSample>,
}

/// Interface name to its peers, one generation of samples.
pub type PeerSnapshot = BTreeMap<String, InterfaceSample>;

/// Fills in rates on `new` for every peer also present in `old`.
///
/// Peers seen for the first time, samples with a non-positive time delta,
/// and counters that went backwards (interface recreated) get no rate.
pub fn calculate_bw(old: &PeerSnapshot, mut new: PeerSnapshot) -> PeerSnapshot {
	for (iface, sample) in new.iter_mut() {
		let Some(old_iface) = old.get(iface) else {
			continue;
		};
		for (key, peer) in sample.peers.iter_mut() {
			let Some(old_peer) = old_iface.peers.get(key) else {
				continue;
			};
			let elapsed = peer.timestamp - old_peer.timestamp;
			if elapsed <= 0.0 {
				continue;
			}
			let (Some(rx), Some(tx)) = (
				peer.record.rx_bytes.checked_sub(old_peer.record.rx_bytes),
				peer.record.tx_bytes.checked_sub(old_peer.record.tx_bytes),
			) else {
				continue;
			};

			peer.rx_speed_mbps = Some((rx as f64 / BYTES_PER_MB) / elapsed);
			peer.tx_speed_mbps = Some(-((tx as f64 / BYTES_PER_MB) / elapsed));
		}
	}
	new
}

/// Shapes a snapshot into the `IFACES_PEERS_BW_DATA` payload.
pub fn format_for_controller(snapshot: &PeerSnapshot) -> Value {
	Value::Array(
		snapshot
			.iter()
			.map(|(iface, sample)| {
				json!({
					"iface": iface,
					"iface_public_key": sample.iface_public_key,
					"peers": sample.peers.values().collect::<Vec<_>>(),
				})
			})
			.collect(),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_wgconf::PrivateKey;
	use proptest::prelude::*;

	fn record(rx: u64, tx: u64) -> PeerRecord {
		PeerRecord {
			public_key: PrivateKey::from_base64("YNqHwpcAmVj0lVzPSt0DwR9sLpU1ViZ+C1M3ayhI7Vc=")
				.unwrap()
				.public_key(),
			allowed_ips: ["10.69.13.49/32".parse().unwrap()].into_iter().collect(),
			endpoint: Some("203.0.113.7:51820".parse().unwrap()),
			rx_bytes: rx,
			tx_bytes: tx,
			latest_handshake: Some(1_700_000_000),
		}
	}

	fn snapshot(peers: Vec<(&str, PeerSample)>) -> PeerSnapshot {
		let mut snapshot = PeerSnapshot::new();
		snapshot.insert(
			"mesh_PUBLIC".into(),
			InterfaceSample {
				iface_public_key: "iface-key".into(),
				peers: peers.into_iter().map(|(k, p)| (k.to_string(), p)).collect(),
			},
		);
		snapshot
	}

	#[test]
	fn rates_over_ten_seconds() {
		let old = snapshot(vec![("p", PeerSample::new(record(1_000_000, 500_000), 1000.0))]);
		let new = snapshot(vec![("p", PeerSample::new(record(2_000_000, 1_500_000), 1010.0))]);

		let result = calculate_bw(&old, new);
		let peer = &result["mesh_PUBLIC"].peers["p"];
		assert!((peer.rx_speed_mbps.unwrap() - 0.1).abs() < 1e-12);
		assert!((peer.tx_speed_mbps.unwrap() + 0.1).abs() < 1e-12);
	}

	#[test]
	fn new_peer_has_no_rates() {
		let old = snapshot(vec![("p", PeerSample::new(record(1, 1), 1000.0))]);
		let new = snapshot(vec![
			("p", PeerSample::new(record(1, 1), 1010.0)),
			("q", PeerSample::new(record(5, 5), 1010.0)),
		]);

		let result = calculate_bw(&old, new);
		let q = &result["mesh_PUBLIC"].peers["q"];
		assert_eq!(q.rx_speed_mbps, None);
		assert_eq!(q.tx_speed_mbps, None);

		let json = serde_json::to_value(q).unwrap();
		assert!(json.get("rx_speed_mbps").is_none());
	}

	#[test]
	fn empty_previous_generation_yields_no_rates() {
		let new = snapshot(vec![("p", PeerSample::new(record(10, 10), 1010.0))]);
		let result = calculate_bw(&PeerSnapshot::new(), new.clone());
		assert_eq!(result, new);
	}

	#[test]
	fn zero_elapsed_time_is_skipped() {
		let old = snapshot(vec![("p", PeerSample::new(record(1, 1), 1000.0))]);
		let new = snapshot(vec![("p", PeerSample::new(record(2, 2), 1000.0))]);
		let result = calculate_bw(&old, new);
		assert_eq!(result["mesh_PUBLIC"].peers["p"].rx_speed_mbps, None);
	}

	#[test]
	fn counter_reset_is_skipped() {
		let old = snapshot(vec![("p", PeerSample::new(record(5_000, 5_000), 1000.0))]);
		let new = snapshot(vec![("p", PeerSample::new(record(10, 10), 1010.0))]);
		let result = calculate_bw(&old, new);
		assert_eq!(result["mesh_PUBLIC"].peers["p"].tx_speed_mbps, None);
	}

	#[test]
	fn sample_serializes_flat_for_the_controller() {
		let mut sample = PeerSample::new(record(1, 2), 1000.5);
		sample.rx_speed_mbps = Some(0.5);
		sample.tx_speed_mbps = Some(-0.25);
		let value = serde_json::to_value(&sample).unwrap();

		assert_eq!(value["rx_bytes"], 1);
		assert_eq!(value["tx_bytes"], 2);
		assert_eq!(value["timestamp"], 1000.5);
		assert_eq!(value["rx_speed_mbps"], 0.5);
		assert_eq!(value["tx_speed_mbps"], -0.25);
		assert!(value["public_key"].is_string());

		let back: PeerSample = serde_json::from_value(value).unwrap();
		assert_eq!(back, sample);
	}

	#[test]
	fn controller_payload_lists_interfaces() {
		let snap = snapshot(vec![("p", PeerSample::new(record(1, 2), 1.0))]);
		let payload = format_for_controller(&snap);
		assert_eq!(payload[0]["iface"], "mesh_PUBLIC");
		assert_eq!(payload[0]["iface_public_key"], "iface-key");
		assert_eq!(payload[0]["peers"].as_array().unwrap().len(), 1);
	}

	proptest! {
		#[test]
		fn rx_rate_non_negative_and_tx_non_positive(
			rx_old in 0u64..1_000_000_000,
			rx_delta in 0u64..1_000_000_000,
			tx_old in 0u64..1_000_000_000,
			tx_delta in 0u64..1_000_000_000,
			elapsed in 0.001f64..3600.0,
		) {
			let old = snapshot(vec![("p", PeerSample::new(record(rx_old, tx_old), 1000.0))]);
			let new = snapshot(vec![(
				"p",
				PeerSample::new(record(rx_old + rx_delta, tx_old + tx_delta), 1000.0 + elapsed),
			)]);

			let result = calculate_bw(&old, new);
			let peer = &result["mesh_PUBLIC"].peers["p"];
			let rx = peer.rx_speed_mbps.unwrap();
			let tx = peer.tx_speed_mbps.unwrap();
			prop_assert!(rx >= 0.0);
			prop_assert!(tx <= 0.0);
			let expected = (rx_delta as f64 / BYTES_PER_MB) / ((1000.0 + elapsed) - 1000.0);
			prop_assert!((rx - expected).abs() <= expected.abs() * 1e-9 + 1e-12);
		}
	}
}
