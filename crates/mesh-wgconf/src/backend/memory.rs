// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MeshBackend;
use crate::error::BackendError;
use crate::keys::{PrivateKey, PublicKey};
use crate::model::{InterfaceSpec, InterfaceState, PeerRecord, PeerSpec, Route};

const FIRST_EPHEMERAL_PORT: u16 = 51820;

#[derive(Debug, Clone)]
struct MemInterface {
	public_key: PublicKey,
	listen_port: u16,
	internal_ip: Option<std::net::IpAddr>,
	peers: BTreeMap<PublicKey, PeerRecord>,
}

#[derive(Debug, Default)]
struct State {
	interfaces: BTreeMap<String, MemInterface>,
	routes: BTreeSet<Route>,
	/// Ports held by something other than our interfaces.
	reserved_ports: HashSet<u16>,
	rejected_peers: HashSet<PublicKey>,
}

/// In-process stand-in for the kernel. Counts every state change so tests can
/// assert that converged state is left alone.
#[derive(Debug, Default)]
pub struct MemoryBackend {
	state: RwLock<State>,
	mutations: AtomicUsize,
	failing_listings: AtomicUsize,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of calls that changed host state.
	pub fn mutations(&self) -> usize {
		self.mutations.load(Ordering::SeqCst)
	}

	/// Marks a port as taken, so an interface asking for it gets another one.
	pub async fn reserve_port(&self, port: u16) {
		self.state.write().await.reserved_ports.insert(port);
	}

	/// Makes `add_peer` fail for this key.
	pub async fn reject_peer(&self, key: PublicKey) {
		self.state.write().await.rejected_peers.insert(key);
	}

	/// Makes the next `times` calls to `list_interfaces` fail.
	pub fn fail_listings(&self, times: usize) {
		self.failing_listings.store(times, Ordering::SeqCst);
	}

	/// Overwrites the transfer counters of a peer, as traffic would.
	pub async fn set_counters(&self, iface: &str, key: &PublicKey, rx_bytes: u64, tx_bytes: u64) {
		let mut state = self.state.write().await;
		if let Some(peer) = state
			.interfaces
			.get_mut(iface)
			.and_then(|i| i.peers.get_mut(key))
		{
			peer.rx_bytes = rx_bytes;
			peer.tx_bytes = tx_bytes;
		}
	}

	/// Adds a route that no peer installed, e.g. left over from an earlier run.
	pub async fn insert_route(&self, route: Route) {
		self.state.write().await.routes.insert(route);
	}

	pub async fn routes(&self) -> Vec<Route> {
		self.state.read().await.routes.iter().cloned().collect()
	}

	fn bump(&self) {
		self.mutations.fetch_add(1, Ordering::SeqCst);
	}
}

fn free_port(state: &State, wanted: Option<u16>) -> u16 {
	let used: HashSet<u16> = state
		.interfaces
		.values()
		.map(|i| i.listen_port)
		.chain(state.reserved_ports.iter().copied())
		.collect();

	if let Some(port) = wanted {
		if !used.contains(&port) {
			return port;
		}
	}
	(FIRST_EPHEMERAL_PORT..=u16::MAX)
		.find(|p| !used.contains(p))
		.unwrap_or(FIRST_EPHEMERAL_PORT)
}

fn to_state(name: &str, iface: &MemInterface) -> InterfaceState {
	InterfaceState {
		name: name.to_string(),
		public_key: iface.public_key,
		listen_port: iface.listen_port,
		internal_ip: iface.internal_ip,
	}
}

#[async_trait]
impl MeshBackend for MemoryBackend {
	async fn list_interfaces(&self) -> Result<Vec<InterfaceState>, BackendError> {
		let failing = self
			.failing_listings
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
		if failing.is_ok() {
			return Err(BackendError::Rejected("interface listing unavailable".into()));
		}
		let state = self.state.read().await;
		Ok(state
			.interfaces
			.iter()
			.map(|(name, iface)| to_state(name, iface))
			.collect())
	}

	async fn list_peers(&self, iface: &str) -> Result<Vec<PeerRecord>, BackendError> {
		let state = self.state.read().await;
		let iface = state
			.interfaces
			.get(iface)
			.ok_or_else(|| BackendError::InterfaceNotFound(iface.to_string()))?;
		Ok(iface.peers.values().cloned().collect())
	}

	async fn create_interface(&self, spec: &InterfaceSpec) -> Result<InterfaceState, BackendError> {
		let mut state = self.state.write().await;

		if !state.interfaces.contains_key(&spec.name) {
			let port = free_port(&state, spec.listen_port);
			state.interfaces.insert(
				spec.name.clone(),
				MemInterface {
					public_key: PrivateKey::generate().public_key(),
					listen_port: port,
					internal_ip: spec.internal_ip,
					peers: BTreeMap::new(),
				},
			);
			self.bump();
		} else {
			let current_port = state.interfaces[&spec.name].listen_port;
			let port = match spec.listen_port {
				Some(wanted) if wanted != current_port => Some(free_port(&state, Some(wanted))),
				_ => None,
			};
			let mut changed = false;
			if let Some(iface) = state.interfaces.get_mut(&spec.name) {
				if let Some(port) = port {
					iface.listen_port = port;
					changed = true;
				}
				if spec.internal_ip.is_some() && spec.internal_ip != iface.internal_ip {
					iface.internal_ip = spec.internal_ip;
					changed = true;
				}
			}
			if changed {
				self.bump();
			}
		}

		let iface = state
			.interfaces
			.get(&spec.name)
			.ok_or_else(|| BackendError::InterfaceNotFound(spec.name.clone()))?;
		Ok(to_state(&spec.name, iface))
	}

	async fn add_peer(&self, iface: &str, peer: &PeerSpec) -> Result<(), BackendError> {
		let mut state = self.state.write().await;
		if state.rejected_peers.contains(&peer.public_key) {
			return Err(BackendError::Rejected(format!("peer {}", peer.public_key)));
		}

		let entry = state
			.interfaces
			.get_mut(iface)
			.ok_or_else(|| BackendError::InterfaceNotFound(iface.to_string()))?;
		let previous = entry.peers.get(&peer.public_key);
		let record = PeerRecord {
			public_key: peer.public_key,
			allowed_ips: peer.allowed_ips.clone(),
			endpoint: peer.endpoint.or(previous.and_then(|p| p.endpoint)),
			rx_bytes: previous.map_or(0, |p| p.rx_bytes),
			tx_bytes: previous.map_or(0, |p| p.tx_bytes),
			latest_handshake: previous.and_then(|p| p.latest_handshake),
		};
		entry.peers.insert(peer.public_key, record);

		for net in &peer.allowed_ips {
			state.routes.insert(Route {
				destination: *net,
				interface: iface.to_string(),
			});
		}
		self.bump();
		Ok(())
	}

	async fn remove_peer(&self, iface: &str, public_key: &PublicKey) -> Result<(), BackendError> {
		let mut state = self.state.write().await;
		let entry = state
			.interfaces
			.get_mut(iface)
			.ok_or_else(|| BackendError::InterfaceNotFound(iface.to_string()))?;

		if let Some(peer) = entry.peers.remove(public_key) {
			state
				.routes
				.retain(|r| !(r.interface == iface && peer.allowed_ips.contains(&r.destination)));
			self.bump();
		}
		Ok(())
	}

	async fn remove_interface(&self, iface: &str) -> Result<(), BackendError> {
		let mut state = self.state.write().await;
		if state.interfaces.remove(iface).is_none() {
			return Err(BackendError::InterfaceNotFound(iface.to_string()));
		}
		state.routes.retain(|r| r.interface != iface);
		self.bump();
		Ok(())
	}

	async fn list_routes(&self) -> Result<Vec<Route>, BackendError> {
		Ok(self.routes().await)
	}

	async fn remove_route(&self, route: &Route) -> Result<(), BackendError> {
		if self.state.write().await.routes.remove(route) {
			self.bump();
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec(name: &str, port: Option<u16>) -> InterfaceSpec {
		InterfaceSpec {
			name: name.to_string(),
			internal_ip: None,
			listen_port: port,
		}
	}

	#[tokio::test]
	async fn create_is_idempotent_and_keeps_key() {
		let backend = MemoryBackend::new();
		let first = backend.create_interface(&spec("mesh_a", Some(51900))).await.unwrap();
		let second = backend.create_interface(&spec("mesh_a", Some(51900))).await.unwrap();

		assert_eq!(first, second);
		assert_eq!(backend.mutations(), 1);
	}

	#[tokio::test]
	async fn taken_port_is_substituted() {
		let backend = MemoryBackend::new();
		backend.reserve_port(51820).await;
		let iface = backend.create_interface(&spec("mesh_a", Some(51820))).await.unwrap();
		assert_ne!(iface.listen_port, 51820);
	}

	#[tokio::test]
	async fn removing_peer_drops_its_routes() {
		let backend = MemoryBackend::new();
		backend.create_interface(&spec("mesh_a", None)).await.unwrap();
		let key = PrivateKey::generate().public_key();
		backend
			.add_peer(
				"mesh_a",
				&PeerSpec {
					public_key: key,
					allowed_ips: ["10.0.0.2/32".parse().unwrap()].into_iter().collect(),
					endpoint: None,
					persistent_keepalive: None,
				},
			)
			.await
			.unwrap();
		assert_eq!(backend.routes().await.len(), 1);

		backend.remove_peer("mesh_a", &key).await.unwrap();
		assert!(backend.routes().await.is_empty());
		assert!(backend.list_peers("mesh_a").await.unwrap().is_empty());
	}
}
