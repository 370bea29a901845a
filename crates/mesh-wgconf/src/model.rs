// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Desired-state payloads from the controller and the host-side view of
//! interfaces, peers and routes.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, WgConfError};
use crate::keys::PublicKey;

pub mod ops {
	pub const CREATE_INTERFACE: &str = "create_interface";
	pub const ADD_PEER: &str = "add_peer";
	pub const REMOVE_PEER: &str = "remove_peer";
	pub const REMOVE_INTERFACE: &str = "remove_interface";
}

/// A WireGuard interface as it currently exists on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
	pub name: String,
	pub public_key: PublicKey,
	pub listen_port: u16,
	pub internal_ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
	pub public_key: PublicKey,
	pub allowed_ips: BTreeSet<IpNet>,
	pub endpoint: Option<SocketAddr>,
	pub rx_bytes: u64,
	pub tx_bytes: u64,
	/// Unix seconds of the last handshake, `None` if there never was one.
	pub latest_handshake: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
	pub destination: IpNet,
	pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
	pub name: String,
	pub internal_ip: Option<IpAddr>,
	pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
	pub public_key: PublicKey,
	pub allowed_ips: BTreeSet<IpNet>,
	pub endpoint: Option<SocketAddr>,
	pub persistent_keepalive: Option<u16>,
}

impl PeerSpec {
	/// Whether an existing peer already carries this configuration.
	pub fn matches(&self, peer: &PeerRecord) -> bool {
		peer.public_key == self.public_key
			&& peer.allowed_ips == self.allowed_ips
			&& (self.endpoint.is_none() || peer.endpoint == self.endpoint)
	}
}

/// Full target configuration pushed by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredMeshState {
	#[serde(default)]
	pub network: BTreeMap<String, LinkSpec>,
	#[serde(default)]
	pub vpn: Vec<VpnCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
	#[serde(default, deserialize_with = "de_opt_addr")]
	pub internal_ip: Option<IpAddr>,
	#[serde(default)]
	pub public_key: Option<String>,
	#[serde(default)]
	pub listen_port: Option<u16>,
}

/// One raw operation from the controller, parsed lazily so a malformed entry
/// only fails itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnCommand {
	#[serde(rename = "fn")]
	pub op: String,
	#[serde(default)]
	pub args: Value,
	#[serde(default)]
	pub metadata: Value,
}

impl VpnCommand {
	pub fn new(op: impl Into<String>, args: Value) -> Self {
		Self {
			op: op.into(),
			args,
			metadata: Value::Null,
		}
	}

	pub fn parse(&self) -> Result<VpnOperation> {
		VpnOperation::parse(&self.op, &self.args)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum VpnOperation {
	CreateInterface(CreateInterfaceArgs),
	AddPeer(AddPeerArgs),
	RemovePeer(RemovePeerArgs),
	RemoveInterface(RemoveInterfaceArgs),
}

impl VpnOperation {
	pub fn parse(op: &str, args: &Value) -> Result<Self> {
		fn args_of<T: for<'de> Deserialize<'de>>(op: &str, args: &Value) -> Result<T> {
			T::deserialize(args).map_err(|source| WgConfError::InvalidArguments {
				op: op.to_string(),
				source,
			})
		}

		match op {
			ops::CREATE_INTERFACE => Ok(Self::CreateInterface(args_of(op, args)?)),
			ops::ADD_PEER => Ok(Self::AddPeer(args_of(op, args)?)),
			ops::REMOVE_PEER => Ok(Self::RemovePeer(args_of(op, args)?)),
			ops::REMOVE_INTERFACE => Ok(Self::RemoveInterface(args_of(op, args)?)),
			other => Err(WgConfError::UnknownOperation(other.to_string())),
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::CreateInterface(_) => ops::CREATE_INTERFACE,
			Self::AddPeer(_) => ops::ADD_PEER,
			Self::RemovePeer(_) => ops::REMOVE_PEER,
			Self::RemoveInterface(_) => ops::REMOVE_INTERFACE,
		}
	}

	pub fn ifname(&self) -> &str {
		match self {
			Self::CreateInterface(a) => &a.ifname,
			Self::AddPeer(a) => &a.ifname,
			Self::RemovePeer(a) => &a.ifname,
			Self::RemoveInterface(a) => &a.ifname,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateInterfaceArgs {
	pub ifname: String,
	#[serde(default, deserialize_with = "de_opt_addr")]
	pub internal_ip: Option<IpAddr>,
	#[serde(default)]
	pub public_key: Option<String>,
	#[serde(default)]
	pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddPeerArgs {
	pub ifname: String,
	pub public_key: PublicKey,
	#[serde(default, deserialize_with = "de_nets")]
	pub allowed_ips: Vec<IpNet>,
	#[serde(default)]
	pub endpoint_ipv4: Option<IpAddr>,
	#[serde(default)]
	pub endpoint_port: Option<u16>,
	#[serde(default)]
	pub persistent_keepalive: Option<u16>,
}

impl AddPeerArgs {
	pub fn endpoint(&self) -> Option<SocketAddr> {
		match (self.endpoint_ipv4, self.endpoint_port) {
			(Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
			_ => None,
		}
	}

	pub fn to_spec(&self) -> PeerSpec {
		PeerSpec {
			public_key: self.public_key,
			allowed_ips: self.allowed_ips.iter().copied().collect(),
			endpoint: self.endpoint(),
			persistent_keepalive: self.persistent_keepalive,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemovePeerArgs {
	pub ifname: String,
	pub public_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoveInterfaceArgs {
	pub ifname: String,
}

/// Reported back when the host outcome differs from what was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
	#[serde(rename = "fn")]
	pub op: String,
	pub data: Value,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub metadata: Value,
}

/// Authoritative interface values as sent to the controller, keyed by the
/// controller's link name rather than the host device name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceReport {
	pub ifname: String,
	pub public_key: PublicKey,
	pub listen_port: u16,
	pub internal_ip: Option<IpAddr>,
}

/// Accepts `10.0.0.1/32` as well as a bare `10.0.0.1` (host route). Host bits
/// are cleared, matching what the kernel reports back and what `ip route`
/// accepts.
pub fn parse_net(s: &str) -> std::result::Result<IpNet, std::net::AddrParseError> {
	let s = s.trim();
	s.parse::<IpNet>()
		.or_else(|_| s.parse::<IpAddr>().map(IpNet::from))
		.map(|net| net.trunc())
}

fn de_nets<'de, D>(deserializer: D) -> std::result::Result<Vec<IpNet>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Joined(String),
		List(Vec<String>),
	}

	let items = match Option::<Raw>::deserialize(deserializer)? {
		None => Vec::new(),
		Some(Raw::Joined(s)) => s
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(String::from)
			.collect(),
		Some(Raw::List(v)) => v,
	};

	items
		.iter()
		.map(|s| parse_net(s).map_err(|e| serde::de::Error::custom(format!("{s}: {e}"))))
		.collect()
}

fn de_opt_addr<'de, D>(deserializer: D) -> std::result::Result<Option<IpAddr>, D::Error>
where
	D: Deserializer<'de>,
{
	let Some(s) = Option::<String>::deserialize(deserializer)? else {
		return Ok(None);
	};
	let addr = s.split('/').next().unwrap_or_default().trim();
	addr
		.parse()
		.map(Some)
		.map_err(|e| serde::de::Error::custom(format!("{s}: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	const KEY: &str = "G7gF5ZMgIe9GAnDedtg9ztb232tbrqaW4DUPUrqA5mo=";

	#[test]
	fn desired_state_parses_controller_payload() {
		let state: DesiredMeshState = serde_json::from_value(json!({
			"network": {"PUBLIC": {"internal_ip": "10.69.14.97"}},
			"vpn": [
				{"fn": "create_interface", "args": {"ifname": "PUBLIC", "listen_port": 51820}},
				{"fn": "add_peer", "args": {
					"ifname": "PUBLIC",
					"public_key": KEY,
					"allowed_ips": ["10.69.13.49/32", "10.69.13.50"],
					"endpoint_ipv4": "203.0.113.7",
					"endpoint_port": 51820
				}, "metadata": {"link": 7}}
			]
		}))
		.unwrap();

		assert_eq!(
			state.network["PUBLIC"].internal_ip,
			Some("10.69.14.97".parse().unwrap())
		);
		assert_eq!(state.vpn.len(), 2);
		assert_eq!(state.vpn[1].metadata, json!({"link": 7}));

		let VpnOperation::AddPeer(args) = state.vpn[1].parse().unwrap() else {
			panic!("expected add_peer");
		};
		assert_eq!(args.allowed_ips.len(), 2);
		assert_eq!(args.endpoint(), Some("203.0.113.7:51820".parse().unwrap()));
	}

	#[test]
	fn allowed_ips_accepts_comma_joined_string() {
		let op = VpnOperation::parse(
			"add_peer",
			&json!({"ifname": "a", "public_key": KEY, "allowed_ips": "10.0.0.1/32, 10.0.1.0/24"}),
		)
		.unwrap();
		let VpnOperation::AddPeer(args) = op else {
			panic!("expected add_peer");
		};
		assert_eq!(
			args.allowed_ips,
			vec![
				"10.0.0.1/32".parse::<IpNet>().unwrap(),
				"10.0.1.0/24".parse().unwrap()
			]
		);
	}

	#[test]
	fn unknown_operation_is_rejected() {
		let err = VpnCommand::new("teleport", json!({})).parse().unwrap_err();
		assert!(matches!(err, WgConfError::UnknownOperation(op) if op == "teleport"));
	}

	#[test]
	fn bad_arguments_name_the_operation() {
		let err = VpnOperation::parse("add_peer", &json!({"ifname": "a", "public_key": "nope"}))
			.unwrap_err();
		assert!(matches!(err, WgConfError::InvalidArguments { op, .. } if op == "add_peer"));
	}

	#[test]
	fn internal_ip_tolerates_prefix_length() {
		let link: LinkSpec = serde_json::from_value(json!({"internal_ip": "10.1.2.3/24"})).unwrap();
		assert_eq!(link.internal_ip, Some("10.1.2.3".parse().unwrap()));
	}

	#[test]
	fn peer_spec_match_ignores_counters() {
		let key: PublicKey = KEY.parse().unwrap();
		let spec = PeerSpec {
			public_key: key,
			allowed_ips: ["10.0.0.1/32".parse().unwrap()].into_iter().collect(),
			endpoint: None,
			persistent_keepalive: None,
		};
		let record = PeerRecord {
			public_key: key,
			allowed_ips: spec.allowed_ips.clone(),
			endpoint: Some("192.0.2.1:51820".parse().unwrap()),
			rx_bytes: 10,
			tx_bytes: 20,
			latest_handshake: Some(1),
		};
		assert!(spec.matches(&record));
	}

	#[test]
	fn allowed_ips_drop_host_bits() {
		let op = VpnOperation::parse(
			"add_peer",
			&json!({"ifname": "a", "public_key": KEY, "allowed_ips": ["93.191.198.130/26", "10.0.0.7"]}),
		)
		.unwrap();
		let VpnOperation::AddPeer(args) = op else {
			panic!("expected add_peer");
		};
		let spec = args.to_spec();
		let kernel: BTreeSet<IpNet> = ["93.191.198.128/26".parse().unwrap(), "10.0.0.7/32".parse().unwrap()]
			.into_iter()
			.collect();
		assert_eq!(spec.allowed_ips, kernel);

		let record = PeerRecord {
			public_key: spec.public_key,
			allowed_ips: kernel,
			endpoint: None,
			rx_bytes: 0,
			tx_bytes: 0,
			latest_handshake: None,
		};
		assert!(spec.matches(&record));
	}

	#[test]
	fn parse_net_truncates_to_network_address() {
		assert_eq!(
			parse_net(" 192.168.1.77/24 ").unwrap(),
			"192.168.1.0/24".parse::<IpNet>().unwrap()
		);
		assert_eq!(
			parse_net("fd00::1:2/64").unwrap(),
			"fd00::/64".parse::<IpNet>().unwrap()
		);
	}

	#[test]
	fn report_entry_omits_null_metadata() {
		let entry = ReportEntry {
			op: "create_interface".into(),
			data: json!({"ifname": "PUBLIC"}),
			metadata: Value::Null,
		};
		assert_eq!(
			serde_json::to_value(&entry).unwrap(),
			json!({"fn": "create_interface", "data": {"ifname": "PUBLIC"}})
		);
	}
}
