// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use mesh_common_core::{run_command, run_command_with_stdin};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::MeshBackend;
use crate::error::BackendError;
use crate::keys::{PrivateKey, PublicKey};
use crate::model::{parse_net, InterfaceSpec, InterfaceState, PeerRecord, PeerSpec, Route};

/// Drives the kernel through the `wg` and `ip` tools.
pub struct CommandBackend;

impl CommandBackend {
	pub fn new() -> Self {
		Self
	}

	async fn dump(&self) -> Result<WgDump, BackendError> {
		let output = run_command("wg", &["show", "all", "dump"]).await?;
		parse_wg_dump(&output)
	}

	async fn find_interface(&self, name: &str) -> Result<Option<InterfaceState>, BackendError> {
		Ok(self
			.list_interfaces()
			.await?
			.into_iter()
			.find(|iface| iface.name == name))
	}
}

impl Default for CommandBackend {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl MeshBackend for CommandBackend {
	async fn list_interfaces(&self) -> Result<Vec<InterfaceState>, BackendError> {
		let dump = self.dump().await?;
		if dump.interfaces.is_empty() {
			return Ok(Vec::new());
		}

		let addrs = parse_ip_addr_json(&run_command("ip", &["-j", "addr", "show"]).await?)?;

		Ok(dump
			.interfaces
			.into_iter()
			.map(|(name, public_key, listen_port)| InterfaceState {
				internal_ip: addrs.get(&name).copied(),
				name,
				public_key,
				listen_port,
			})
			.collect())
	}

	async fn list_peers(&self, iface: &str) -> Result<Vec<PeerRecord>, BackendError> {
		let dump = self.dump().await?;
		if !dump.interfaces.iter().any(|(name, _, _)| name == iface) {
			return Err(BackendError::InterfaceNotFound(iface.to_string()));
		}
		Ok(dump
			.peers
			.into_iter()
			.filter(|(name, _)| name == iface)
			.map(|(_, peer)| peer)
			.collect())
	}

	#[instrument(skip(self), fields(iface = %spec.name))]
	async fn create_interface(&self, spec: &InterfaceSpec) -> Result<InterfaceState, BackendError> {
		let existing = self.find_interface(&spec.name).await?;

		if existing.is_none() {
			run_command("ip", &["link", "add", "dev", &spec.name, "type", "wireguard"]).await?;
			let private_key = PrivateKey::generate();
			run_command_with_stdin(
				"wg",
				&["set", &spec.name, "private-key", "/dev/stdin"],
				&private_key.to_base64(),
			)
			.await?;
			info!(public_key = %private_key.public_key(), "created wireguard interface");
		}

		if let Some(port) = spec.listen_port {
			if existing.as_ref().map(|i| i.listen_port) != Some(port) {
				let port = port.to_string();
				run_command("wg", &["set", &spec.name, "listen-port", &port]).await?;
			}
		}

		if let Some(ip) = spec.internal_ip {
			let addr = IpNet::from(ip).to_string();
			run_command("ip", &["address", "replace", &addr, "dev", &spec.name]).await?;
		}

		run_command("ip", &["link", "set", "up", "dev", &spec.name]).await?;

		self
			.find_interface(&spec.name)
			.await?
			.ok_or_else(|| BackendError::InterfaceNotFound(spec.name.clone()))
	}

	#[instrument(skip(self, peer), fields(peer = %peer.public_key))]
	async fn add_peer(&self, iface: &str, peer: &PeerSpec) -> Result<(), BackendError> {
		let key = peer.public_key.to_string();
		let allowed = peer
			.allowed_ips
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join(",");

		let mut args: Vec<String> = vec![
			"set".into(),
			iface.into(),
			"peer".into(),
			key,
			"allowed-ips".into(),
			allowed,
		];
		if let Some(endpoint) = peer.endpoint {
			args.push("endpoint".into());
			args.push(endpoint.to_string());
		}
		if let Some(keepalive) = peer.persistent_keepalive {
			args.push("persistent-keepalive".into());
			args.push(keepalive.to_string());
		}
		let args: Vec<&str> = args.iter().map(String::as_str).collect();
		run_command("wg", &args).await?;

		for net in &peer.allowed_ips {
			let dest = net.to_string();
			run_command(
				"ip",
				&["route", "replace", &dest, "dev", iface, "proto", "static"],
			)
			.await?;
		}

		debug!(allowed_ips = peer.allowed_ips.len(), "peer configured");
		Ok(())
	}

	#[instrument(skip(self), fields(peer = %public_key))]
	async fn remove_peer(&self, iface: &str, public_key: &PublicKey) -> Result<(), BackendError> {
		let allowed = self
			.list_peers(iface)
			.await?
			.into_iter()
			.find(|p| &p.public_key == public_key)
			.map(|p| p.allowed_ips)
			.unwrap_or_default();

		let key = public_key.to_string();
		run_command("wg", &["set", iface, "peer", &key, "remove"]).await?;

		for net in allowed {
			let dest = net.to_string();
			if let Err(e) = run_command("ip", &["route", "del", &dest, "dev", iface]).await {
				debug!(route = %dest, error = %e, "route already gone");
			}
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn remove_interface(&self, iface: &str) -> Result<(), BackendError> {
		run_command("ip", &["link", "delete", "dev", iface]).await?;
		Ok(())
	}

	async fn list_routes(&self) -> Result<Vec<Route>, BackendError> {
		let dump = self.dump().await?;
		let wg_ifaces: BTreeSet<String> = dump.interfaces.into_iter().map(|(n, _, _)| n).collect();
		if wg_ifaces.is_empty() {
			return Ok(Vec::new());
		}

		let output = run_command("ip", &["-j", "route", "show", "table", "main"]).await?;
		Ok(parse_ip_route_json(&output)?
			.into_iter()
			.filter(|r| wg_ifaces.contains(&r.interface))
			.collect())
	}

	#[instrument(skip(self), fields(route = %route.destination, iface = %route.interface))]
	async fn remove_route(&self, route: &Route) -> Result<(), BackendError> {
		let dest = route.destination.to_string();
		run_command("ip", &["route", "del", &dest, "dev", &route.interface]).await?;
		Ok(())
	}
}

#[derive(Debug, Default)]
struct WgDump {
	interfaces: Vec<(String, PublicKey, u16)>,
	peers: Vec<(String, PeerRecord)>,
}

/// Parses `wg show all dump`: five tab-separated fields per interface line,
/// nine per peer line.
fn parse_wg_dump(output: &str) -> Result<WgDump, BackendError> {
	let mut dump = WgDump::default();

	for line in output.lines().filter(|l| !l.trim().is_empty()) {
		let fields: Vec<&str> = line.split('\t').collect();
		match fields.len() {
			5 => {
				let public_key = parse_key(fields[2])?;
				let listen_port = fields[3].parse().map_err(|_| dump_error(line))?;
				dump
					.interfaces
					.push((fields[0].to_string(), public_key, listen_port));
			}
			9 => {
				let endpoint = match fields[3] {
					"(none)" => None,
					ep => Some(ep.parse().map_err(|_| dump_error(line))?),
				};
				let allowed_ips = match fields[4] {
					"(none)" | "" => BTreeSet::new(),
					ips => ips
						.split(',')
						.map(|s| parse_net(s).map_err(|_| dump_error(line)))
						.collect::<Result<_, _>>()?,
				};
				let handshake: u64 = fields[5].parse().map_err(|_| dump_error(line))?;

				dump.peers.push((
					fields[0].to_string(),
					PeerRecord {
						public_key: parse_key(fields[1])?,
						allowed_ips,
						endpoint,
						rx_bytes: fields[6].parse().map_err(|_| dump_error(line))?,
						tx_bytes: fields[7].parse().map_err(|_| dump_error(line))?,
						latest_handshake: (handshake != 0).then_some(handshake),
					},
				));
			}
			_ => return Err(dump_error(line)),
		}
	}

	Ok(dump)
}

fn parse_key(s: &str) -> Result<PublicKey, BackendError> {
	PublicKey::from_base64(s).map_err(|e| BackendError::Parse {
		what: "wg dump key",
		reason: e.to_string(),
	})
}

fn dump_error(line: &str) -> BackendError {
	BackendError::Parse {
		what: "wg dump line",
		reason: line.to_string(),
	}
}

#[derive(Debug, Deserialize)]
struct IpLink {
	ifname: String,
	#[serde(default)]
	addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
	local: Option<IpAddr>,
}

/// First address per interface from `ip -j addr show`.
fn parse_ip_addr_json(output: &str) -> Result<HashMap<String, IpAddr>, BackendError> {
	let links: Vec<IpLink> = serde_json::from_str(output).map_err(|e| BackendError::Parse {
		what: "ip addr json",
		reason: e.to_string(),
	})?;

	Ok(links
		.into_iter()
		.filter_map(|link| {
			let addr = link.addr_info.iter().find_map(|a| a.local)?;
			Some((link.ifname, addr))
		})
		.collect())
}

#[derive(Debug, Deserialize)]
struct IpRoute {
	dst: String,
	dev: Option<String>,
	protocol: Option<String>,
}

/// Routes from `ip -j route show`, skipping kernel-generated and default
/// routes.
fn parse_ip_route_json(output: &str) -> Result<Vec<Route>, BackendError> {
	let routes: Vec<IpRoute> = serde_json::from_str(output).map_err(|e| BackendError::Parse {
		what: "ip route json",
		reason: e.to_string(),
	})?;

	Ok(routes
		.into_iter()
		.filter(|r| r.protocol.as_deref() != Some("kernel"))
		.filter_map(|r| {
			let destination = parse_net(&r.dst).ok()?;
			Some(Route {
				destination,
				interface: r.dev?,
			})
		})
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	const IFACE_KEY: &str = "G7gF5ZMgIe9GAnDedtg9ztb232tbrqaW4DUPUrqA5mo=";
	const PEER_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

	#[test]
	fn parses_wg_dump() {
		let output = format!(
			"mesh_PUBLIC\tcHJpdmF0ZQ==\t{IFACE_KEY}\t51820\toff\n\
			 mesh_PUBLIC\t{PEER_KEY}\t(none)\t203.0.113.7:51820\t10.69.13.49/32,10.69.13.0/24\t1700000000\t1000\t2000\t25\n\
			 mesh_PUBLIC\t{IFACE_KEY}\t(none)\t(none)\t(none)\t0\t0\t0\toff\n"
		);
		let dump = parse_wg_dump(&output).unwrap();

		assert_eq!(dump.interfaces.len(), 1);
		assert_eq!(dump.interfaces[0].0, "mesh_PUBLIC");
		assert_eq!(dump.interfaces[0].2, 51820);

		assert_eq!(dump.peers.len(), 2);
		let (_, peer) = &dump.peers[0];
		assert_eq!(peer.public_key.to_string(), PEER_KEY);
		assert_eq!(peer.endpoint, Some("203.0.113.7:51820".parse().unwrap()));
		assert_eq!(peer.allowed_ips.len(), 2);
		assert_eq!(peer.rx_bytes, 1000);
		assert_eq!(peer.tx_bytes, 2000);
		assert_eq!(peer.latest_handshake, Some(1_700_000_000));

		let (_, idle) = &dump.peers[1];
		assert_eq!(idle.endpoint, None);
		assert!(idle.allowed_ips.is_empty());
		assert_eq!(idle.latest_handshake, None);
	}

	#[test]
	fn empty_dump_has_no_interfaces() {
		let dump = parse_wg_dump("").unwrap();
		assert!(dump.interfaces.is_empty());
		assert!(dump.peers.is_empty());
	}

	#[test]
	fn malformed_dump_line_is_an_error() {
		assert!(matches!(
			parse_wg_dump("mesh_a\tonly\tthree"),
			Err(BackendError::Parse { .. })
		));
	}

	#[test]
	fn parses_ip_addr_json() {
		let output = r#"[
			{"ifindex":1,"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
			{"ifindex":5,"ifname":"mesh_PUBLIC","addr_info":[{"family":"inet","local":"10.69.14.97","prefixlen":32}]},
			{"ifindex":6,"ifname":"mesh_DOWN","addr_info":[]}
		]"#;
		let addrs = parse_ip_addr_json(output).unwrap();
		assert_eq!(addrs["mesh_PUBLIC"], "10.69.14.97".parse::<IpAddr>().unwrap());
		assert!(!addrs.contains_key("mesh_DOWN"));
	}

	#[test]
	fn route_parsing_skips_kernel_and_default_routes() {
		let output = r#"[
			{"dst":"default","gateway":"192.0.2.1","dev":"eth0","protocol":"dhcp"},
			{"dst":"10.69.14.97","dev":"mesh_PUBLIC","protocol":"kernel","scope":"link"},
			{"dst":"10.69.13.49","dev":"mesh_PUBLIC","protocol":"static","scope":"link"},
			{"dst":"10.70.0.0/16","dev":"mesh_PUBLIC","protocol":"static"}
		]"#;
		let routes = parse_ip_route_json(output).unwrap();
		assert_eq!(
			routes,
			vec![
				Route {
					destination: "10.69.13.49/32".parse().unwrap(),
					interface: "mesh_PUBLIC".into(),
				},
				Route {
					destination: "10.70.0.0/16".parse().unwrap(),
					interface: "mesh_PUBLIC".into(),
				},
			]
		);
	}
}
