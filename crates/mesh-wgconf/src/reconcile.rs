// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Converges host WireGuard state onto a [`DesiredMeshState`].
//!
//! Cleanup always runs before creation so a link that is torn down and
//! rebuilt in one message never inherits stale peers, ports or addresses.
//! Host state is re-read at every step.

use std::collections::{BTreeSet, HashMap, HashSet};

use ipnet::IpNet;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::SharedBackend;
use crate::error::{BackendError, Result, WgConfError};
use crate::keys::PublicKey;
use crate::model::{
	ops, AddPeerArgs, CreateInterfaceArgs, DesiredMeshState, InterfaceReport, InterfaceSpec,
	InterfaceState, LinkSpec, RemoveInterfaceArgs, RemovePeerArgs, ReportEntry, VpnCommand,
	VpnOperation,
};

/// Linux IFNAMSIZ minus the trailing NUL.
const MAX_IFNAME_LEN: usize = 15;

/// Result of applying one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
	pub op: &'static str,
	pub data: Value,
	/// Host outcome differs from what was asked for.
	pub diverged: bool,
	/// Host state was modified.
	pub changed: bool,
}

pub struct Reconciler {
	backend: SharedBackend,
	prefix: String,
}

impl Reconciler {
	pub fn new(backend: SharedBackend, prefix: impl Into<String>) -> Self {
		Self {
			backend,
			prefix: prefix.into(),
		}
	}

	pub fn backend(&self) -> &SharedBackend {
		&self.backend
	}

	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	/// Host device name for a controller link name.
	pub fn device_name(&self, link: &str) -> Result<String> {
		let name = if link.starts_with(&self.prefix) {
			link.to_string()
		} else {
			format!("{}{}", self.prefix, link)
		};

		let valid = !link.is_empty()
			&& name.len() <= MAX_IFNAME_LEN
			&& !name.contains(|c: char| c == '/' || c.is_whitespace());
		if !valid {
			return Err(WgConfError::InvalidInterfaceName(name));
		}
		Ok(name)
	}

	/// Controller link name for a managed device.
	pub fn link_name<'a>(&self, device: &'a str) -> &'a str {
		device.strip_prefix(self.prefix.as_str()).unwrap_or(device)
	}

	fn is_managed(&self, device: &str) -> bool {
		device.starts_with(&self.prefix)
	}

	/// Interfaces on the host carrying our prefix.
	pub async fn managed_interfaces(&self) -> std::result::Result<Vec<InterfaceState>, BackendError> {
		Ok(self
			.backend
			.list_interfaces()
			.await?
			.into_iter()
			.filter(|i| self.is_managed(&i.name))
			.collect())
	}

	#[instrument(skip_all, fields(links = desired.network.len(), commands = desired.vpn.len()))]
	pub async fn reconcile(&self, desired: &DesiredMeshState) -> Vec<ReportEntry> {
		let parsed: Vec<(&VpnCommand, Result<VpnOperation>)> =
			desired.vpn.iter().map(|cmd| (cmd, cmd.parse())).collect();
		let plan = self.plan(desired, &parsed);

		if let Err(e) = self.clear_interfaces(&plan.keep_interfaces).await {
			error!(error = %e, "failed to clear stale interfaces");
		}
		if let Err(e) = self.clear_peers(&plan.expected_peers).await {
			error!(error = %e, "failed to clear stale peers");
		}
		if let Err(e) = self.clear_routes(&plan.allowed_ips).await {
			error!(error = %e, "failed to clear unused routes");
		}

		let mut report = self.ensure_network(desired).await;

		for (cmd, op) in parsed {
			let op = match op {
				Ok(op) => op,
				Err(e) => {
					warn!(op = %cmd.op, error = %e, "skipping vpn command");
					continue;
				}
			};
			match self.execute(&op).await {
				Ok(applied) if applied.diverged => report.push(ReportEntry {
					op: applied.op.to_string(),
					data: applied.data,
					metadata: cmd.metadata.clone(),
				}),
				Ok(_) => {}
				Err(e) => error!(op = op.name(), ifname = op.ifname(), error = %e, "vpn command failed"),
			}
		}

		info!(report_entries = report.len(), "reconciliation finished");
		report
	}

	/// Applies commands in order without any cleanup, returning one result
	/// object per command.
	#[instrument(skip_all, fields(commands = commands.len()))]
	pub async fn apply(&self, commands: &[VpnCommand]) -> Vec<Value> {
		let mut results = Vec::with_capacity(commands.len());
		for cmd in commands {
			let outcome = match cmd.parse() {
				Ok(op) => self.execute(&op).await,
				Err(e) => Err(e),
			};
			results.push(match outcome {
				Ok(applied) => json!({
					"fn": applied.op,
					"data": applied.data,
					"metadata": cmd.metadata,
				}),
				Err(e) => {
					warn!(op = %cmd.op, error = %e, "vpn command failed");
					json!({
						"fn": cmd.op,
						"error": e.to_string(),
						"metadata": cmd.metadata,
					})
				}
			});
		}
		results
	}

	pub async fn execute(&self, op: &VpnOperation) -> Result<Applied> {
		match op {
			VpnOperation::CreateInterface(args) => self.create_interface(args).await,
			VpnOperation::AddPeer(args) => self.add_peer(args).await,
			VpnOperation::RemovePeer(args) => self.remove_peer(args).await,
			VpnOperation::RemoveInterface(args) => self.remove_interface(args).await,
		}
	}

	#[instrument(skip(self, args), fields(ifname = %args.ifname))]
	pub async fn create_interface(&self, args: &CreateInterfaceArgs) -> Result<Applied> {
		let device = self.device_name(&args.ifname)?;
		let existing = self
			.backend
			.list_interfaces()
			.await?
			.into_iter()
			.find(|i| i.name == device);

		let spec = InterfaceSpec {
			name: device,
			internal_ip: args.internal_ip,
			listen_port: args.listen_port,
		};

		let fresh = existing.is_none();
		let (state, changed) = match existing {
			Some(current) if satisfies(&current, &spec) => (current, false),
			_ => (self.backend.create_interface(&spec).await?, true),
		};

		let key_diverged = match &args.public_key {
			Some(requested) => *requested != state.public_key.to_string(),
			None => fresh,
		};
		let port_diverged = match args.listen_port {
			Some(requested) => requested != state.listen_port,
			None => fresh,
		};

		if changed {
			debug!(device = %state.name, port = state.listen_port, "interface ensured");
		}

		Ok(Applied {
			op: ops::CREATE_INTERFACE,
			data: self.interface_report(&args.ifname, &state),
			diverged: key_diverged || port_diverged,
			changed,
		})
	}

	#[instrument(skip(self, args), fields(ifname = %args.ifname, peer = %args.public_key))]
	pub async fn add_peer(&self, args: &AddPeerArgs) -> Result<Applied> {
		let device = self.device_name(&args.ifname)?;
		let spec = args.to_spec();

		let current = self.backend.list_peers(&device).await?;
		let changed = !current.iter().any(|p| spec.matches(p));
		if changed {
			self.backend.add_peer(&device, &spec).await?;
		}

		Ok(Applied {
			op: ops::ADD_PEER,
			data: json!({"ifname": args.ifname, "public_key": args.public_key}),
			diverged: false,
			changed,
		})
	}

	#[instrument(skip(self, args), fields(ifname = %args.ifname, peer = %args.public_key))]
	pub async fn remove_peer(&self, args: &RemovePeerArgs) -> Result<Applied> {
		let device = self.device_name(&args.ifname)?;

		let present = self
			.backend
			.list_peers(&device)
			.await?
			.iter()
			.any(|p| p.public_key == args.public_key);
		if present {
			self.backend.remove_peer(&device, &args.public_key).await?;
		}

		Ok(Applied {
			op: ops::REMOVE_PEER,
			data: json!({"ifname": args.ifname, "public_key": args.public_key}),
			diverged: false,
			changed: present,
		})
	}

	#[instrument(skip(self, args), fields(ifname = %args.ifname))]
	pub async fn remove_interface(&self, args: &RemoveInterfaceArgs) -> Result<Applied> {
		let device = self.device_name(&args.ifname)?;

		let present = self
			.backend
			.list_interfaces()
			.await?
			.iter()
			.any(|i| i.name == device);
		if present {
			self.backend.remove_interface(&device).await?;
		}

		Ok(Applied {
			op: ops::REMOVE_INTERFACE,
			data: json!({"ifname": args.ifname}),
			diverged: false,
			changed: present,
		})
	}

	fn plan(&self, desired: &DesiredMeshState, parsed: &[(&VpnCommand, Result<VpnOperation>)]) -> Plan {
		let mut plan = Plan::default();

		let links = desired.network.keys().map(String::as_str);
		let created = parsed.iter().filter_map(|(_, op)| match op {
			Ok(VpnOperation::CreateInterface(args)) => Some(args.ifname.as_str()),
			_ => None,
		});
		for link in links.chain(created) {
			if let Ok(device) = self.device_name(link) {
				plan.keep_interfaces.insert(device);
			}
		}

		for (_, op) in parsed {
			let Ok(VpnOperation::AddPeer(args)) = op else {
				continue;
			};
			let Ok(device) = self.device_name(&args.ifname) else {
				continue;
			};
			plan
				.expected_peers
				.entry(device)
				.or_default()
				.insert(args.public_key);
			plan.allowed_ips.extend(args.allowed_ips.iter().copied());
		}

		plan
	}

	async fn clear_interfaces(&self, keep: &BTreeSet<String>) -> std::result::Result<(), BackendError> {
		for iface in self.managed_interfaces().await? {
			if keep.contains(&iface.name) {
				continue;
			}
			match self.backend.remove_interface(&iface.name).await {
				Ok(()) => info!(device = %iface.name, "removed stale interface"),
				Err(e) => error!(device = %iface.name, error = %e, "failed to remove stale interface"),
			}
		}
		Ok(())
	}

	async fn clear_peers(
		&self,
		expected: &HashMap<String, HashSet<PublicKey>>,
	) -> std::result::Result<(), BackendError> {
		for iface in self.managed_interfaces().await? {
			let wanted = expected.get(&iface.name);
			for peer in self.backend.list_peers(&iface.name).await? {
				if wanted.is_some_and(|keys| keys.contains(&peer.public_key)) {
					continue;
				}
				match self.backend.remove_peer(&iface.name, &peer.public_key).await {
					Ok(()) => info!(device = %iface.name, peer = %peer.public_key, "removed stale peer"),
					Err(e) => error!(
						device = %iface.name,
						peer = %peer.public_key,
						error = %e,
						"failed to remove stale peer"
					),
				}
			}
		}
		Ok(())
	}

	async fn clear_routes(&self, allowed: &[IpNet]) -> std::result::Result<(), BackendError> {
		for route in self.backend.list_routes().await? {
			if !self.is_managed(&route.interface) {
				continue;
			}
			if allowed.iter().any(|net| net.contains(&route.destination)) {
				continue;
			}
			match self.backend.remove_route(&route).await {
				Ok(()) => info!(route = %route.destination, device = %route.interface, "removed unused route"),
				Err(e) => error!(
					route = %route.destination,
					device = %route.interface,
					error = %e,
					"failed to remove unused route"
				),
			}
		}
		Ok(())
	}

	async fn ensure_network(&self, desired: &DesiredMeshState) -> Vec<ReportEntry> {
		let mut report = Vec::new();
		for (link, spec) in &desired.network {
			let args = link_args(link, spec);
			match self.create_interface(&args).await {
				Ok(applied) if applied.diverged => report.push(ReportEntry {
					op: applied.op.to_string(),
					data: applied.data,
					metadata: Value::Null,
				}),
				Ok(_) => {}
				Err(e) => error!(link = %link, error = %e, "failed to ensure interface"),
			}
		}
		report
	}

	fn interface_report(&self, link: &str, state: &InterfaceState) -> Value {
		let report = InterfaceReport {
			ifname: self.link_name(link).to_string(),
			public_key: state.public_key,
			listen_port: state.listen_port,
			internal_ip: state.internal_ip,
		};
		serde_json::to_value(report).unwrap_or(Value::Null)
	}
}

#[derive(Debug, Default)]
struct Plan {
	keep_interfaces: BTreeSet<String>,
	expected_peers: HashMap<String, HashSet<PublicKey>>,
	allowed_ips: Vec<IpNet>,
}

fn link_args(link: &str, spec: &LinkSpec) -> CreateInterfaceArgs {
	CreateInterfaceArgs {
		ifname: link.to_string(),
		internal_ip: spec.internal_ip,
		public_key: spec.public_key.clone(),
		listen_port: spec.listen_port,
	}
}

fn satisfies(current: &InterfaceState, spec: &InterfaceSpec) -> bool {
	spec.internal_ip.map_or(true, |ip| current.internal_ip == Some(ip))
		&& spec.listen_port.map_or(true, |port| current.listen_port == port)
}
