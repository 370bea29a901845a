// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use mesh_common_core::{report_types, run_command};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TopologyError};
use crate::source::{NetworkRecord, NetworkSource};

/// Subnets of the container runtime's networks, via the `docker` CLI.
#[derive(Debug, Default)]
pub struct DockerSource;

impl DockerSource {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl NetworkSource for DockerSource {
	fn report_type(&self) -> &'static str {
		report_types::DOCKER_NETWORK_INFO
	}

	async fn poll(&self) -> Result<Vec<NetworkRecord>> {
		let ids = run_command("docker", &["network", "ls", "-q"]).await?;
		let ids: Vec<&str> = ids.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
		if ids.is_empty() {
			return Ok(Vec::new());
		}

		let mut args = vec!["network", "inspect"];
		args.extend(ids);
		let output = run_command("docker", &args).await?;
		let records = parse_network_inspect(&output)?;
		debug!(records = records.len(), "polled docker networks");
		Ok(records)
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerNetwork {
	name: String,
	#[serde(rename = "IPAM", default)]
	ipam: Option<Ipam>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ipam {
	#[serde(default)]
	config: Option<Vec<IpamConfig>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpamConfig {
	subnet: Option<String>,
}

/// One record per configured subnet in `docker network inspect` output.
fn parse_network_inspect(output: &str) -> Result<Vec<NetworkRecord>> {
	let networks: Vec<DockerNetwork> =
		serde_json::from_str(output).map_err(|e| TopologyError::Parse {
			what: "docker network inspect",
			reason: e.to_string(),
		})?;

	Ok(networks
		.into_iter()
		.flat_map(|network| {
			let subnets: Vec<String> = network
				.ipam
				.and_then(|ipam| ipam.config)
				.unwrap_or_default()
				.into_iter()
				.filter_map(|c| c.subnet)
				.collect();
			let name = network.name;
			subnets
				.into_iter()
				.map(move |subnet| NetworkRecord::new(subnet, name.clone()))
		})
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_inspect_output() {
		let output = r#"[
			{"Name": "bridge", "Driver": "bridge", "IPAM": {"Driver": "default", "Config": [{"Subnet": "172.17.0.0/16", "Gateway": "172.17.0.1"}]}},
			{"Name": "host", "Driver": "host", "IPAM": {"Driver": "default", "Config": []}},
			{"Name": "none", "Driver": "null", "IPAM": {"Driver": "default", "Config": null}},
			{"Name": "app", "IPAM": {"Config": [{"Subnet": "10.10.0.0/24"}, {"Subnet": "fd00::/64"}]}}
		]"#;
		let records = parse_network_inspect(output).unwrap();
		assert_eq!(
			records,
			vec![
				NetworkRecord::new("172.17.0.0/16", "bridge"),
				NetworkRecord::new("10.10.0.0/24", "app"),
				NetworkRecord::new("fd00::/64", "app"),
			]
		);
	}

	#[test]
	fn garbage_is_a_parse_error() {
		assert!(matches!(
			parse_network_inspect("not json"),
			Err(TopologyError::Parse { .. })
		));
	}
}
