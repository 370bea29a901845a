// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};

/// One reachable subnet behind this agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkRecord {
	#[serde(rename = "agent_network_subnets")]
	pub subnet: String,
	#[serde(rename = "agent_network_name")]
	pub name: String,
}

impl NetworkRecord {
	pub fn new(subnet: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			subnet: subnet.into(),
			name: name.into(),
		}
	}
}

/// A backend the topology watcher polls for reachable subnets.
#[async_trait]
pub trait NetworkSource: Send + Sync {
	/// Report type the records are published under.
	fn report_type(&self) -> &'static str;

	async fn poll(&self) -> Result<Vec<NetworkRecord>>;
}

pub type SharedSource = Arc<dyn NetworkSource>;

/// Which topology backend the agent runs with. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkApi {
	Docker,
	Kubernetes,
	#[default]
	Host,
	None,
}

impl NetworkApi {
	pub fn as_str(&self) -> &'static str {
		match self {
			NetworkApi::Docker => "docker",
			NetworkApi::Kubernetes => "kubernetes",
			NetworkApi::Host => "host",
			NetworkApi::None => "none",
		}
	}
}

impl fmt::Display for NetworkApi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for NetworkApi {
	type Err = TopologyError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"docker" => Ok(NetworkApi::Docker),
			"kubernetes" | "k8s" => Ok(NetworkApi::Kubernetes),
			"host" => Ok(NetworkApi::Host),
			"none" | "" => Ok(NetworkApi::None),
			other => Err(TopologyError::UnknownNetworkApi(other.to_string())),
		}
	}
}
