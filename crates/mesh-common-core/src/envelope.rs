// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Report type names sent to the controller.
pub mod report_types {
	pub const IFACES_PEERS_BW_DATA: &str = "IFACES_PEERS_BW_DATA";
	pub const UPDATE_AGENT_CONFIG: &str = "UPDATE_AGENT_CONFIG";
	pub const WG_CONF: &str = "WG_CONF";
	pub const AUTO_PING: &str = "AUTO_PING";
	pub const KUBERNETES_NETWORK_INFO: &str = "KUBERNETES_NETWORK_INFO";
	pub const DOCKER_NETWORK_INFO: &str = "DOCKER_NETWORK_INFO";
	pub const HOST_NETWORK_INFO: &str = "HOST_NETWORK_INFO";
}

/// Command sent by the controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandEnvelope {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub data: Value,
	#[serde(default)]
	pub request_id: String,
}

impl CommandEnvelope {
	pub fn new(kind: impl Into<String>, data: Value, request_id: impl Into<String>) -> Self {
		Self {
			id: None,
			kind: kind.into(),
			data,
			request_id: request_id.into(),
		}
	}

	/// Only mappings and sequences are acceptable payloads.
	pub fn has_structured_data(&self) -> bool {
		matches!(self.data, Value::Object(_) | Value::Array(_))
	}
}

/// Message sent to the controller, either as a command response or an
/// unsolicited watcher report.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReportEnvelope {
	pub id: String,
	pub executed_at: DateTime<Utc>,
	#[serde(rename = "type")]
	pub kind: String,
	pub data: Value,
}

impl ReportEnvelope {
	pub fn new(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
		Self {
			id: id.into(),
			executed_at: Utc::now(),
			kind: kind.into(),
			data,
		}
	}

	/// Watcher reports are not tied to a request.
	pub fn unsolicited(kind: impl Into<String>, data: Value) -> Self {
		Self::new("UNKNOWN", kind, data)
	}
}
