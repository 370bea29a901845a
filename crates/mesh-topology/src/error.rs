// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use mesh_common_core::{CommandError, SinkError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
	/// Neither in-cluster nor kubeconfig credentials could be loaded.
	#[error("kubernetes configuration unavailable: {0}")]
	KubernetesConfig(String),

	#[error("kubernetes API error: {0}")]
	Kube(#[from] kube::Error),

	#[error(transparent)]
	Command(#[from] CommandError),

	#[error("failed to parse {what}: {reason}")]
	Parse { what: &'static str, reason: String },

	#[error("unknown network api: {0}")]
	UnknownNetworkApi(String),

	#[error("report sink error: {0}")]
	Sink(#[from] SinkError),

	#[error("encode error: {0}")]
	Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopologyError>;
