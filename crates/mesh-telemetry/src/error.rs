// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use mesh_common_core::{CommandError, SinkError};
use mesh_common_snapshot::SnapshotError;
use mesh_wgconf::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
	#[error("mesh backend error: {0}")]
	Backend(#[from] BackendError),

	#[error("snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),

	#[error("report sink error: {0}")]
	Sink(#[from] SinkError),

	#[error("encode error: {0}")]
	Encode(#[from] serde_json::Error),

	#[error(transparent)]
	Command(#[from] CommandError),

	#[error("failed to parse {tool} output: {reason}")]
	Parse { tool: &'static str, reason: String },

	#[error("invalid request: {0}")]
	InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
