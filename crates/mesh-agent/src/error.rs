// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use mesh_common_core::SinkError;
use mesh_common_snapshot::SnapshotError;
use mesh_telemetry::TelemetryError;
use mesh_wgconf::WgConfError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: &'static str, message: String },

	#[error("missing required setting: {0}")]
	Missing(&'static str),
}

/// Rejections decided before any handler runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("unknown command")]
	UnknownCommand(String),

	#[error("BAD REQUEST")]
	BadRequest,

	#[error("command {0} has no handler")]
	Unhandled(&'static str),
}

/// Failure of a single command handler. Rendered into the `{error}` reply.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("{0}")]
	InvalidPayload(String),

	#[error("mutation executor is not running")]
	ExecutorClosed,

	#[error(transparent)]
	Snapshot(#[from] SnapshotError),

	#[error(transparent)]
	WgConf(#[from] WgConfError),

	#[error(transparent)]
	Telemetry(#[from] TelemetryError),

	#[error(transparent)]
	Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("agent token is not a valid header value")]
	InvalidToken,

	#[error("websocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("connection closed by controller")]
	Closed,

	#[error(transparent)]
	Sink(#[from] SinkError),

	#[error(transparent)]
	Encode(#[from] serde_json::Error),
}
