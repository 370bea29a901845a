// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use mesh_common_core::CommandError;
use thiserror::Error;

use crate::keys::KeyError;

#[derive(Debug, Error)]
pub enum BackendError {
	#[error(transparent)]
	Command(#[from] CommandError),

	#[error("failed to parse {what}: {reason}")]
	Parse { what: &'static str, reason: String },

	#[error("interface not found: {0}")]
	InterfaceNotFound(String),

	#[error("backend rejected operation: {0}")]
	Rejected(String),
}

#[derive(Debug, Error)]
pub enum WgConfError {
	#[error("unknown operation: {0}")]
	UnknownOperation(String),

	#[error("invalid arguments for {op}: {source}")]
	InvalidArguments {
		op: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid interface name: {0}")]
	InvalidInterfaceName(String),

	#[error("invalid key: {0}")]
	Key(#[from] KeyError),

	#[error(transparent)]
	Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, WgConfError>;
