// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
	#[error("report channel closed")]
	Closed,

	#[error("encode error: {0}")]
	Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CommandError {
	#[error("{0} is not installed or not in PATH")]
	NotInstalled(String),

	#[error("{program} {args} failed: {stderr}")]
	Failed {
		program: String,
		args: String,
		stderr: String,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
