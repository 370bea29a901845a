// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared building blocks for the mesh agent.
//!
//! This crate provides:
//! - The controller wire envelopes (inbound commands, outbound reports)
//! - The closed set of report type names
//! - The `ReportSink` seam every watcher and the executor publish through
//! - The `Watcher` seam and the watcher categories the supervisor keys on
//! - A thin wrapper for running host tools (`wg`, `ip`, `docker`, ...)

pub mod envelope;
pub mod error;
pub mod process;
pub mod sink;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod watcher;

pub use envelope::{report_types, CommandEnvelope, ReportEnvelope};
pub use error::{CommandError, SinkError};
pub use process::{run_command, run_command_with_stdin};
pub use sink::{ReportSink, SharedSink};
pub use watcher::{sleep_or_stop, Watcher, WatcherCategory};

pub use tokio_util::sync::CancellationToken;
