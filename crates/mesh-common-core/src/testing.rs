// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory sink for tests across the workspace.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::envelope::ReportEnvelope;
use crate::error::SinkError;
use crate::sink::ReportSink;

/// Sink that keeps every report it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
	reports: Mutex<Vec<ReportEnvelope>>,
	notify: Notify,
}

impl RecordingSink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reports(&self) -> Vec<ReportEnvelope> {
		self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub fn reports_of(&self, kind: &str) -> Vec<ReportEnvelope> {
		self
			.reports
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.iter()
			.filter(|r| r.kind == kind)
			.cloned()
			.collect()
	}

	/// Waits until at least `count` reports of `kind` arrived or `timeout`
	/// elapsed, returning whatever was collected.
	pub async fn wait_for(&self, kind: &str, count: usize, timeout: Duration) -> Vec<ReportEnvelope> {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			let notified = self.notify.notified();
			let current = self.reports_of(kind);
			if current.len() >= count {
				return current;
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return self.reports_of(kind);
			}
		}
	}
}

#[async_trait]
impl ReportSink for RecordingSink {
	async fn send(&self, report: ReportEnvelope) -> Result<(), SinkError> {
		self.reports.lock().unwrap_or_else(|e| e.into_inner()).push(report);
		self.notify.notify_waiters();
		Ok(())
	}
}
