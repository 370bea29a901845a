// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::ReportEnvelope;
use crate::error::SinkError;

/// Outbound path to the controller.
///
/// Implementations must be safe to call from several watchers and the
/// mutation executor at the same time; each call delivers one whole report.
#[async_trait]
pub trait ReportSink: Send + Sync {
	async fn send(&self, report: ReportEnvelope) -> Result<(), SinkError>;
}

pub type SharedSink = Arc<dyn ReportSink>;
