// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use mesh_telemetry::PeerWatcher;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{payload, HandlerOutcome, HandlerResult};
use crate::agent::AgentContext;
use crate::error::DispatchError;

#[derive(Debug, Default, Deserialize)]
struct WgInfoRequest {
	/// Seconds between reports.
	#[serde(default)]
	interval: Option<u64>,
}

/// `WG_INFO`: restarts peer telemetry with the requested interval.
pub async fn wg_info(ctx: &AgentContext, data: &Value) -> HandlerResult {
	let request: WgInfoRequest = match data {
		Value::Object(_) => payload(data)?,
		_ => WgInfoRequest::default(),
	};
	let interval = match request.interval {
		Some(0) => return Err(DispatchError::InvalidPayload("interval must be positive".into())),
		Some(secs) => Duration::from_secs(secs),
		None => ctx.telemetry_interval,
	};

	let watcher = PeerWatcher::new(ctx.backend.clone(), ctx.store.clone(), ctx.sink.clone())
		.with_interval(interval)
		.with_idle_interval(ctx.telemetry_idle);
	ctx.supervisor.replace(Arc::new(watcher)).await;

	Ok(HandlerOutcome::Reply(json!({
		"status": "started",
		"interval": interval.as_secs(),
	})))
}
