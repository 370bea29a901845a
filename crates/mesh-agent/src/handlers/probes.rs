// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use mesh_common_core::WatcherCategory;
use mesh_telemetry::{
	run_throughput_tests, AutoPingRequest, LatencyProber, TelemetryError, ThroughputServer,
	ThroughputTestRequest,
};
use serde_json::{json, Value};
use tracing::info;

use super::{payload, HandlerOutcome, HandlerResult};
use crate::agent::AgentContext;
use crate::error::DispatchError;

/// `AUTO_PING`: replaces the latency prober. An empty host list just stops it.
pub async fn auto_ping(ctx: &AgentContext, data: &Value) -> HandlerResult {
	let request: AutoPingRequest = payload(data)?;
	if request.ips.is_empty() {
		ctx.supervisor.retire(WatcherCategory::LatencyProbe).await;
		return Ok(HandlerOutcome::Reply(json!({"status": "stopped"})));
	}

	let hosts = request.ips.len();
	let prober = LatencyProber::new(request, ctx.pinger.clone(), ctx.sink.clone());
	ctx.supervisor.replace(Arc::new(prober)).await;
	Ok(HandlerOutcome::Reply(json!({"status": "started", "hosts": hosts})))
}

/// `IPERF_SERVER`: `status` switches the throughput-test server on or off.
pub async fn iperf_server(ctx: &AgentContext, data: &Value) -> HandlerResult {
	let enable = match data.get("status") {
		Some(Value::Bool(b)) => *b,
		Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
			"on" | "start" | "true" => true,
			"off" | "stop" | "false" => false,
			other => {
				return Err(DispatchError::InvalidPayload(format!("unknown status {other:?}")));
			}
		},
		_ => return Err(DispatchError::InvalidPayload("missing status".into())),
	};

	if enable {
		ctx.supervisor.replace(Arc::new(ThroughputServer::iperf3())).await;
		info!("throughput server requested");
		Ok(HandlerOutcome::Reply(json!({"status": "on"})))
	} else {
		ctx.supervisor.retire(WatcherCategory::ThroughputTest).await;
		Ok(HandlerOutcome::Reply(json!({"status": "off"})))
	}
}

/// `IPERF_TEST`: runs throughput tests against every host and replies with
/// the results.
pub async fn iperf_test(data: &Value) -> HandlerResult {
	let request = ThroughputTestRequest::from_value(data).map_err(|e| match e {
		TelemetryError::InvalidRequest(msg) => DispatchError::InvalidPayload(msg),
		other => DispatchError::Telemetry(other),
	})?;
	let results = run_throughput_tests(&request).await;
	Ok(HandlerOutcome::Reply(serde_json::to_value(results)?))
}
