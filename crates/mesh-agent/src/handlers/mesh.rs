// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use mesh_wgconf::{DesiredMeshState, VpnCommand};
use serde_json::Value;
use tracing::info;

use super::{payload, HandlerOutcome, HandlerResult};
use crate::agent::AgentContext;
use crate::error::DispatchError;
use crate::executor::MeshJob;

/// Store key holding the last desired state received from the controller.
pub const CONFIG_DUMP_KEY: &str = "config_dump";

/// `WG_CONF`: runs raw VPN commands on the executor. Accepts either a bare
/// list or `{"vpn": [...]}`.
pub async fn wg_conf(ctx: &AgentContext, data: &Value, request_id: &str) -> HandlerResult {
	let commands: Vec<VpnCommand> = match data {
		Value::Array(_) => payload(data)?,
		Value::Object(map) => match map.get("vpn") {
			Some(vpn) => payload(vpn)?,
			None => return Err(DispatchError::InvalidPayload("missing vpn commands".into())),
		},
		_ => return Err(DispatchError::InvalidPayload("expected a list of commands".into())),
	};

	info!(commands = commands.len(), request_id, "queueing vpn commands");
	ctx.executor
		.submit(MeshJob::Apply {
			commands,
			request_id: request_id.to_string(),
		})
		.await?;
	Ok(HandlerOutcome::Deferred)
}

/// `CONFIG_INFO`: records the desired state and queues a full reconciliation.
pub async fn config_info(ctx: &AgentContext, data: &Value, request_id: &str) -> HandlerResult {
	if !data.is_object() {
		return Err(DispatchError::InvalidPayload("expected a mesh configuration object".into()));
	}
	let desired: DesiredMeshState = payload(data)?;
	ctx.store.write(CONFIG_DUMP_KEY, data).await?;

	info!(
		links = desired.network.len(),
		commands = desired.vpn.len(),
		request_id,
		"queueing reconciliation"
	);
	ctx.executor
		.submit(MeshJob::Reconcile {
			desired,
			request_id: request_id.to_string(),
		})
		.await?;
	Ok(HandlerOutcome::Deferred)
}
