// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde_json::json;
use tracing::warn;

use super::{HandlerOutcome, HandlerResult};
use crate::agent::AgentContext;

/// `GET_INFO`: a read-only view of the agent and the interfaces it manages.
pub async fn get_info(ctx: &AgentContext) -> HandlerResult {
	let interfaces = match ctx.reconciler.managed_interfaces().await {
		Ok(interfaces) => interfaces,
		Err(e) => {
			warn!(error = %e, "failed to list managed interfaces");
			Vec::new()
		}
	};
	let watchers: Vec<&str> = ctx
		.supervisor
		.live_categories()
		.await
		.iter()
		.map(|c| c.as_str())
		.collect();

	Ok(HandlerOutcome::Reply(json!({
		"version": env!("CARGO_PKG_VERSION"),
		"hostname": ctx.hostname,
		"network_api": ctx.network_api.as_str(),
		"interfaces": interfaces,
		"watchers": watchers,
	})))
}
