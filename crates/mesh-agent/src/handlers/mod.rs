// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One handler per controller command.

mod info;
mod mesh;
mod probes;
mod telemetry;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::AgentContext;
use crate::error::DispatchError;
use crate::protocol::Command;

pub use info::get_info;
pub use mesh::{config_info, wg_conf, CONFIG_DUMP_KEY};
pub use probes::{auto_ping, iperf_server, iperf_test};
pub use telemetry::wg_info;

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
	Reply(Value),
	/// The result is reported later by whoever picked up the work.
	Deferred,
}

pub type HandlerResult = Result<HandlerOutcome, DispatchError>;

pub async fn handle(
	ctx: &AgentContext,
	command: Command,
	data: &Value,
	request_id: &str,
) -> HandlerResult {
	match command {
		Command::GetInfo => get_info(ctx).await,
		Command::WgInfo => wg_info(ctx, data).await,
		Command::WgConf => wg_conf(ctx, data, request_id).await,
		Command::ConfigInfo => config_info(ctx, data, request_id).await,
		Command::AutoPing => auto_ping(ctx, data).await,
		Command::IperfServer => iperf_server(ctx, data).await,
		Command::IperfTest => iperf_test(data).await,
	}
}

fn payload<T: DeserializeOwned>(data: &Value) -> Result<T, DispatchError> {
	T::deserialize(data).map_err(|e| DispatchError::InvalidPayload(e.to_string()))
}
