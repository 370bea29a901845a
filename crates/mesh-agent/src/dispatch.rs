// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use mesh_common_core::CommandEnvelope;
use serde_json::{json, Value};
use tracing::{debug, error, instrument, warn};

use crate::agent::AgentContext;
use crate::error::ProtocolError;
use crate::handlers::{self, HandlerOutcome};
use crate::protocol::{verify_registry, Command};

/// Routes controller commands to their handlers.
///
/// Returns the reply to send back, or `None` when the handler deferred its
/// result to a later report.
pub struct Dispatcher {
	ctx: Arc<AgentContext>,
}

impl Dispatcher {
	pub fn new(ctx: Arc<AgentContext>) -> Result<Self, ProtocolError> {
		verify_registry()?;
		Ok(Self { ctx })
	}

	pub fn context(&self) -> &Arc<AgentContext> {
		&self.ctx
	}

	#[instrument(skip_all, fields(kind = %envelope.kind, request_id = %envelope.request_id))]
	pub async fn dispatch(&self, envelope: &CommandEnvelope) -> Option<Value> {
		let command = match Command::from_name(&envelope.kind) {
			Ok(command) => command,
			Err(e) => {
				warn!("unknown command");
				return Some(error_reply(&e));
			}
		};

		if !envelope.has_structured_data() {
			warn!("rejecting command with unstructured data");
			return Some(error_reply(&ProtocolError::BadRequest));
		}

		let handled = AssertUnwindSafe(handlers::handle(
			&self.ctx,
			command,
			&envelope.data,
			&envelope.request_id,
		))
		.catch_unwind()
		.await;

		match handled {
			Ok(Ok(HandlerOutcome::Reply(value))) => Some(value),
			Ok(Ok(HandlerOutcome::Deferred)) => {
				debug!("result deferred");
				None
			}
			Ok(Err(e)) => {
				error!(error = %e, "command failed");
				Some(error_reply(&e))
			}
			Err(panic) => {
				let message = panic_message(panic.as_ref());
				error!(panic = %message, "command handler panicked");
				Some(json!({ "error": message }))
			}
		}
	}
}

fn error_reply(e: &dyn std::error::Error) -> Value {
	json!({ "error": e.to_string() })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"handler panicked".to_string()
	}
}
