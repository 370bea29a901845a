// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single consumer for every host mutation. Jobs run one at a time, in the
//! order they were submitted.

use std::sync::Arc;

use mesh_common_core::{report_types, CancellationToken, ReportEnvelope, SharedSink};
use mesh_wgconf::{DesiredMeshState, Reconciler, VpnCommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::error::DispatchError;

const QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
pub enum MeshJob {
	/// Run raw commands without cleanup; reported as `WG_CONF`.
	Apply {
		commands: Vec<VpnCommand>,
		request_id: String,
	},
	/// Converge on a full desired state; reported as `UPDATE_AGENT_CONFIG`.
	Reconcile {
		desired: DesiredMeshState,
		request_id: String,
	},
}

impl MeshJob {
	fn name(&self) -> &'static str {
		match self {
			MeshJob::Apply { .. } => "apply",
			MeshJob::Reconcile { .. } => "reconcile",
		}
	}
}

#[derive(Clone)]
pub struct MeshExecutor {
	tx: mpsc::Sender<MeshJob>,
}

impl MeshExecutor {
	/// Starts the consumer task. It finishes the queued jobs and exits once
	/// `stop` fires.
	pub fn spawn(
		reconciler: Arc<Reconciler>,
		sink: SharedSink,
		stop: CancellationToken,
	) -> (Self, JoinHandle<()>) {
		let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
		let task = tokio::spawn(run(rx, reconciler, sink, stop));
		(Self { tx }, task)
	}

	pub async fn submit(&self, job: MeshJob) -> Result<(), DispatchError> {
		debug!(job = job.name(), "queueing mesh job");
		self
			.tx
			.send(job)
			.await
			.map_err(|_| DispatchError::ExecutorClosed)
	}
}

async fn run(
	mut rx: mpsc::Receiver<MeshJob>,
	reconciler: Arc<Reconciler>,
	sink: SharedSink,
	stop: CancellationToken,
) {
	info!("mesh executor started");
	loop {
		let job = tokio::select! {
			biased;

			job = rx.recv() => match job {
				Some(job) => job,
				None => break,
			},
			_ = stop.cancelled() => {
				rx.close();
				while let Ok(job) = rx.try_recv() {
					process(&reconciler, &sink, job).await;
				}
				break;
			}
		};
		process(&reconciler, &sink, job).await;
	}
	info!("mesh executor stopped");
}

#[instrument(skip_all, fields(job = job.name()))]
async fn process(reconciler: &Reconciler, sink: &SharedSink, job: MeshJob) {
	let (request_id, kind, data) = match job {
		MeshJob::Apply {
			commands,
			request_id,
		} => {
			let results = reconciler.apply(&commands).await;
			(request_id, report_types::WG_CONF, Value::Array(results))
		}
		MeshJob::Reconcile {
			desired,
			request_id,
		} => {
			let report = reconciler.reconcile(&desired).await;
			let data = match serde_json::to_value(&report) {
				Ok(data) => data,
				Err(e) => {
					error!(error = %e, "failed to encode reconciliation report");
					return;
				}
			};
			(request_id, report_types::UPDATE_AGENT_CONFIG, data)
		}
	};

	if let Err(e) = sink.send(ReportEnvelope::new(request_id, kind, data)).await {
		error!(kind, error = %e, "failed to send mesh job result");
	}
}
