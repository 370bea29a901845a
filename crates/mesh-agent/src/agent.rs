// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use mesh_common_core::{CancellationToken, SharedSink};
use mesh_common_snapshot::SharedStore;
use mesh_telemetry::{PeerWatcher, Pinger};
use mesh_topology::{select_source, NetworkApi, TopologyWatcher};
use mesh_wgconf::{Reconciler, SharedBackend};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::error::ProtocolError;
use crate::executor::MeshExecutor;
use crate::supervisor::WatcherSupervisor;

/// Runtime knobs taken from the resolved configuration.
#[derive(Debug, Clone)]
pub struct AgentSettings {
	pub network_api: NetworkApi,
	pub interface_prefix: String,
	pub telemetry_interval: Duration,
	pub telemetry_idle: Duration,
	pub topology_interval: Duration,
	pub watcher_join_timeout: Duration,
	pub hostname: String,
}

impl AgentSettings {
	pub fn from_config(config: &AgentConfig, hostname: impl Into<String>) -> Self {
		Self {
			network_api: config.network_api,
			interface_prefix: config.interface_prefix.clone(),
			telemetry_interval: config.telemetry_interval,
			telemetry_idle: config.telemetry_idle,
			topology_interval: config.topology_interval,
			watcher_join_timeout: config.watcher_join_timeout,
			hostname: hostname.into(),
		}
	}
}

/// Host-facing collaborators, swapped for in-memory fakes in tests.
pub struct AgentParts {
	pub backend: SharedBackend,
	pub store: SharedStore,
	pub sink: SharedSink,
	pub pinger: Arc<dyn Pinger>,
}

/// Everything a command handler can reach.
pub struct AgentContext {
	pub backend: SharedBackend,
	pub store: SharedStore,
	pub sink: SharedSink,
	pub pinger: Arc<dyn Pinger>,
	pub reconciler: Arc<Reconciler>,
	pub supervisor: Arc<WatcherSupervisor>,
	pub executor: MeshExecutor,
	pub network_api: NetworkApi,
	pub hostname: String,
	pub telemetry_interval: Duration,
	pub telemetry_idle: Duration,
}

pub struct Agent {
	dispatcher: Arc<Dispatcher>,
	stop: CancellationToken,
	executor_task: JoinHandle<()>,
	join_timeout: Duration,
}

impl Agent {
	/// Starts the executor, the peer telemetry watcher and the topology
	/// watcher for the configured network API.
	pub async fn start(settings: AgentSettings, parts: AgentParts) -> Result<Self, ProtocolError> {
		let stop = CancellationToken::new();
		let reconciler = Arc::new(Reconciler::new(
			parts.backend.clone(),
			settings.interface_prefix.clone(),
		));
		let (executor, executor_task) =
			MeshExecutor::spawn(reconciler.clone(), parts.sink.clone(), stop.child_token());
		let supervisor = Arc::new(WatcherSupervisor::new(settings.watcher_join_timeout));

		let ctx = Arc::new(AgentContext {
			backend: parts.backend,
			store: parts.store,
			sink: parts.sink,
			pinger: parts.pinger,
			reconciler,
			supervisor,
			executor,
			network_api: settings.network_api,
			hostname: settings.hostname,
			telemetry_interval: settings.telemetry_interval,
			telemetry_idle: settings.telemetry_idle,
		});
		let dispatcher = Arc::new(Dispatcher::new(ctx.clone())?);

		let telemetry = PeerWatcher::new(ctx.backend.clone(), ctx.store.clone(), ctx.sink.clone())
			.with_interval(ctx.telemetry_interval)
			.with_idle_interval(ctx.telemetry_idle);
		ctx.supervisor.replace(Arc::new(telemetry)).await;

		match select_source(ctx.network_api).await {
			Ok(Some(source)) => {
				let watcher = TopologyWatcher::new(source, ctx.sink.clone())
					.with_interval(settings.topology_interval);
				ctx.supervisor.replace(Arc::new(watcher)).await;
			}
			Ok(None) => info!("topology reporting disabled"),
			Err(e) => error!(
				network_api = %ctx.network_api,
				error = %e,
				"topology watcher unavailable, continuing without it"
			),
		}

		info!(network_api = %ctx.network_api, hostname = %ctx.hostname, "agent started");
		Ok(Self {
			dispatcher,
			stop,
			executor_task,
			join_timeout: settings.watcher_join_timeout,
		})
	}

	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	pub fn context(&self) -> &Arc<AgentContext> {
		self.dispatcher.context()
	}

	/// Retires every watcher, then lets the executor finish queued work.
	pub async fn shutdown(self) {
		self.context().supervisor.shutdown().await;
		self.stop.cancel();

		let mut task = self.executor_task;
		let drain_timeout = self.join_timeout.max(Duration::from_secs(5));
		match tokio::time::timeout(drain_timeout, &mut task).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => warn!(error = %e, "executor task ended abnormally"),
			Err(_) => {
				warn!("executor did not drain in time, aborting");
				task.abort();
			}
		}
		info!("agent stopped");
	}
}

/// Best-effort host name for `GET_INFO`.
pub async fn hostname() -> String {
	match tokio::fs::read_to_string("/proc/sys/kernel/hostname").await {
		Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
		_ => std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
	}
}
