// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mesh_agent::agent::{hostname, Agent, AgentParts, AgentSettings};
use mesh_agent::config::{load_config, Cli, LogFormat};
use mesh_agent::transport::{ChannelSink, ControllerConnection, OUTBOUND_CAPACITY};
use mesh_common_core::CancellationToken;
use mesh_common_snapshot::JsonFileStore;
use mesh_telemetry::CommandPinger;
use mesh_wgconf::CommandBackend;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let config = load_config(&cli).context("failed to load configuration")?;
	init_logging(config.log_format);

	info!(version = env!("CARGO_PKG_VERSION"), "starting mesh-agent");

	tokio::fs::create_dir_all(&config.state_dir)
		.await
		.with_context(|| format!("failed to create state dir {}", config.state_dir.display()))?;

	let (sink, outbound) = ChannelSink::new(OUTBOUND_CAPACITY);
	let settings = AgentSettings::from_config(&config, hostname().await);
	let agent = Agent::start(
		settings,
		AgentParts {
			backend: Arc::new(CommandBackend::new()),
			store: Arc::new(JsonFileStore::new(config.state_dir.clone())),
			sink: Arc::new(sink.clone()),
			pinger: Arc::new(CommandPinger),
		},
	)
	.await
	.context("failed to start agent")?;

	let stop = CancellationToken::new();
	let connection = ControllerConnection::new(
		config.controller_url.clone(),
		config.agent_token.clone(),
		agent.dispatcher().clone(),
		sink,
		outbound,
	);
	let mut connection_task = tokio::spawn(connection.run(stop.clone()));

	let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!("received interrupt, shutting down"),
		_ = sigterm.recv() => info!("received SIGTERM, shutting down"),
		result = &mut connection_task => match result {
			Ok(Ok(())) => info!("controller connection ended"),
			Ok(Err(e)) => error!(error = %e, "controller connection failed permanently"),
			Err(e) => error!(error = %e, "controller connection task panicked"),
		},
	}

	agent.shutdown().await;
	stop.cancel();
	if !connection_task.is_finished() {
		if let Err(e) = connection_task.await {
			error!(error = %e, "controller connection task failed during shutdown");
		}
	}
	Ok(())
}
