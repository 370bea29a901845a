// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered agent configuration: defaults, TOML file, environment, command line.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use mesh_topology::NetworkApi;
use serde::Deserialize;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_STATE_DIR: &str = "/var/lib/mesh-agent";
pub const DEFAULT_INTERFACE_PREFIX: &str = "mesh_";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/mesh-agent/agent.toml";

/// Linux caps interface names at 15 bytes; the prefix must leave room for a
/// link name.
const MAX_PREFIX_LEN: usize = 10;

#[derive(Debug, Clone, Parser)]
#[command(name = "mesh-agent", version, about = "WireGuard mesh agent")]
pub struct Cli {
	/// Path to a TOML config file
	#[arg(long, short, env = "MESH_AGENT_CONFIG")]
	pub config: Option<PathBuf>,

	/// Controller websocket URL (ws:// or wss://)
	#[arg(long)]
	pub controller_url: Option<String>,

	/// Topology backend: docker, kubernetes, host or none
	#[arg(long)]
	pub network_api: Option<String>,

	#[arg(long)]
	pub state_dir: Option<PathBuf>,

	#[arg(long)]
	pub interface_prefix: Option<String>,

	/// Log output: pretty or json
	#[arg(long)]
	pub log_format: Option<String>,
}

/// Bearer token presented to the controller.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AgentToken(String);

impl AgentToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for AgentToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("AgentToken([REDACTED])")
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

impl FromStr for LogFormat {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"pretty" | "text" => Ok(LogFormat::Pretty),
			"json" => Ok(LogFormat::Json),
			other => Err(ConfigError::InvalidValue {
				key: "log_format",
				message: format!("expected pretty or json, got {other:?}"),
			}),
		}
	}
}

/// One configuration layer. Every field is optional; later layers override
/// earlier ones field by field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfigLayer {
	pub controller_url: Option<String>,
	pub agent_token: Option<AgentToken>,
	pub network_api: Option<String>,
	pub state_dir: Option<PathBuf>,
	pub interface_prefix: Option<String>,
	pub telemetry_interval_secs: Option<u64>,
	pub telemetry_idle_secs: Option<u64>,
	pub topology_interval_secs: Option<u64>,
	pub watcher_join_timeout_ms: Option<u64>,
	pub log_format: Option<String>,
}

impl AgentConfigLayer {
	pub fn defaults() -> Self {
		Self {
			controller_url: None,
			agent_token: None,
			network_api: Some(NetworkApi::default().as_str().to_string()),
			state_dir: Some(PathBuf::from(DEFAULT_STATE_DIR)),
			interface_prefix: Some(DEFAULT_INTERFACE_PREFIX.to_string()),
			telemetry_interval_secs: Some(60),
			telemetry_idle_secs: Some(1),
			topology_interval_secs: Some(10),
			watcher_join_timeout_ms: Some(1000),
			log_format: Some("pretty".to_string()),
		}
	}

	pub fn merge(&mut self, other: AgentConfigLayer) {
		if other.controller_url.is_some() {
			self.controller_url = other.controller_url;
		}
		if other.agent_token.is_some() {
			self.agent_token = other.agent_token;
		}
		if other.network_api.is_some() {
			self.network_api = other.network_api;
		}
		if other.state_dir.is_some() {
			self.state_dir = other.state_dir;
		}
		if other.interface_prefix.is_some() {
			self.interface_prefix = other.interface_prefix;
		}
		if other.telemetry_interval_secs.is_some() {
			self.telemetry_interval_secs = other.telemetry_interval_secs;
		}
		if other.telemetry_idle_secs.is_some() {
			self.telemetry_idle_secs = other.telemetry_idle_secs;
		}
		if other.topology_interval_secs.is_some() {
			self.topology_interval_secs = other.topology_interval_secs;
		}
		if other.watcher_join_timeout_ms.is_some() {
			self.watcher_join_timeout_ms = other.watcher_join_timeout_ms;
		}
		if other.log_format.is_some() {
			self.log_format = other.log_format;
		}
	}

	pub fn finalize(self) -> Result<AgentConfig, ConfigError> {
		let raw_url = self
			.controller_url
			.ok_or(ConfigError::Missing("controller_url"))?;
		let controller_url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
			key: "controller_url",
			message: e.to_string(),
		})?;
		if !matches!(controller_url.scheme(), "ws" | "wss") {
			return Err(ConfigError::InvalidValue {
				key: "controller_url",
				message: format!("scheme must be ws or wss, got {}", controller_url.scheme()),
			});
		}

		let agent_token = self
			.agent_token
			.filter(|t| !t.expose().trim().is_empty())
			.ok_or(ConfigError::Missing("agent_token"))?;

		let network_api = self
			.network_api
			.as_deref()
			.map(NetworkApi::from_str)
			.transpose()
			.map_err(|e| ConfigError::InvalidValue {
				key: "network_api",
				message: e.to_string(),
			})?
			.unwrap_or_default();

		let interface_prefix = self
			.interface_prefix
			.unwrap_or_else(|| DEFAULT_INTERFACE_PREFIX.to_string());
		if interface_prefix.is_empty()
			|| interface_prefix.len() > MAX_PREFIX_LEN
			|| interface_prefix.contains('/')
			|| interface_prefix.chars().any(char::is_whitespace)
		{
			return Err(ConfigError::InvalidValue {
				key: "interface_prefix",
				message: format!(
					"must be 1-{MAX_PREFIX_LEN} characters without '/' or whitespace, got {interface_prefix:?}"
				),
			});
		}

		let log_format = self
			.log_format
			.as_deref()
			.map(LogFormat::from_str)
			.transpose()?
			.unwrap_or_default();

		Ok(AgentConfig {
			controller_url,
			agent_token,
			network_api,
			state_dir: self
				.state_dir
				.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
			interface_prefix,
			telemetry_interval: secs("telemetry_interval_secs", self.telemetry_interval_secs, 60)?,
			telemetry_idle: secs("telemetry_idle_secs", self.telemetry_idle_secs, 1)?,
			topology_interval: secs("topology_interval_secs", self.topology_interval_secs, 10)?,
			watcher_join_timeout: Duration::from_millis(self.watcher_join_timeout_ms.unwrap_or(1000)),
			log_format,
		})
	}
}

fn secs(key: &'static str, value: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
	match value.unwrap_or(default) {
		0 => Err(ConfigError::InvalidValue {
			key,
			message: "must be greater than zero".into(),
		}),
		n => Ok(Duration::from_secs(n)),
	}
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
	pub controller_url: Url,
	pub agent_token: AgentToken,
	pub network_api: NetworkApi,
	pub state_dir: PathBuf,
	pub interface_prefix: String,
	pub telemetry_interval: Duration,
	pub telemetry_idle: Duration,
	pub topology_interval: Duration,
	pub watcher_join_timeout: Duration,
	pub log_format: LogFormat,
}

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
	CommandLine = 80,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<AgentConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<AgentConfigLayer, ConfigError> {
		Ok(AgentConfigLayer::defaults())
	}
}

pub struct TomlSource {
	path: PathBuf,
	required: bool,
}

impl TomlSource {
	/// A file the operator named explicitly; it must exist.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			required: true,
		}
	}

	pub fn system() -> Self {
		Self {
			path: PathBuf::from(SYSTEM_CONFIG_PATH),
			required: false,
		}
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<AgentConfigLayer, ConfigError> {
		if !self.required && !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(AgentConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: AgentConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: MESH_AGENT_<FIELD>, except the token which is MESH_AGENT_TOKEN.
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	pub fn system() -> Self {
		Self::with_lookup(|name| std::env::var(name).ok())
	}

	pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn u64_var(&self, name: &'static str, key: &'static str) -> Result<Option<u64>, ConfigError> {
		self
			.var(name)
			.map(|v| {
				v.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
					key,
					message: format!("{name}={v:?}: {e}"),
				})
			})
			.transpose()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<AgentConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(AgentConfigLayer {
			controller_url: self.var("MESH_AGENT_CONTROLLER_URL"),
			agent_token: self.var("MESH_AGENT_TOKEN").map(AgentToken::new),
			network_api: self.var("MESH_AGENT_NETWORK_API"),
			state_dir: self.var("MESH_AGENT_STATE_DIR").map(PathBuf::from),
			interface_prefix: self.var("MESH_AGENT_INTERFACE_PREFIX"),
			telemetry_interval_secs: self
				.u64_var("MESH_AGENT_TELEMETRY_INTERVAL_SECS", "telemetry_interval_secs")?,
			telemetry_idle_secs: self.u64_var("MESH_AGENT_TELEMETRY_IDLE_SECS", "telemetry_idle_secs")?,
			topology_interval_secs: self
				.u64_var("MESH_AGENT_TOPOLOGY_INTERVAL_SECS", "topology_interval_secs")?,
			watcher_join_timeout_ms: self
				.u64_var("MESH_AGENT_WATCHER_JOIN_TIMEOUT_MS", "watcher_join_timeout_ms")?,
			log_format: self.var("MESH_AGENT_LOG_FORMAT"),
		})
	}
}

/// Flags given on the command line.
pub struct CliSource(pub Cli);

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"command-line"
	}

	fn precedence(&self) -> Precedence {
		Precedence::CommandLine
	}

	fn load(&self) -> Result<AgentConfigLayer, ConfigError> {
		Ok(AgentConfigLayer {
			controller_url: self.0.controller_url.clone(),
			network_api: self.0.network_api.clone(),
			state_dir: self.0.state_dir.clone(),
			interface_prefix: self.0.interface_prefix.clone(),
			log_format: self.0.log_format.clone(),
			..AgentConfigLayer::default()
		})
	}
}

/// Merges `sources` in precedence order and resolves the result.
pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<AgentConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = AgentConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.finalize()?;
	info!(
		controller = %config.controller_url,
		network_api = %config.network_api,
		state_dir = %config.state_dir.display(),
		interface_prefix = %config.interface_prefix,
		"agent configuration loaded"
	);
	Ok(config)
}

/// Load configuration with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Command line flags
/// 2. Environment variables (`MESH_AGENT_*`)
/// 3. Config file (`--config`, else `/etc/mesh-agent/agent.toml` if present)
/// 4. Built-in defaults
pub fn load_config(cli: &Cli) -> Result<AgentConfig, ConfigError> {
	let file = match &cli.config {
		Some(path) => TomlSource::new(path),
		None => TomlSource::system(),
	};
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(file),
		Box::new(EnvSource::system()),
		Box::new(CliSource(cli.clone())),
	])
}
