// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic ICMP latency probing of controller-chosen hosts (`AUTO_PING`).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use mesh_common_core::{
	report_types, run_command, sleep_or_stop, CancellationToken, CommandError, ReportEnvelope,
	SharedSink, Watcher, WatcherCategory,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TelemetryError};

fn default_interval() -> u64 {
	10
}

fn default_count() -> u32 {
	4
}

/// Payload of an `AUTO_PING` command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutoPingRequest {
	#[serde(default)]
	pub ips: Vec<String>,
	/// Seconds between probe rounds.
	#[serde(default = "default_interval")]
	pub interval: u64,
	/// Echo requests per host per round.
	#[serde(default = "default_count", alias = "response_limit")]
	pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
	pub ip: String,
	pub latency_ms: Option<f64>,
	pub packet_loss: f64,
}

impl PingResult {
	fn unreachable(ip: &str) -> Self {
		Self {
			ip: ip.to_string(),
			latency_ms: None,
			packet_loss: 100.0,
		}
	}
}

#[async_trait]
pub trait Pinger: Send + Sync {
	async fn ping(&self, host: &str, count: u32) -> Result<PingResult>;
}

/// Checks a controller-supplied probe target before it reaches a command
/// line: an IP address or a plain DNS name, never something `ping` or
/// `iperf3` would read as an option.
pub fn validate_host(host: &str) -> Result<()> {
	if host.parse::<IpAddr>().is_ok() {
		return Ok(());
	}
	let plain_name = !host.is_empty()
		&& host.len() <= 253
		&& !host.starts_with(['-', '.'])
		&& host
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
	if plain_name {
		Ok(())
	} else {
		Err(TelemetryError::InvalidRequest(format!("invalid host {host:?}")))
	}
}

/// Shells out to the system `ping`.
#[derive(Debug, Default)]
pub struct CommandPinger;

#[async_trait]
impl Pinger for CommandPinger {
	async fn ping(&self, host: &str, count: u32) -> Result<PingResult> {
		validate_host(host)?;
		let count = count.to_string();
		match run_command("ping", &["-c", &count, "-W", "1", "-q", host]).await {
			Ok(output) => parse_ping_output(host, &output),
			// ping exits non-zero when nothing answered
			Err(CommandError::Failed { .. }) => Ok(PingResult::unreachable(host)),
			Err(e) => Err(e.into()),
		}
	}
}

/// Parses the summary of `ping -q`:
///
/// ```text
/// 4 packets transmitted, 4 received, 0% packet loss, time 3004ms
/// rtt min/avg/max/mdev = 0.041/0.052/0.061/0.008 ms
/// ```
pub fn parse_ping_output(host: &str, output: &str) -> Result<PingResult> {
	let parse_error = |reason: &str| TelemetryError::Parse {
		tool: "ping",
		reason: reason.to_string(),
	};

	let loss_line = output
		.lines()
		.find(|l| l.contains("packet loss"))
		.ok_or_else(|| parse_error("missing packet loss summary"))?;
	let packet_loss = loss_line
		.split(',')
		.find_map(|part| part.trim().strip_suffix("% packet loss"))
		.and_then(|n| n.trim().parse::<f64>().ok())
		.ok_or_else(|| parse_error(loss_line))?;

	let latency_ms = output
		.lines()
		.find(|l| l.starts_with("rtt") || l.starts_with("round-trip"))
		.and_then(|l| l.split('=').nth(1))
		.and_then(|values| values.trim().split('/').nth(1))
		.and_then(|avg| avg.trim().parse::<f64>().ok());

	Ok(PingResult {
		ip: host.to_string(),
		latency_ms,
		packet_loss,
	})
}

pub struct LatencyProber {
	request: AutoPingRequest,
	pinger: Arc<dyn Pinger>,
	sink: SharedSink,
}

impl LatencyProber {
	pub fn new(request: AutoPingRequest, pinger: Arc<dyn Pinger>, sink: SharedSink) -> Self {
		Self {
			request,
			pinger,
			sink,
		}
	}

	/// One round over every host, concurrently.
	pub async fn probe(&self) -> Vec<PingResult> {
		let pings = self.request.ips.iter().map(|ip| async move {
			match self.pinger.ping(ip, self.request.count).await {
				Ok(result) => result,
				Err(e) => {
					warn!(ip = %ip, error = %e, "ping failed");
					PingResult::unreachable(ip)
				}
			}
		});
		join_all(pings).await
	}

	async fn cycle(&self) -> Result<()> {
		if self.request.ips.is_empty() {
			debug!("no hosts to probe");
			return Ok(());
		}
		let results = self.probe().await;
		let report =
			ReportEnvelope::unsolicited(report_types::AUTO_PING, serde_json::to_value(&results)?);
		self.sink.send(report).await?;
		Ok(())
	}
}

#[async_trait]
impl Watcher for LatencyProber {
	fn category(&self) -> WatcherCategory {
		WatcherCategory::LatencyProbe
	}

	async fn run(self: Arc<Self>, stop: CancellationToken) {
		info!(hosts = self.request.ips.len(), interval_secs = self.request.interval, "latency prober started");
		let interval = Duration::from_secs(self.request.interval.max(1));
		loop {
			if stop.is_cancelled() {
				break;
			}
			if let Err(e) = self.cycle().await {
				error!(error = %e, "latency probe cycle failed");
			}
			if sleep_or_stop(&stop, interval).await {
				break;
			}
		}
		info!("latency prober stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_common_core::testing::RecordingSink;
	use mesh_common_core::{ReportSink, SinkError};
	use serde_json::json;

	struct FakePinger;

	#[async_trait]
	impl Pinger for FakePinger {
		async fn ping(&self, host: &str, _count: u32) -> Result<PingResult> {
			if host == "10.0.0.99" {
				return Err(TelemetryError::InvalidRequest("unreachable".into()));
			}
			Ok(PingResult {
				ip: host.to_string(),
				latency_ms: Some(1.5),
				packet_loss: 0.0,
			})
		}
	}

	#[test]
	fn parses_linux_ping_summary() {
		let output = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.\n\n\
			--- 10.0.0.1 ping statistics ---\n\
			4 packets transmitted, 3 received, 25% packet loss, time 3004ms\n\
			rtt min/avg/max/mdev = 0.041/0.052/0.061/0.008 ms";
		let result = parse_ping_output("10.0.0.1", output).unwrap();
		assert_eq!(result.packet_loss, 25.0);
		assert_eq!(result.latency_ms, Some(0.052));
	}

	#[test]
	fn parses_bsd_ping_summary() {
		let output = "4 packets transmitted, 4 packets received, 0.0% packet loss\n\
			round-trip min/avg/max/stddev = 10.1/12.5/14.0/1.2 ms";
		let result = parse_ping_output("h", output).unwrap();
		assert_eq!(result.packet_loss, 0.0);
		assert_eq!(result.latency_ms, Some(12.5));
	}

	#[test]
	fn missing_summary_is_a_parse_error() {
		assert!(matches!(
			parse_ping_output("h", "garbage"),
			Err(TelemetryError::Parse { tool: "ping", .. })
		));
	}

	#[test]
	fn hosts_that_look_like_options_are_rejected() {
		for host in ["10.0.0.1", "fd00::1", "agent-7.mesh.internal"] {
			assert!(validate_host(host).is_ok(), "{host}");
		}
		for host in ["-f", "--flood", "", ".hidden", "10.0.0.1 -f", "a;b"] {
			assert!(
				matches!(validate_host(host), Err(TelemetryError::InvalidRequest(_))),
				"{host}"
			);
		}
	}

	#[tokio::test]
	async fn command_pinger_refuses_option_hosts() {
		assert!(matches!(
			CommandPinger.ping("-f", 1).await,
			Err(TelemetryError::InvalidRequest(_))
		));
	}

	#[test]
	fn request_defaults() {
		let request: AutoPingRequest = serde_json::from_value(json!({"ips": ["10.0.0.1"]})).unwrap();
		assert_eq!(request.interval, 10);
		assert_eq!(request.count, 4);
	}

	/// Refuses the first report, then records.
	struct FlakySink {
		inner: RecordingSink,
		refused: std::sync::atomic::AtomicBool,
	}

	#[async_trait]
	impl ReportSink for FlakySink {
		async fn send(&self, report: ReportEnvelope) -> std::result::Result<(), SinkError> {
			if !self.refused.swap(true, std::sync::atomic::Ordering::SeqCst) {
				return Err(SinkError::Closed);
			}
			self.inner.send(report).await
		}
	}

	#[tokio::test(start_paused = true)]
	async fn failed_round_does_not_stop_probing() {
		let sink = Arc::new(FlakySink {
			inner: RecordingSink::new(),
			refused: Default::default(),
		});
		let prober = Arc::new(LatencyProber::new(
			AutoPingRequest {
				ips: vec!["10.0.0.1".into()],
				interval: 5,
				count: 1,
			},
			Arc::new(FakePinger),
			sink.clone(),
		));
		let stop = CancellationToken::new();
		let handle = tokio::spawn(prober.clone().run(stop.clone()));

		tokio::time::sleep(Duration::from_secs(1)).await;
		assert!(sink.inner.reports().is_empty());

		let reports = sink
			.inner
			.wait_for(report_types::AUTO_PING, 1, Duration::from_secs(30))
			.await;
		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0].data[0]["ip"], "10.0.0.1");

		stop.cancel();
		tokio::time::timeout(Duration::from_millis(100), handle)
			.await
			.expect("prober observed stop within one tick")
			.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn reports_each_round_and_marks_failures_unreachable() {
		let sink = Arc::new(RecordingSink::new());
		let prober = Arc::new(LatencyProber::new(
			AutoPingRequest {
				ips: vec!["10.0.0.1".into(), "10.0.0.99".into()],
				interval: 5,
				count: 1,
			},
			Arc::new(FakePinger),
			sink.clone(),
		));
		let stop = CancellationToken::new();
		let handle = tokio::spawn(prober.clone().run(stop.clone()));

		let reports = sink
			.wait_for(report_types::AUTO_PING, 2, Duration::from_secs(30))
			.await;
		stop.cancel();
		handle.await.unwrap();

		assert_eq!(reports.len(), 2);
		let data = &reports[0].data;
		assert_eq!(data[0]["latency_ms"], 1.5);
		assert_eq!(data[1]["ip"], "10.0.0.99");
		assert_eq!(data[1]["packet_loss"], 100.0);
		assert!(data[1]["latency_ms"].is_null());
	}
}
