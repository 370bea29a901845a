// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! iperf3 server lifecycle (`IPERF_SERVER`) and on-demand throughput tests
//! against other agents (`IPERF_TEST`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_common_core::{
	run_command, sleep_or_stop, CancellationToken, Watcher, WatcherCategory,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::{Result, TelemetryError};
use crate::latency::validate_host;

const RESTART_DELAY: Duration = Duration::from_secs(5);
const TEST_SECONDS: &str = "5";

/// Keeps an `iperf3 -s` process alive until stopped.
pub struct ThroughputServer {
	program: String,
	args: Vec<String>,
}

impl ThroughputServer {
	pub fn iperf3() -> Self {
		Self::with_command("iperf3", ["-s"])
	}

	pub fn with_command<I, S>(program: impl Into<String>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
		}
	}
}

#[async_trait]
impl Watcher for ThroughputServer {
	fn category(&self) -> WatcherCategory {
		WatcherCategory::ThroughputTest
	}

	async fn run(self: Arc<Self>, stop: CancellationToken) {
		info!(program = %self.program, "throughput server starting");
		loop {
			let mut child = match Command::new(&self.program)
				.args(&self.args)
				.kill_on_drop(true)
				.spawn()
			{
				Ok(child) => child,
				Err(e) => {
					error!(program = %self.program, error = %e, "failed to start throughput server");
					if sleep_or_stop(&stop, RESTART_DELAY).await {
						break;
					}
					continue;
				}
			};

			tokio::select! {
				_ = stop.cancelled() => {
					if let Err(e) = child.kill().await {
						warn!(error = %e, "failed to kill throughput server");
					}
					break;
				}
				status = child.wait() => {
					warn!(status = ?status, "throughput server exited, restarting");
					if sleep_or_stop(&stop, RESTART_DELAY).await {
						break;
					}
				}
			}
		}
		info!("throughput server stopped");
	}
}

/// Payload of an `IPERF_TEST` command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThroughputTestRequest {
	pub hosts: Vec<String>,
}

impl ThroughputTestRequest {
	/// `hosts` must be present and a list.
	pub fn from_value(data: &Value) -> Result<Self> {
		match data.get("hosts") {
			Some(Value::Array(_)) => serde_json::from_value(data.clone())
				.map_err(|e| TelemetryError::InvalidRequest(e.to_string())),
			_ => Err(TelemetryError::InvalidRequest("must be list".into())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputResult {
	pub host: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sent_mbps: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub received_mbps: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Runs `iperf3 -c` against each host in turn; tests never overlap.
pub async fn run_throughput_tests(request: &ThroughputTestRequest) -> Vec<ThroughputResult> {
	run_each(&request.hosts, iperf_client).await
}

async fn iperf_client(host: String) -> Result<(f64, f64)> {
	validate_host(&host)?;
	let output = run_command("iperf3", &["-c", &host, "-J", "-t", TEST_SECONDS]).await?;
	parse_iperf_json(&output)
}

async fn run_each<F, Fut>(hosts: &[String], test: F) -> Vec<ThroughputResult>
where
	F: Fn(String) -> Fut,
	Fut: Future<Output = Result<(f64, f64)>>,
{
	let mut results = Vec::with_capacity(hosts.len());
	for host in hosts {
		let result = match test(host.clone()).await {
			Ok((sent, received)) => ThroughputResult {
				host: host.clone(),
				sent_mbps: Some(sent),
				received_mbps: Some(received),
				error: None,
			},
			Err(e) => {
				warn!(host = %host, error = %e, "throughput test failed");
				ThroughputResult {
					host: host.clone(),
					sent_mbps: None,
					received_mbps: None,
					error: Some(e.to_string()),
				}
			}
		};
		results.push(result);
	}
	results
}

/// Extracts (sent, received) Mbit/s from `iperf3 -J` output.
pub fn parse_iperf_json(output: &str) -> Result<(f64, f64)> {
	let value: Value = serde_json::from_str(output).map_err(|e| TelemetryError::Parse {
		tool: "iperf3",
		reason: e.to_string(),
	})?;

	if let Some(error) = value.get("error").and_then(Value::as_str) {
		return Err(TelemetryError::Parse {
			tool: "iperf3",
			reason: error.to_string(),
		});
	}

	let bps = |section: &str| {
		value["end"][section]["bits_per_second"]
			.as_f64()
			.ok_or_else(|| TelemetryError::Parse {
				tool: "iperf3",
				reason: format!("missing end.{section}.bits_per_second"),
			})
	};

	Ok((bps("sum_sent")? / 1_000_000.0, bps("sum_received")? / 1_000_000.0))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn hosts_must_be_a_list() {
		assert!(matches!(
			ThroughputTestRequest::from_value(&json!({"hosts": "10.0.0.1"})),
			Err(TelemetryError::InvalidRequest(msg)) if msg == "must be list"
		));
		assert!(matches!(
			ThroughputTestRequest::from_value(&json!({})),
			Err(TelemetryError::InvalidRequest(msg)) if msg == "must be list"
		));
		let ok = ThroughputTestRequest::from_value(&json!({"hosts": ["10.0.0.1"]})).unwrap();
		assert_eq!(ok.hosts, vec!["10.0.0.1".to_string()]);
	}

	#[test]
	fn parses_iperf_summary() {
		let output = json!({
			"start": {},
			"end": {
				"sum_sent": {"bits_per_second": 942_000_000.0},
				"sum_received": {"bits_per_second": 938_500_000.0}
			}
		})
		.to_string();
		let (sent, received) = parse_iperf_json(&output).unwrap();
		assert_eq!(sent, 942.0);
		assert_eq!(received, 938.5);
	}

	#[test]
	fn iperf_error_field_is_surfaced() {
		let output = json!({"error": "unable to connect to server"}).to_string();
		let err = parse_iperf_json(&output).unwrap_err();
		assert!(err.to_string().contains("unable to connect"));
	}

	#[tokio::test(start_paused = true)]
	async fn hosts_are_tested_one_at_a_time() {
		use std::sync::atomic::{AtomicUsize, Ordering};

		let running = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		let hosts: Vec<String> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"].map(String::from).into();

		let results = run_each(&hosts, |host| {
			let running = running.clone();
			let peak = peak.clone();
			async move {
				let now = running.fetch_add(1, Ordering::SeqCst) + 1;
				peak.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_secs(5)).await;
				running.fetch_sub(1, Ordering::SeqCst);
				if host == "10.0.0.2" {
					return Err(TelemetryError::InvalidRequest("refused".into()));
				}
				Ok((100.0, 90.0))
			}
		})
		.await;

		assert_eq!(peak.load(Ordering::SeqCst), 1);
		let order: Vec<_> = results.iter().map(|r| r.host.as_str()).collect();
		assert_eq!(order, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
		assert_eq!(results[0].sent_mbps, Some(100.0));
		assert!(results[1].error.as_deref().unwrap().contains("refused"));
		assert_eq!(results[2].received_mbps, Some(90.0));
	}

	#[tokio::test]
	async fn option_like_host_is_refused_without_running_iperf() {
		let request = ThroughputTestRequest {
			hosts: vec!["--server".into()],
		};
		let results = run_throughput_tests(&request).await;
		assert_eq!(results.len(), 1);
		assert!(results[0].error.as_deref().unwrap().contains("invalid host"));
	}

	#[tokio::test]
	async fn server_process_is_killed_on_stop() {
		let server = Arc::new(ThroughputServer::with_command("sleep", ["30"]));
		assert_eq!(server.category(), WatcherCategory::ThroughputTest);

		let stop = CancellationToken::new();
		let handle = tokio::spawn(server.run(stop.clone()));
		tokio::time::sleep(Duration::from_millis(50)).await;
		stop.cancel();

		tokio::time::timeout(Duration::from_secs(5), handle)
			.await
			.expect("server stopped")
			.unwrap();
	}
}
