// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Watchers that measure the mesh: per-peer throughput from WireGuard
//! counters, ICMP latency to chosen hosts, and iperf3 throughput tests.

pub mod error;
pub mod latency;
pub mod peers;
pub mod sample;
pub mod throughput;

pub use error::{Result, TelemetryError};
pub use latency::{AutoPingRequest, CommandPinger, LatencyProber, PingResult, Pinger};
pub use peers::{unix_now, Clock, CycleOutcome, PeerWatcher};
pub use sample::{calculate_bw, InterfaceSample, PeerSample, PeerSnapshot, PEERS_INFO_KEY};
pub use throughput::{
	run_throughput_tests, ThroughputResult, ThroughputServer, ThroughputTestRequest,
};
