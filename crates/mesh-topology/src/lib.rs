// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network topology discovery.
//!
//! One [`NetworkSource`] is selected at startup from [`NetworkApi`] and polled
//! by a [`TopologyWatcher`], which reports the subnets reachable behind this
//! agent whenever they change.

pub mod docker;
pub mod error;
pub mod host;
pub mod kubernetes;
pub mod source;
pub mod watcher;

pub use docker::DockerSource;
pub use error::{Result, TopologyError};
pub use host::HostSource;
pub use kubernetes::{KubePodLister, KubernetesSource, PodAddress, PodLister};
pub use source::{NetworkApi, NetworkRecord, NetworkSource, SharedSource};
pub use watcher::{select_source, TopologyWatcher};
