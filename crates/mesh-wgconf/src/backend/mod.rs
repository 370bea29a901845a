// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The host's WireGuard state behind a trait.
//!
//! Every call queries or mutates the host directly. Implementations must not
//! cache interface or peer state between calls.

mod command;
mod memory;

pub use command::CommandBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BackendError;
use crate::keys::PublicKey;
use crate::model::{InterfaceSpec, InterfaceState, PeerRecord, PeerSpec, Route};

#[async_trait]
pub trait MeshBackend: Send + Sync {
	/// All WireGuard interfaces on the host, managed or not.
	async fn list_interfaces(&self) -> Result<Vec<InterfaceState>, BackendError>;

	async fn list_peers(&self, iface: &str) -> Result<Vec<PeerRecord>, BackendError>;

	/// Creates the interface if missing, then applies address and port.
	/// An existing interface keeps its key.
	async fn create_interface(&self, spec: &InterfaceSpec) -> Result<InterfaceState, BackendError>;

	/// Upserts the peer and installs a route per allowed ip.
	async fn add_peer(&self, iface: &str, peer: &PeerSpec) -> Result<(), BackendError>;

	async fn remove_peer(&self, iface: &str, public_key: &PublicKey) -> Result<(), BackendError>;

	async fn remove_interface(&self, iface: &str) -> Result<(), BackendError>;

	/// Routes pointing at WireGuard interfaces, excluding kernel-generated ones.
	async fn list_routes(&self) -> Result<Vec<Route>, BackendError>;

	async fn remove_route(&self, route: &Route) -> Result<(), BackendError>;
}

pub type SharedBackend = Arc<dyn MeshBackend>;
