// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard state management for the mesh agent.
//!
//! - [`keys`]: interface and peer key types
//! - [`model`]: controller desired-state payloads and host-side records
//! - [`backend`]: the [`MeshBackend`] seam with `wg`/`ip` and in-memory
//!   implementations
//! - [`reconcile`]: the [`Reconciler`] converging the host onto a desired state

pub mod backend;
pub mod error;
pub mod keys;
pub mod model;
pub mod reconcile;

pub use backend::{CommandBackend, MemoryBackend, MeshBackend, SharedBackend};
pub use error::{BackendError, Result, WgConfError};
pub use keys::{KeyError, PrivateKey, PublicKey};
pub use model::{
	DesiredMeshState, InterfaceState, LinkSpec, PeerRecord, PeerSpec, ReportEntry, Route,
	VpnCommand, VpnOperation,
};
pub use reconcile::{Applied, Reconciler};
