// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key-value persistence of the last-seen mesh state.
//!
//! Reads never fail: a missing or unparseable entry reads back as an empty
//! value so callers can treat it as "no previous sample". Writes replace the
//! whole entry atomically.

mod error;
mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

pub use error::SnapshotError;
pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
	async fn exists(&self, key: &str) -> bool;

	/// Returns `Value::Null` when the entry is absent or corrupt.
	async fn read(&self, key: &str) -> Value;

	async fn write(&self, key: &str, value: &Value) -> Result<(), SnapshotError>;
}

pub type SharedStore = Arc<dyn SnapshotStore>;

/// Reads `key` and decodes it, falling back to `T::default()` when the entry
/// is absent, corrupt, or shaped differently than `T`.
pub async fn read_or_default<T>(store: &dyn SnapshotStore, key: &str) -> T
where
	T: DeserializeOwned + Default,
{
	match store.read(key).await {
		Value::Null => T::default(),
		value => serde_json::from_value(value).unwrap_or_else(|e| {
			warn!(key, error = %e, "snapshot entry has unexpected shape, ignoring");
			T::default()
		}),
	}
}
