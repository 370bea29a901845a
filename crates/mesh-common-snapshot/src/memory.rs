// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::SnapshotError;
use crate::SnapshotStore;

/// Volatile store keeping raw JSON text, so tests can plant corrupt entries.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn insert_raw(&self, key: &str, raw: &str) {
		self
			.entries
			.write()
			.await
			.insert(key.to_string(), raw.to_string());
	}
}

#[async_trait]
impl SnapshotStore for MemoryStore {
	async fn exists(&self, key: &str) -> bool {
		self.entries.read().await.contains_key(key)
	}

	async fn read(&self, key: &str) -> Value {
		self
			.entries
			.read()
			.await
			.get(key)
			.and_then(|raw| serde_json::from_str(raw).ok())
			.unwrap_or(Value::Null)
	}

	async fn write(&self, key: &str, value: &Value) -> Result<(), SnapshotError> {
		let raw = serde_json::to_string(value)?;
		self.entries.write().await.insert(key.to_string(), raw);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn corrupt_entry_reads_as_null() {
		let store = MemoryStore::new();
		store.insert_raw("peers_info", "{{{").await;
		assert!(store.exists("peers_info").await);
		assert_eq!(store.read("peers_info").await, Value::Null);
	}
}
