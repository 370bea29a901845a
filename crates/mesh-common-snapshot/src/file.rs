// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SnapshotError;
use crate::SnapshotStore;

/// One pretty-printed JSON file per key under a state directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
	dir: PathBuf,
}

impl JsonFileStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, SnapshotError> {
		if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
			return Err(SnapshotError::InvalidKey(key.to_string()));
		}
		Ok(self.dir.join(key))
	}
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
	async fn exists(&self, key: &str) -> bool {
		match self.path_for(key) {
			Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
			Err(_) => false,
		}
	}

	async fn read(&self, key: &str) -> Value {
		let path = match self.path_for(key) {
			Ok(path) => path,
			Err(e) => {
				warn!(error = %e, "refusing to read snapshot");
				return Value::Null;
			}
		};

		let contents = match tokio::fs::read_to_string(&path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "snapshot file not found");
				return Value::Null;
			}
			Err(e) => {
				warn!(path = %path.display(), error = %e, "failed to read snapshot file");
				return Value::Null;
			}
		};

		match serde_json::from_str(&contents) {
			Ok(value) => value,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "snapshot file is corrupt, treating as empty");
				Value::Null
			}
		}
	}

	async fn write(&self, key: &str, value: &Value) -> Result<(), SnapshotError> {
		let path = self.path_for(key)?;
		tokio::fs::create_dir_all(&self.dir).await?;

		let tmp_path = self.dir.join(format!(".{key}.tmp"));
		let json = serde_json::to_string_pretty(value)?;

		tokio::fs::write(&tmp_path, &json).await?;
		tokio::fs::rename(&tmp_path, &path).await?;

		debug!(path = %path.display(), bytes = json.len(), "wrote snapshot");
		Ok(())
	}
}
