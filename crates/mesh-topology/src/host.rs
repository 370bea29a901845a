// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use mesh_common_core::report_types;

use crate::error::Result;
use crate::source::{NetworkRecord, NetworkSource};

/// Host networking has nothing to discover.
#[derive(Debug, Default)]
pub struct HostSource;

#[async_trait]
impl NetworkSource for HostSource {
	fn report_type(&self) -> &'static str {
		report_types::HOST_NETWORK_INFO
	}

	async fn poll(&self) -> Result<Vec<NetworkRecord>> {
		Ok(Vec::new())
	}
}
