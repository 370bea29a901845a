// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use mesh_common_core::report_types;
use tracing::{debug, info, instrument};

use crate::error::{Result, TopologyError};
use crate::source::{NetworkRecord, NetworkSource};

/// A scheduled workload and its address, if it has one yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodAddress {
	pub name: String,
	pub ip: Option<String>,
}

/// Read-only, cluster-wide pod listing.
#[async_trait]
pub trait PodLister: Send + Sync {
	async fn list_pods(&self) -> Result<Vec<PodAddress>>;
}

/// [`PodLister`] backed by the Kubernetes API.
pub struct KubePodLister {
	client: Client,
}

impl KubePodLister {
	/// Loads in-cluster service account credentials, falling back to the
	/// local kubeconfig. Fails with [`TopologyError::KubernetesConfig`] when
	/// neither is available.
	pub async fn connect() -> Result<Self> {
		let config = match Config::incluster() {
			Ok(config) => {
				info!("using in-cluster kubernetes credentials");
				config
			}
			Err(incluster) => {
				debug!(error = %incluster, "not running in a cluster, trying kubeconfig");
				Config::from_kubeconfig(&KubeConfigOptions::default())
					.await
					.map_err(|e| {
						TopologyError::KubernetesConfig(format!(
							"no in-cluster config ({incluster}) and no kubeconfig ({e})"
						))
					})?
			}
		};
		let client = Client::try_from(config)?;
		Ok(Self { client })
	}

	pub fn from_client(client: Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl PodLister for KubePodLister {
	#[instrument(skip(self))]
	async fn list_pods(&self) -> Result<Vec<PodAddress>> {
		let pods: Api<Pod> = Api::all(self.client.clone());
		let list = pods.list(&ListParams::default()).await?;
		Ok(list
			.items
			.into_iter()
			.map(|pod| PodAddress {
				name: pod.metadata.name.unwrap_or_default(),
				ip: pod.status.and_then(|s| s.pod_ip),
			})
			.collect())
	}
}

/// Every pod in the cluster as a `/32`.
pub struct KubernetesSource {
	lister: Arc<dyn PodLister>,
}

impl KubernetesSource {
	pub fn new(lister: Arc<dyn PodLister>) -> Self {
		Self { lister }
	}
}

#[async_trait]
impl NetworkSource for KubernetesSource {
	fn report_type(&self) -> &'static str {
		report_types::KUBERNETES_NETWORK_INFO
	}

	async fn poll(&self) -> Result<Vec<NetworkRecord>> {
		let pods = self.lister.list_pods().await?;
		let total = pods.len();
		let records: Vec<NetworkRecord> = pods
			.into_iter()
			.filter_map(|pod| {
				let ip = pod.ip.filter(|ip| !ip.is_empty())?;
				Some(NetworkRecord::new(format!("{ip}/32"), pod.name))
			})
			.collect();
		debug!(pods = total, addressed = records.len(), "polled kubernetes pods");
		Ok(records)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct StaticPods(Vec<PodAddress>);

	#[async_trait]
	impl PodLister for StaticPods {
		async fn list_pods(&self) -> Result<Vec<PodAddress>> {
			Ok(self.0.clone())
		}
	}

	#[tokio::test]
	async fn pods_become_host_subnets() {
		let source = KubernetesSource::new(Arc::new(StaticPods(vec![
			PodAddress {
				name: "web-0".into(),
				ip: Some("10.244.1.7".into()),
			},
			PodAddress {
				name: "pending-0".into(),
				ip: None,
			},
		])));

		assert_eq!(source.report_type(), "KUBERNETES_NETWORK_INFO");
		assert_eq!(
			source.poll().await.unwrap(),
			vec![NetworkRecord::new("10.244.1.7/32", "web-0")]
		);
	}
}
