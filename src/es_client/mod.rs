//! Elasticsearch HTTP API client
//!
//! The reconciler only depends on the traits defined here. `HttpEsClient` is
//! the production implementation; tests plug in fakes.

#[cfg(test)]
pub(crate) mod fake;
mod http;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::crd::Elasticsearch;
use crate::error::Result;

pub use http::{EsCredentials, HttpEsClient, KubeEsClientFactory};
pub use types::{
    ClusterRoutingAllocation, Health, License, LicenseUpdateRequest, LicenseUpdateResponse, Node,
    Nodes, Shard,
};

/// Default deadline applied to every request sent to Elasticsearch
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists the shards of a cluster
#[async_trait]
pub trait ShardLister: Send + Sync {
    async fn get_shards(&self) -> Result<Vec<Shard>>;
}

/// Controls shard allocation filtering
#[async_trait]
pub trait AllocationSetter: Send + Sync {
    /// Overwrite `cluster.routing.allocation.exclude._name` with `nodes`
    async fn exclude_from_shard_allocation(&self, nodes: &str) -> Result<()>;
}

/// The Elasticsearch API surface the operator relies on
#[async_trait]
pub trait EsClient: ShardLister + AllocationSetter {
    async fn get_nodes(&self) -> Result<Nodes>;

    /// `params` are passed as query parameters, e.g. `("wait_for_status", "green")`
    async fn get_cluster_health(&self, params: &[(&str, &str)]) -> Result<Health>;

    async fn get_cluster_routing_allocation(&self) -> Result<ClusterRoutingAllocation>;

    /// Currently installed license, `None` if the cluster reports none
    async fn get_license(&self) -> Result<Option<License>>;

    async fn update_license(&self, request: &LicenseUpdateRequest)
        -> Result<LicenseUpdateResponse>;
}

/// Builds an Elasticsearch client for a given cluster
#[async_trait]
pub trait EsClientFactory: Send + Sync {
    async fn client_for(&self, es: &Elasticsearch) -> Result<Arc<dyn EsClient>>;
}
