//! In-memory Elasticsearch client recording the calls made to it

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{
    ClusterRoutingAllocation, Health, License, LicenseUpdateRequest, LicenseUpdateResponse, Node,
    Nodes, Shard,
};
use super::{AllocationSetter, EsClient, ShardLister};
use crate::crd::ElasticsearchHealth;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct FakeEsClient {
    pub nodes: Nodes,
    pub health: Health,
    pub routing_allocation: ClusterRoutingAllocation,
    pub shards: Vec<Shard>,
    pub license: Option<License>,
    pub license_status: String,
    /// When set every call fails with a 503
    pub unavailable: bool,

    pub get_nodes_calls: AtomicUsize,
    pub get_health_calls: AtomicUsize,
    pub get_routing_allocation_calls: AtomicUsize,
    pub get_shards_calls: AtomicUsize,
    pub excluded: Mutex<Vec<String>>,
    pub license_updates: Mutex<Vec<LicenseUpdateRequest>>,
}

impl FakeEsClient {
    pub fn with_nodes(names: &[&str]) -> Self {
        Self {
            nodes: Nodes {
                nodes: names
                    .iter()
                    .map(|n| {
                        (
                            format!("id-{n}"),
                            Node {
                                name: n.to_string(),
                                ..Default::default()
                            },
                        )
                    })
                    .collect(),
            },
            ..Default::default()
        }
    }

    pub fn with_health(status: ElasticsearchHealth) -> Self {
        Self {
            health: Health {
                status,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_shards(shards: Vec<Shard>) -> Self {
        Self {
            shards,
            ..Default::default()
        }
    }

    pub fn excluded(&self) -> Vec<String> {
        self.excluded.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::ElasticsearchApi {
                status: 503,
                url: "https://fake:9200".to_string(),
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

pub fn shard(index: &str, node: Option<&str>) -> Shard {
    Shard {
        index: index.to_string(),
        shard: "0".to_string(),
        prirep: "p".to_string(),
        state: if node.is_some() { "STARTED" } else { "UNASSIGNED" }.to_string(),
        node_name: node.map(str::to_string),
    }
}

#[async_trait]
impl ShardLister for FakeEsClient {
    async fn get_shards(&self) -> Result<Vec<Shard>> {
        self.get_shards_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.shards.clone())
    }
}

#[async_trait]
impl AllocationSetter for FakeEsClient {
    async fn exclude_from_shard_allocation(&self, nodes: &str) -> Result<()> {
        self.check_available()?;
        self.excluded.lock().unwrap().push(nodes.to_string());
        Ok(())
    }
}

#[async_trait]
impl EsClient for FakeEsClient {
    async fn get_nodes(&self) -> Result<Nodes> {
        self.get_nodes_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.nodes.clone())
    }

    async fn get_cluster_health(&self, _params: &[(&str, &str)]) -> Result<Health> {
        self.get_health_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.health.clone())
    }

    async fn get_cluster_routing_allocation(&self) -> Result<ClusterRoutingAllocation> {
        self.get_routing_allocation_calls
            .fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.routing_allocation.clone())
    }

    async fn get_license(&self) -> Result<Option<License>> {
        self.check_available()?;
        Ok(self.license.clone())
    }

    async fn update_license(
        &self,
        request: &LicenseUpdateRequest,
    ) -> Result<LicenseUpdateResponse> {
        self.check_available()?;
        self.license_updates.lock().unwrap().push(request.clone());
        Ok(LicenseUpdateResponse {
            acknowledged: true,
            license_status: if self.license_status.is_empty() {
                "valid".to_string()
            } else {
                self.license_status.clone()
            },
        })
    }
}
