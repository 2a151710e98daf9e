//! Wire types for the subset of the Elasticsearch API used by the operator

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::ElasticsearchHealth;

/// Response of `GET /_nodes`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Nodes {
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
}

impl Nodes {
    /// Names of all nodes currently in the cluster
    pub fn names(&self) -> Vec<String> {
        self.nodes.values().map(|n| n.name.clone()).collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Response of `GET /_cluster/health`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Health {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub status: ElasticsearchHealth,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub number_of_nodes: i32,
    #[serde(default)]
    pub number_of_data_nodes: i32,
    #[serde(default)]
    pub active_shards: i32,
    #[serde(default)]
    pub relocating_shards: i32,
    #[serde(default)]
    pub initializing_shards: i32,
    #[serde(default)]
    pub unassigned_shards: i32,
}

/// Routing allocation part of `GET /_cluster/settings`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ClusterRoutingAllocation {
    #[serde(default)]
    pub transient: AllocationSettings,
}

impl ClusterRoutingAllocation {
    /// Shard allocation is enabled unless the transient setting is `none`
    pub fn is_shard_allocation_enabled(&self) -> bool {
        self.transient.cluster.routing.allocation.enable.as_deref() != Some("none")
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AllocationSettings {
    #[serde(default)]
    pub cluster: ClusterSettings,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ClusterSettings {
    #[serde(default)]
    pub routing: RoutingSettings,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RoutingSettings {
    #[serde(default)]
    pub allocation: AllocationSetting,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AllocationSetting {
    #[serde(default)]
    pub enable: Option<String>,
}

/// One row of `GET /_cat/shards?format=json`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Shard {
    pub index: String,
    pub shard: String,
    #[serde(default)]
    pub prirep: String,
    #[serde(default)]
    pub state: String,
    /// Node holding the shard, `None` while unassigned
    #[serde(default, rename = "node")]
    pub node_name: Option<String>,
}

impl Shard {
    pub fn node_name(&self) -> &str {
        self.node_name.as_deref().unwrap_or("")
    }

    /// True if no node holds this shard
    pub fn is_unassigned(&self) -> bool {
        self.node_name().is_empty()
    }
}

/// An Elasticsearch license as returned by `GET /_license` or stored in a license secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct License {
    pub uid: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub issue_date_in_millis: i64,
    #[serde(default)]
    pub expiry_date_in_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date_in_millis: Option<i64>,
    #[serde(default)]
    pub max_nodes: i64,
    #[serde(default)]
    pub issued_to: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Envelope of `GET /_license`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LicenseResponse {
    pub license: Option<License>,
}

/// Body of `PUT /_license`
#[derive(Clone, Debug, Default, Serialize)]
pub struct LicenseUpdateRequest {
    pub licenses: Vec<License>,
}

/// Response of `PUT /_license`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LicenseUpdateResponse {
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub license_status: String,
}

impl LicenseUpdateResponse {
    pub fn is_success(&self) -> bool {
        self.license_status == "valid"
    }
}
