//! Elasticsearch Custom Resource Definition
//!
//! The Elasticsearch CRD declares the desired topology of a cluster as a list
//! of node sets, plus the change budget and transport security settings the
//! operator honours while converging the live cluster.

use std::collections::HashSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, ElasticsearchHealth, OrchestrationPhase, TransportConfig, UpdateStrategy,
};

/// Label carried by every Pod belonging to a cluster
pub const CLUSTER_NAME_LABEL: &str = "elasticsearch.k8s.elastic.co/cluster-name";
/// Label carried by every Pod belonging to a node set
pub const NODE_SET_LABEL: &str = "elasticsearch.k8s.elastic.co/statefulset-name";

const MAX_NODE_SET_NAME_LEN: usize = 23;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "elasticsearch.k8s.elastic.co",
    version = "v1",
    kind = "Elasticsearch",
    namespaced,
    status = "ElasticsearchStatus",
    shortname = "es",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Version of Elasticsearch
    pub version: String,

    /// Groups of nodes sharing the same configuration
    #[serde(default)]
    pub node_sets: Vec<NodeSet>,

    #[serde(default)]
    pub update_strategy: UpdateStrategy,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// A group of Elasticsearch nodes with the same configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSet {
    pub name: String,

    #[serde(default)]
    pub count: i32,

    /// Raw elasticsearch.yml settings for this node set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl ElasticsearchSpec {
    /// Total number of nodes across all node sets
    pub fn node_count(&self) -> i32 {
        self.node_sets.iter().map(|n| n.count.max(0)).sum()
    }

    /// Validate the parts of the spec the reconciler relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("spec.version must be set".to_string());
        }
        let mut seen = HashSet::new();
        for node_set in &self.node_sets {
            if node_set.name.is_empty() {
                return Err("nodeSets[].name must not be empty".to_string());
            }
            if node_set.name.len() > MAX_NODE_SET_NAME_LEN {
                return Err(format!(
                    "nodeSet name {:?} is longer than {} characters",
                    node_set.name, MAX_NODE_SET_NAME_LEN
                ));
            }
            if !node_set
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                return Err(format!(
                    "nodeSet name {:?} may only contain alphanumerics and '-'",
                    node_set.name
                ));
            }
            if node_set.count < 0 {
                return Err(format!(
                    "nodeSet {:?} count must not be negative",
                    node_set.name
                ));
            }
            if !seen.insert(node_set.name.as_str()) {
                return Err(format!("duplicate nodeSet name {:?}", node_set.name));
            }
        }
        if let Some(budget) = &self.update_strategy.change_budget {
            budget
                .validate()
                .map_err(|e| format!("updateStrategy.changeBudget: {e}"))?;
        }
        Ok(())
    }
}

/// Observed state of an Elasticsearch cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchStatus {
    #[serde(default)]
    pub health: ElasticsearchHealth,

    #[serde(default)]
    pub phase: OrchestrationPhase,

    /// Number of nodes that joined the cluster
    #[serde(default)]
    pub available_nodes: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Pod count when the ongoing rolling change started. Percentages of the
    /// change budget resolve against it. Serialized as null once the change
    /// completes so that a merge patch clears it.
    #[serde(default)]
    pub update_starting_pods: Option<i32>,
}

impl ElasticsearchStatus {
    /// True if the current health is worse than the previous one
    pub fn is_degraded(&self, prev: &ElasticsearchStatus) -> bool {
        self.health.is_worse_than(prev.health)
    }
}

/// Naming conventions for resources derived from an Elasticsearch cluster
pub mod naming {
    pub fn stateful_set(es_name: &str, node_set: &str) -> String {
        format!("{es_name}-es-{node_set}")
    }

    pub fn pod(es_name: &str, node_set: &str, ordinal: i32) -> String {
        format!("{}-{}", stateful_set(es_name, node_set), ordinal)
    }

    pub fn transport_ca_internal_secret(es_name: &str) -> String {
        format!("{es_name}-es-transport-ca-internal")
    }

    /// Dynamic watches are shared by all namespaces, hence the namespace prefix
    pub fn custom_transport_certs_watch_key(namespace: &str, es_name: &str) -> String {
        format!("{namespace}/{es_name}-es-custom-transport-certs")
    }

    pub fn elastic_user_secret(es_name: &str) -> String {
        format!("{es_name}-es-elastic-user")
    }

    pub fn http_certs_public_secret(es_name: &str) -> String {
        format!("{es_name}-es-http-certs-public")
    }

    pub fn http_service(es_name: &str) -> String {
        format!("{es_name}-es-http")
    }

    pub fn license_secret(es_name: &str) -> String {
        format!("{es_name}-license")
    }

    /// Splits a Pod name into its StatefulSet name and ordinal
    pub fn split_pod_name(pod_name: &str) -> Option<(&str, i32)> {
        let (sts, ordinal) = pod_name.rsplit_once('-')?;
        Some((sts, ordinal.parse().ok()?))
    }
}
