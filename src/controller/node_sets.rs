//! Comparison of the declared node sets with the StatefulSets in place

use std::collections::HashSet;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use super::change_budget::PodCounts;
use super::resources::is_pod_ready;
use crate::crd::{naming, Elasticsearch};

/// One StatefulSet and the replica count it should converge to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSetState {
    pub node_set: String,
    pub stateful_set: String,
    pub current: i32,
    pub desired: i32,
}

impl NodeSetState {
    /// Pods above the desired count, highest ordinal first
    pub fn leaving_pods(&self, es_name: &str) -> Vec<String> {
        (self.desired..self.current)
            .rev()
            .map(|ordinal| naming::pod(es_name, &self.node_set, ordinal))
            .collect()
    }
}

/// Differences between the declared and the observed topology
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeChanges {
    pub node_sets: Vec<NodeSetState>,
    /// Declared node sets without a StatefulSet
    pub missing: Vec<String>,
    /// Pods that must leave the cluster
    pub leaving: Vec<String>,
    /// Leaving Pods that are not ready, including those that do not exist
    pub leaving_unready: HashSet<String>,
    /// Ready Pods that stay in the cluster
    pub remaining: Vec<String>,
    pub counts: PodCounts,
}

impl NodeChanges {
    pub fn compute(es: &Elasticsearch, stateful_sets: &[StatefulSet], pods: &[Pod]) -> Self {
        let es_name = es.name_any();
        let prefix = format!("{es_name}-es-");

        let mut node_sets: Vec<NodeSetState> = stateful_sets
            .iter()
            .filter_map(|sts| {
                let name = sts.name_any();
                let node_set = name.strip_prefix(&prefix)?.to_string();
                let desired = es
                    .spec
                    .node_sets
                    .iter()
                    .find(|ns| ns.name == node_set)
                    .map(|ns| ns.count.max(0))
                    .unwrap_or(0);
                let current = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                Some(NodeSetState {
                    node_set,
                    stateful_set: name,
                    current,
                    desired,
                })
            })
            .collect();
        node_sets.sort_by(|a, b| a.stateful_set.cmp(&b.stateful_set));

        let existing: HashSet<&str> = node_sets.iter().map(|s| s.node_set.as_str()).collect();
        let missing = es
            .spec
            .node_sets
            .iter()
            .filter(|ns| !existing.contains(ns.name.as_str()))
            .map(|ns| ns.name.clone())
            .collect();

        let leaving: Vec<String> = node_sets
            .iter()
            .flat_map(|s| s.leaving_pods(&es_name))
            .collect();

        let ready: Vec<String> = pods
            .iter()
            .filter(|p| is_pod_ready(p))
            .map(|p| p.name_any())
            .collect();
        let remaining = ready
            .iter()
            .filter(|name| !leaving.contains(name))
            .cloned()
            .collect();
        let leaving_unready: HashSet<String> = leaving
            .iter()
            .filter(|name| !ready.contains(name))
            .cloned()
            .collect();

        let replicas: i32 = node_sets.iter().map(|s| s.current.max(0)).sum();
        let counts = PodCounts {
            target: to_u32(node_sets.iter().map(|s| s.desired).sum()),
            current: to_u32(replicas).max(count(pods.len())),
            ready: count(ready.len()),
            to_create: to_u32(
                node_sets
                    .iter()
                    .map(|s| (s.desired - s.current).max(0))
                    .sum(),
            ),
            to_delete: count(leaving.len()),
            to_delete_unready: count(leaving_unready.len()),
        };

        Self {
            node_sets,
            missing,
            leaving,
            leaving_unready,
            remaining,
            counts,
        }
    }

    /// New replica counts for StatefulSets that grow, using at most `creations` new Pods
    pub fn scale_ups(&self, mut creations: u32) -> Vec<(String, i32)> {
        let mut updates = Vec::new();
        for set in &self.node_sets {
            if creations == 0 {
                break;
            }
            let wanted = to_u32(set.desired - set.current);
            let granted = wanted.min(creations);
            if granted > 0 {
                creations -= granted;
                updates.push((set.stateful_set.clone(), set.current + granted as i32));
            }
        }
        updates
    }

    /// New replica counts for StatefulSets that shrink.
    ///
    /// Only trailing Pods whose shutdown is complete are removed, at most
    /// `deletions` of them. Pods that are not ready always fit in the budget,
    /// ready ones use what remains of it.
    pub fn scale_downs(
        &self,
        es_name: &str,
        complete: &HashSet<String>,
        deletions: u32,
    ) -> Vec<(String, i32)> {
        let mut ready_deletions = deletions.saturating_sub(count(self.leaving_unready.len()));
        let mut updates = Vec::new();
        for set in &self.node_sets {
            let mut replicas = set.current;
            while replicas > set.desired {
                let pod = naming::pod(es_name, &set.node_set, replicas - 1);
                if !complete.contains(&pod) {
                    break;
                }
                if !self.leaving_unready.contains(&pod) {
                    if ready_deletions == 0 {
                        break;
                    }
                    ready_deletions -= 1;
                }
                replicas -= 1;
            }
            if replicas != set.current {
                updates.push((set.stateful_set.clone(), replicas));
            }
        }
        updates
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
