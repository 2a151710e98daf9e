//! Kubernetes resources owned or observed by the operator
//!
//! Pods and StatefulSets are created elsewhere, the reconciler only lists them
//! and adjusts StatefulSet replicas.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{info, instrument};

use crate::crd::{Elasticsearch, CLUSTER_NAME_LABEL};
use crate::error::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "elastic-operator";

/// Get the standard labels for resources created for a cluster
pub fn standard_labels(es: &Elasticsearch) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), es.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(es: &Elasticsearch) -> OwnerReference {
    OwnerReference {
        api_version: Elasticsearch::api_version(&()).to_string(),
        kind: Elasticsearch::kind(&()).to_string(),
        name: es.name_any(),
        uid: es.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn cluster_selector(es: &Elasticsearch) -> ListParams {
    ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, es.name_any()))
}

/// Pods of the cluster, selected by the cluster name label
pub async fn list_pods(client: &Client, es: &Elasticsearch) -> Result<Vec<Pod>> {
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let pods = api
        .list(&cluster_selector(es))
        .await
        .map_err(Error::KubeError)?;
    Ok(pods.items)
}

/// StatefulSets of the cluster, selected by the cluster name label
pub async fn list_stateful_sets(client: &Client, es: &Elasticsearch) -> Result<Vec<StatefulSet>> {
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let sets = api
        .list(&cluster_selector(es))
        .await
        .map_err(Error::KubeError)?;
    Ok(sets.items)
}

/// Set the replica count of a StatefulSet
#[instrument(skip(client))]
pub async fn scale_stateful_set(
    client: &Client,
    namespace: &str,
    name: &str,
    replicas: i32,
) -> Result<()> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let patch = json!({ "spec": { "replicas": replicas } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(Error::KubeError)?;
    info!("Scaled StatefulSet {}/{} to {} replicas", namespace, name, replicas);
    Ok(())
}

/// Whether the Pod reports the `Ready` condition
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}
