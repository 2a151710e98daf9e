//! Fixtures shared by controller tests

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use kube::api::ObjectMeta;

use crate::crd::{Elasticsearch, ElasticsearchSpec, NodeSet, SecretRef};

pub fn es(name: &str) -> Elasticsearch {
    let mut es = Elasticsearch::new(
        name,
        ElasticsearchSpec {
            version: "8.15.0".to_string(),
            node_sets: vec![NodeSet {
                name: "default".to_string(),
                count: 3,
                config: None,
            }],
            update_strategy: Default::default(),
            transport: Default::default(),
        },
    );
    es.metadata.namespace = Some("ns".to_string());
    es.metadata.uid = Some(format!("{name}-uid"));
    es.metadata.generation = Some(1);
    es
}

pub fn es_with_custom_ca(name: &str, secret_name: &str) -> Elasticsearch {
    let mut es = es(name);
    es.spec.transport.tls.certificate = Some(SecretRef {
        secret_name: secret_name.to_string(),
    });
    es
}

pub fn with_annotation(mut es: Elasticsearch, key: &str, value: &str) -> Elasticsearch {
    es.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    es
}

/// Replaces the node sets of `es` with `(name, count)` pairs
pub fn with_node_sets(mut es: Elasticsearch, sets: &[(&str, i32)]) -> Elasticsearch {
    es.spec.node_sets = sets
        .iter()
        .map(|(name, count)| NodeSet {
            name: name.to_string(),
            count: *count,
            config: None,
        })
        .collect();
    es
}

pub fn stateful_set(name: &str, replicas: i32) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ready_pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ready_pods(names: &[&str]) -> Vec<Pod> {
    names.iter().map(|n| ready_pod(n)).collect()
}
