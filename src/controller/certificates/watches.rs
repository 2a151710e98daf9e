//! Watches on secrets that are only known at reconciliation time
//!
//! A cluster referencing a user-provided secret must be reconciled again when
//! that secret changes. The registry maps named watches to the cluster that
//! registered them and the secrets they cover; the controller consults it for
//! every secret event.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::{Elasticsearch, SecretRef};

#[derive(Clone, Debug, PartialEq)]
struct NamedWatch {
    watcher: ObjectRef<Elasticsearch>,
    watched: Vec<ObjectRef<Secret>>,
}

/// Registry of dynamic secret watches, shared between the reconciler and the
/// controller's secret mapper
#[derive(Clone, Default)]
pub struct DynamicWatches {
    watches: Arc<RwLock<HashMap<String, NamedWatch>>>,
}

impl DynamicWatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the watch named `key`
    pub fn add(
        &self,
        key: &str,
        watcher: ObjectRef<Elasticsearch>,
        watched: Vec<ObjectRef<Secret>>,
    ) {
        let mut watches = self.watches.write().unwrap_or_else(PoisonError::into_inner);
        watches.insert(key.to_string(), NamedWatch { watcher, watched });
    }

    pub fn remove(&self, key: &str) {
        let mut watches = self.watches.write().unwrap_or_else(PoisonError::into_inner);
        if watches.remove(key).is_some() {
            debug!("Removed dynamic watch {}", key);
        }
    }

    /// Drop every watch registered by `watcher`
    pub fn remove_all_for(&self, watcher: &ObjectRef<Elasticsearch>) {
        let mut watches = self.watches.write().unwrap_or_else(PoisonError::into_inner);
        watches.retain(|_, w| &w.watcher != watcher);
    }

    /// Clusters to reconcile when `secret` changes
    pub fn watchers_of(&self, secret: &Secret) -> Vec<ObjectRef<Elasticsearch>> {
        let Some(namespace) = secret.namespace() else {
            return Vec::new();
        };
        let secret_ref = ObjectRef::<Secret>::new(&secret.name_any()).within(&namespace);
        let watches = self.watches.read().unwrap_or_else(PoisonError::into_inner);
        let mut watchers: Vec<_> = watches
            .values()
            .filter(|w| w.watched.contains(&secret_ref))
            .map(|w| w.watcher.clone())
            .collect();
        watchers.dedup();
        watchers
    }

    pub fn contains(&self, key: &str) -> bool {
        self.watches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.watches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Watch the secret referenced by `secret_ref` on behalf of `watcher`, or
/// drop the watch named `key` if the reference is unset.
pub fn reconcile_custom_cert_watch(
    watches: &DynamicWatches,
    key: &str,
    watcher: ObjectRef<Elasticsearch>,
    secret_ref: Option<&SecretRef>,
) {
    match secret_ref.filter(|r| r.is_defined()) {
        Some(secret_ref) => {
            let namespace = watcher.namespace.clone().unwrap_or_default();
            let watched = ObjectRef::<Secret>::new(&secret_ref.secret_name).within(&namespace);
            watches.add(key, watcher, vec![watched]);
        }
        None => watches.remove(key),
    }
}
