//! Access to Kubernetes secrets holding certificates and licenses

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

use crate::controller::resources::FIELD_MANAGER;
use crate::crd::SecretRef;
use crate::error::{Error, Result};

/// Minimal secret API used by the reconcilers
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `None` if the secret does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Secrets of `namespace` matching `label_selector`
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>>;

    /// Create or update `secret`, which must carry a name and a namespace
    async fn apply(&self, secret: &Secret) -> Result<Secret>;

    /// Succeeds if the secret does not exist
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`SecretStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(Error::KubeError)
    }

    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let secrets = self
            .api(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::KubeError)?;
        Ok(secrets.items)
    }

    async fn apply(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::ConfigError("secret has no namespace".to_string()))?;
        self.api(&namespace)
            .patch(
                &secret.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(secret),
            )
            .await
            .map_err(Error::KubeError)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// The secret referenced by `secret_ref`, `None` when the reference is unset.
/// A reference to a missing secret is an error.
pub async fn get_secret_from_ref(
    store: &dyn SecretStore,
    namespace: &str,
    secret_ref: Option<&SecretRef>,
) -> Result<Option<Secret>> {
    let Some(secret_ref) = secret_ref.filter(|r| r.is_defined()) else {
        return Ok(None);
    };
    match store.get(namespace, &secret_ref.secret_name).await? {
        Some(secret) => Ok(Some(secret)),
        None => Err(Error::CertificateError(format!(
            "secret {}/{} referenced by the cluster does not exist",
            namespace, secret_ref.secret_name
        ))),
    }
}

/// Delete a secret, logging and ignoring any failure
pub async fn delete_best_effort(store: &dyn SecretStore, namespace: &str, name: &str) {
    match store.delete(namespace, name).await {
        Ok(()) => debug!("Deleted secret {}/{} if it existed", namespace, name),
        Err(e) => warn!(
            "Ignoring failure to delete secret {}/{}: {}",
            namespace, name, e
        ),
    }
}

/// Decoded value of `key` in the secret data
pub fn secret_value<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.as_slice())
}

/// Build secret data from string values
pub fn secret_data<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, ByteString> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect()
}
