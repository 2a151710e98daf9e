//! Enterprise license gate and license propagation to Elasticsearch

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::controller::certificates::{secret_value, SecretStore};
use crate::crd::{naming, Elasticsearch};
use crate::error::{Error, Result};
use crate::es_client::{EsClient, License, LicenseUpdateRequest};

/// Annotation through which a resource requests enterprise features
pub const LICENSE_ANNOTATION: &str = "eck.k8s.elastic.co/license";
pub const ENTERPRISE_LEVEL: &str = "enterprise";

/// Label selecting the operator-wide license secrets
pub const LICENSE_SCOPE_SELECTOR: &str = "license.k8s.elastic.co/scope=operator";
/// Key of the license JSON in an operator license secret
pub const LICENSE_SECRET_KEY: &str = "license";

const ENTERPRISE_LICENSE_TYPES: [&str; 2] = ["enterprise", "enterprise_trial"];

/// Tells whether the operator runs with an enterprise license
#[async_trait]
pub trait LicenseChecker: Send + Sync {
    async fn enterprise_features_enabled(&self) -> Result<bool>;
}

/// True unless the annotations request the enterprise level and no
/// enterprise license is installed
pub async fn has_requested_license_level(
    annotations: &BTreeMap<String, String>,
    checker: &dyn LicenseChecker,
) -> Result<bool> {
    match annotations.get(LICENSE_ANNOTATION) {
        Some(level) if level == ENTERPRISE_LEVEL => checker.enterprise_features_enabled().await,
        _ => Ok(true),
    }
}

/// [`LicenseChecker`] looking for a valid enterprise license secret in the
/// operator namespace
pub struct KubeLicenseChecker {
    secrets: Arc<dyn SecretStore>,
    operator_namespace: String,
}

impl KubeLicenseChecker {
    pub fn new(secrets: Arc<dyn SecretStore>, operator_namespace: impl Into<String>) -> Self {
        Self {
            secrets,
            operator_namespace: operator_namespace.into(),
        }
    }
}

#[async_trait]
impl LicenseChecker for KubeLicenseChecker {
    async fn enterprise_features_enabled(&self) -> Result<bool> {
        let secrets = self
            .secrets
            .list(&self.operator_namespace, LICENSE_SCOPE_SELECTOR)
            .await?;
        let now_millis = Utc::now().timestamp_millis();
        for secret in &secrets {
            let Some(raw) = secret_value(secret, LICENSE_SECRET_KEY) else {
                continue;
            };
            match serde_json::from_slice::<License>(raw) {
                Ok(license) if is_enterprise_license_valid(&license, now_millis) => {
                    return Ok(true)
                }
                Ok(_) => debug!(
                    "License in secret {} is not a valid enterprise license",
                    secret.name_any()
                ),
                Err(e) => debug!(
                    "Ignoring malformed license secret {}: {}",
                    secret.name_any(),
                    e
                ),
            }
        }
        Ok(false)
    }
}

fn is_enterprise_license_valid(license: &License, now_millis: i64) -> bool {
    let start = license
        .start_date_in_millis
        .unwrap_or(license.issue_date_in_millis);
    ENTERPRISE_LICENSE_TYPES.contains(&license.type_.as_str())
        && start <= now_millis
        && now_millis < license.expiry_date_in_millis
}

/// Push the license linked to `es` (secret `<name>-license`) to the cluster.
///
/// Clusters on basic or trial have no linked license, which is fine.
#[instrument(skip(secrets, es, client), fields(name = %es.name_any(), namespace = es.namespace()))]
pub async fn apply_linked_license(
    secrets: &dyn SecretStore,
    es: &Elasticsearch,
    client: &dyn EsClient,
) -> Result<()> {
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let secret_name = naming::license_secret(&es.name_any());
    let Some(secret) = secrets.get(&namespace, &secret_name).await? else {
        return Ok(());
    };

    let data = secret.data.unwrap_or_default();
    if data.is_empty() {
        return Err(Error::ValidationError(
            "empty license linked to this cluster".to_string(),
        ));
    }

    let mut last_error = None;
    for value in data.values() {
        match serde_json::from_slice::<License>(&value.0) {
            Ok(desired) => {
                let current = client.get_license().await?;
                return update_license(client, current.as_ref(), desired).await;
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(Error::ValidationError(format!(
        "no valid license found in license secret {secret_name}: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Install `desired` unless the cluster already runs it
pub async fn update_license(
    client: &dyn EsClient,
    current: Option<&License>,
    desired: License,
) -> Result<()> {
    if current.is_some_and(|c| c.uid == desired.uid) {
        return Ok(());
    }
    let uid = desired.uid.clone();
    let request = LicenseUpdateRequest {
        licenses: vec![desired],
    };
    let response = client.update_license(&request).await?;
    if !response.is_success() {
        return Err(Error::ValidationError(format!(
            "failed to apply license: {}",
            response.license_status
        )));
    }
    info!("Applied license {}", uid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::certificates::fake::{secret, InMemorySecretStore};
    use crate::controller::test_utils::{es, with_annotation};
    use crate::es_client::fake::FakeEsClient;
    use k8s_openapi::api::core::v1::Secret;

    struct StaticChecker(bool);

    #[async_trait]
    impl LicenseChecker for StaticChecker {
        async fn enterprise_features_enabled(&self) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn license(uid: &str, type_: &str) -> License {
        let now = Utc::now().timestamp_millis();
        License {
            uid: uid.to_string(),
            type_: type_.to_string(),
            issue_date_in_millis: now - 86_400_000,
            expiry_date_in_millis: now + 86_400_000,
            ..Default::default()
        }
    }

    fn license_json(license: &License) -> String {
        serde_json::to_string(license).unwrap()
    }

    #[tokio::test]
    async fn test_has_requested_license_level() {
        let none = BTreeMap::new();
        assert!(has_requested_license_level(&none, &StaticChecker(false))
            .await
            .unwrap());

        let enterprise = with_annotation(es("es"), LICENSE_ANNOTATION, ENTERPRISE_LEVEL);
        assert!(
            !has_requested_license_level(enterprise.annotations(), &StaticChecker(false))
                .await
                .unwrap()
        );
        assert!(
            has_requested_license_level(enterprise.annotations(), &StaticChecker(true))
                .await
                .unwrap()
        );

        let other = with_annotation(es("es"), LICENSE_ANNOTATION, "basic");
        assert!(
            has_requested_license_level(other.annotations(), &StaticChecker(false))
                .await
                .unwrap()
        );
    }

    fn operator_license_secret(name: &str, license: &License) -> Secret {
        let json = license_json(license);
        let mut s = secret("elastic-system", name, &[(LICENSE_SECRET_KEY, json.as_str())]);
        s.metadata.labels = Some(BTreeMap::from([(
            "license.k8s.elastic.co/scope".to_string(),
            "operator".to_string(),
        )]));
        s
    }

    #[tokio::test]
    async fn test_kube_license_checker() {
        let store = Arc::new(InMemorySecretStore::default());
        let checker = KubeLicenseChecker::new(store.clone(), "elastic-system");
        assert!(!checker.enterprise_features_enabled().await.unwrap());

        store.insert(operator_license_secret("basic", &license("1", "basic")));
        assert!(!checker.enterprise_features_enabled().await.unwrap());

        let mut expired = license("2", "enterprise");
        expired.expiry_date_in_millis = Utc::now().timestamp_millis() - 1;
        store.insert(operator_license_secret("expired", &expired));
        assert!(!checker.enterprise_features_enabled().await.unwrap());

        store.insert(operator_license_secret("trial", &license("3", "enterprise_trial")));
        assert!(checker.enterprise_features_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_unlabelled_license_secret_is_ignored() {
        let store = Arc::new(InMemorySecretStore::default());
        store.insert(secret(
            "elastic-system",
            "stray",
            &[(LICENSE_SECRET_KEY, license_json(&license("1", "enterprise")).as_str())],
        ));
        let checker = KubeLicenseChecker::new(store, "elastic-system");
        assert!(!checker.enterprise_features_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_without_linked_license() {
        let store = InMemorySecretStore::default();
        let client = FakeEsClient::default();

        apply_linked_license(&store, &es("es"), &client).await.unwrap();
        assert!(client.license_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_empty_linked_license() {
        let store = InMemorySecretStore::default();
        store.insert(secret("ns", "es-license", &[]));

        let err = apply_linked_license(&store, &es("es"), &FakeEsClient::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(msg) if msg.contains("empty")));
    }

    #[tokio::test]
    async fn test_apply_malformed_linked_license() {
        let store = InMemorySecretStore::default();
        store.insert(secret("ns", "es-license", &[("license", "{not json")]));

        let err = apply_linked_license(&store, &es("es"), &FakeEsClient::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(msg) if msg.contains("no valid license")));
    }

    #[tokio::test]
    async fn test_apply_linked_license() {
        let store = InMemorySecretStore::default();
        store.insert(secret(
            "ns",
            "es-license",
            &[("license", license_json(&license("new", "platinum")).as_str())],
        ));
        let client = FakeEsClient {
            license: Some(license("old", "basic")),
            ..Default::default()
        };

        apply_linked_license(&store, &es("es"), &client).await.unwrap();

        let updates = client.license_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].licenses[0].uid, "new");
    }

    #[tokio::test]
    async fn test_same_license_is_not_reapplied() {
        let client = FakeEsClient::default();
        let current = license("same", "platinum");

        update_license(&client, Some(&current), current.clone())
            .await
            .unwrap();
        assert!(client.license_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_license_is_an_error() {
        let client = FakeEsClient {
            license_status: "invalid".to_string(),
            ..Default::default()
        };

        let err = update_license(&client, None, license("new", "platinum"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(msg) if msg.contains("invalid")));
    }
}
