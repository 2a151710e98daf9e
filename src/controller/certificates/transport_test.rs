use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;

use super::ca::{Ca, RotationParams, DEFAULT_CA_VALIDITY};
use super::secrets::fake::{secret, InMemorySecretStore};
use super::secrets::secret_value;
use super::transport::{parse_custom_ca_secret, TransportCaReconciler, CERT_FILE, KEY_FILE};
use super::watches::DynamicWatches;
use crate::controller::events::fake::RecordingEventRecorder;
use crate::controller::events::{EventType, REASON_VALIDATION};
use crate::controller::test_utils::{es, es_with_custom_ca};
use crate::crd::{naming, Elasticsearch, CLUSTER_NAME_LABEL};
use crate::error::Error;

struct Fixture {
    secrets: InMemorySecretStore,
    watches: DynamicWatches,
    recorder: RecordingEventRecorder,
}

impl Fixture {
    fn new() -> Self {
        Self {
            secrets: InMemorySecretStore::default(),
            watches: DynamicWatches::new(),
            recorder: RecordingEventRecorder::default(),
        }
    }

    fn reconciler(&self) -> TransportCaReconciler<'_> {
        TransportCaReconciler {
            secrets: &self.secrets,
            watches: &self.watches,
            recorder: &self.recorder,
            rotation: RotationParams::default(),
        }
    }
}

fn in_namespace(namespace: &str, mut es: Elasticsearch) -> Elasticsearch {
    es.metadata.namespace = Some(namespace.to_string());
    es
}

fn custom_ca_secret(name: &str, ca: &Ca, cert_key: &str, key_key: &str) -> Secret {
    secret("ns", name, &[(cert_key, ca.cert_pem()), (key_key, ca.key_pem())])
}

#[tokio::test]
async fn test_self_signed_ca_is_created() {
    let f = Fixture::new();
    let es = es("quickstart");

    let ca = f.reconciler().reconcile_or_retrieve_ca(&es).await.unwrap();
    assert_eq!(ca.common_name(), "quickstart-transport");

    let stored = f
        .secrets
        .get_now("ns", &naming::transport_ca_internal_secret("quickstart"))
        .expect("CA secret");
    assert_eq!(
        secret_value(&stored, CERT_FILE),
        Some(ca.cert_pem().as_bytes())
    );
    assert_eq!(
        stored.metadata.labels.as_ref().unwrap().get(CLUSTER_NAME_LABEL).unwrap(),
        "quickstart"
    );
    let owners = stored.metadata.owner_references.unwrap();
    assert_eq!(owners[0].uid, "quickstart-uid");
    assert!(f.watches.is_empty());
}

#[tokio::test]
async fn test_self_signed_ca_is_reused() {
    let f = Fixture::new();
    let es = es("quickstart");

    let first = f.reconciler().reconcile_or_retrieve_ca(&es).await.unwrap();
    let second = f.reconciler().reconcile_or_retrieve_ca(&es).await.unwrap();
    assert_eq!(first.cert_pem(), second.cert_pem());
}

#[tokio::test]
async fn test_self_signed_ca_is_rotated_near_expiry() {
    let f = Fixture::new();
    let es = es("quickstart");
    let now = Utc::now();
    let expiring = Ca::generate(
        "quickstart-transport",
        now - chrono::Duration::days(364),
        now + chrono::Duration::hours(1),
    )
    .unwrap();
    f.secrets.insert(secret(
        "ns",
        &naming::transport_ca_internal_secret("quickstart"),
        &[(CERT_FILE, expiring.cert_pem()), (KEY_FILE, expiring.key_pem())],
    ));

    let ca = f.reconciler().reconcile_or_retrieve_ca(&es).await.unwrap();
    assert_ne!(ca.cert_pem(), expiring.cert_pem());
    assert!(!ca.should_rotate(&RotationParams::default(), now));
}

#[tokio::test]
async fn test_custom_ca_replaces_self_signed() {
    let f = Fixture::new();
    let custom = Ca::self_signed("my-org-ca", DEFAULT_CA_VALIDITY).unwrap();
    f.secrets
        .insert(custom_ca_secret("my-ca", &custom, CERT_FILE, KEY_FILE));

    // an earlier revision used the self-signed CA
    f.reconciler()
        .reconcile_or_retrieve_ca(&es("quickstart"))
        .await
        .unwrap();
    let internal = naming::transport_ca_internal_secret("quickstart");
    assert!(f.secrets.contains("ns", &internal));

    let es = es_with_custom_ca("quickstart", "my-ca");
    let ca = f.reconciler().reconcile_or_retrieve_ca(&es).await.unwrap();

    assert_eq!(ca.common_name(), "my-org-ca");
    assert!(!f.secrets.contains("ns", &internal));
    assert_eq!(
        f.watches.watchers_of(&secret("ns", "my-ca", &[])),
        vec![ObjectRef::from_obj(&es)]
    );
    assert!(f.recorder.events().is_empty());
}

#[tokio::test]
async fn test_custom_ca_with_ca_keys() {
    let f = Fixture::new();
    let custom = Ca::self_signed("my-org-ca", DEFAULT_CA_VALIDITY).unwrap();
    f.secrets
        .insert(custom_ca_secret("my-ca", &custom, "ca.crt", "ca.key"));

    let ca = f
        .reconciler()
        .reconcile_or_retrieve_ca(&es_with_custom_ca("quickstart", "my-ca"))
        .await
        .unwrap();
    assert_eq!(ca.common_name(), "my-org-ca");
}

#[tokio::test]
async fn test_failed_garbage_collection_is_not_fatal() {
    let f = Fixture {
        secrets: InMemorySecretStore {
            failing_deletes: vec![naming::transport_ca_internal_secret("quickstart")],
            ..Default::default()
        },
        ..Fixture::new()
    };
    let custom = Ca::self_signed("my-org-ca", DEFAULT_CA_VALIDITY).unwrap();
    f.secrets
        .insert(custom_ca_secret("my-ca", &custom, CERT_FILE, KEY_FILE));

    let ca = f
        .reconciler()
        .reconcile_or_retrieve_ca(&es_with_custom_ca("quickstart", "my-ca"))
        .await
        .unwrap();
    assert_eq!(ca.common_name(), "my-org-ca");
}

#[tokio::test]
async fn test_invalid_custom_ca_emits_event() {
    let f = Fixture::new();
    f.secrets
        .insert(secret("ns", "my-ca", &[(CERT_FILE, "garbage"), (KEY_FILE, "garbage")]));

    let err = f
        .reconciler()
        .reconcile_or_retrieve_ca(&es_with_custom_ca("quickstart", "my-ca"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CertificateError(_)));

    let events = f.recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].type_, EventType::Warning);
    assert_eq!(events[0].reason, REASON_VALIDATION);
    assert_eq!(events[0].object, "quickstart");
    assert!(events[0].message.contains("my-ca"));

    // the watch is still registered so that fixing the secret triggers a reconciliation
    assert_eq!(f.watches.len(), 1);
}

#[tokio::test]
async fn test_missing_custom_secret_is_an_error() {
    let f = Fixture::new();

    let err = f
        .reconciler()
        .reconcile_or_retrieve_ca(&es_with_custom_ca("quickstart", "missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CertificateError(_)));
    assert!(!f
        .secrets
        .contains("ns", &naming::transport_ca_internal_secret("quickstart")));
}

#[tokio::test]
async fn test_removing_custom_reference_removes_watch() {
    let f = Fixture::new();
    let custom = Ca::self_signed("my-org-ca", DEFAULT_CA_VALIDITY).unwrap();
    f.secrets
        .insert(custom_ca_secret("my-ca", &custom, CERT_FILE, KEY_FILE));

    f.reconciler()
        .reconcile_or_retrieve_ca(&es_with_custom_ca("quickstart", "my-ca"))
        .await
        .unwrap();
    assert_eq!(f.watches.len(), 1);

    f.reconciler()
        .reconcile_or_retrieve_ca(&es("quickstart"))
        .await
        .unwrap();
    assert!(f.watches.is_empty());
}

#[tokio::test]
async fn test_same_cluster_name_in_two_namespaces_keeps_both_watches() {
    let f = Fixture::new();
    let custom = Ca::self_signed("my-org-ca", DEFAULT_CA_VALIDITY).unwrap();
    for namespace in ["ns1", "ns2"] {
        f.secrets.insert(secret(
            namespace,
            "my-ca",
            &[(CERT_FILE, custom.cert_pem()), (KEY_FILE, custom.key_pem())],
        ));
        f.reconciler()
            .reconcile_or_retrieve_ca(&in_namespace(namespace, es_with_custom_ca("es", "my-ca")))
            .await
            .unwrap();
    }
    assert_eq!(f.watches.len(), 2);

    // ns2/es stops using the custom CA, ns1/es must still be notified
    f.reconciler()
        .reconcile_or_retrieve_ca(&in_namespace("ns2", es("es")))
        .await
        .unwrap();
    let watchers: Vec<_> = f
        .watches
        .watchers_of(&secret("ns1", "my-ca", &[]))
        .into_iter()
        .map(|w| w.namespace)
        .collect();
    assert_eq!(watchers, vec![Some("ns1".to_string())]);
    assert!(f.watches.watchers_of(&secret("ns2", "my-ca", &[])).is_empty());
}

#[test]
fn test_expired_custom_ca_is_rejected() {
    let now = Utc::now();
    let expired = Ca::generate(
        "old-ca",
        now - chrono::Duration::days(30),
        now - chrono::Duration::days(1),
    )
    .unwrap();

    let err = parse_custom_ca_secret(&custom_ca_secret("old", &expired, CERT_FILE, KEY_FILE))
        .unwrap_err();
    assert!(matches!(err, Error::CertificateError(msg) if msg.contains("only valid")));
}

#[test]
fn test_custom_ca_missing_key_is_rejected() {
    let ca = Ca::self_signed("my-org-ca", DEFAULT_CA_VALIDITY).unwrap();
    let err = parse_custom_ca_secret(&secret("ns", "half", &[(CERT_FILE, ca.cert_pem())]))
        .unwrap_err();
    assert!(matches!(err, Error::CertificateError(msg) if msg.contains("missing tls.key")));
}
