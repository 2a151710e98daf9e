//! Transport layer certificate authority
//!
//! A cluster either brings its own CA through `spec.transport.tls.certificate`
//! or gets a self-signed one managed by the operator. Exactly one of them is
//! active at any time.

use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use tracing::{info, instrument, warn};

use super::ca::{Ca, RotationParams};
use super::secrets::{
    delete_best_effort, get_secret_from_ref, secret_data, secret_value, SecretStore,
};
use super::watches::{reconcile_custom_cert_watch, DynamicWatches};
use crate::controller::events::{EventRecorder, EventType, REASON_VALIDATION};
use crate::controller::resources::{owner_reference, standard_labels};
use crate::crd::{naming, Elasticsearch};
use crate::error::{Error, Result};

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";
pub const CA_CERT_FILE: &str = "ca.crt";
pub const CA_KEY_FILE: &str = "ca.key";

/// Collaborators of the transport CA reconciliation
pub struct TransportCaReconciler<'a> {
    pub secrets: &'a dyn SecretStore,
    pub watches: &'a DynamicWatches,
    pub recorder: &'a dyn EventRecorder,
    pub rotation: RotationParams,
}

impl TransportCaReconciler<'_> {
    /// The CA securing the transport layer of `es`.
    ///
    /// Uses the custom CA referenced by the spec if any, otherwise creates or
    /// rotates the self-signed one. An invalid custom CA is reported through
    /// an event and returned as an error so that the caller can defer any
    /// change depending on it.
    #[instrument(skip(self, es), fields(name = %es.name_any(), namespace = es.namespace()))]
    pub async fn reconcile_or_retrieve_ca(&self, es: &Elasticsearch) -> Result<Ca> {
        let name = es.name_any();
        let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
        let custom_ref = es.spec.transport.tls.custom_certificate();

        // Also drops the watch once the reference is removed from the spec.
        reconcile_custom_cert_watch(
            self.watches,
            &naming::custom_transport_certs_watch_key(&namespace, &name),
            ObjectRef::from_obj(es),
            custom_ref,
        );

        let Some(custom_secret) = get_secret_from_ref(self.secrets, &namespace, custom_ref).await?
        else {
            return reconcile_self_signed_ca(self.secrets, es, &self.rotation).await;
        };

        // A self-signed CA may be left over from an earlier revision.
        delete_best_effort(
            self.secrets,
            &namespace,
            &naming::transport_ca_internal_secret(&name),
        )
        .await;

        match parse_custom_ca_secret(&custom_secret) {
            Ok(ca) => Ok(ca),
            Err(e) => {
                let object = es.object_ref(&());
                if let Err(publish_err) = self
                    .recorder
                    .publish(&object, EventType::Warning, REASON_VALIDATION, &e.to_string())
                    .await
                {
                    warn!("Failed to publish validation event: {}", publish_err);
                }
                Err(e)
            }
        }
    }
}

/// Create the self-signed transport CA of `es`, or reuse the stored one while
/// it is valid and outside the rotation margin.
pub async fn reconcile_self_signed_ca(
    secrets: &dyn SecretStore,
    es: &Elasticsearch,
    rotation: &RotationParams,
) -> Result<Ca> {
    let name = es.name_any();
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let secret_name = naming::transport_ca_internal_secret(&name);

    if let Some(existing) = secrets.get(&namespace, &secret_name).await? {
        match ca_from_secret(&existing, CERT_FILE, KEY_FILE) {
            Ok(ca) if !ca.should_rotate(rotation, Utc::now()) => return Ok(ca),
            Ok(ca) => info!(
                "Rotating transport CA {}/{} expiring at {}",
                namespace,
                secret_name,
                ca.not_after()
            ),
            Err(e) => info!(
                "Replacing unusable transport CA {}/{}: {}",
                namespace, secret_name, e
            ),
        }
    }

    let ca = Ca::self_signed(&format!("{name}-transport"), rotation.validity)?;
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(standard_labels(es)),
            owner_references: Some(vec![owner_reference(es)]),
            ..Default::default()
        },
        data: Some(secret_data([
            (CERT_FILE, ca.cert_pem()),
            (KEY_FILE, ca.key_pem()),
        ])),
        ..Default::default()
    };
    secrets.apply(&secret).await?;
    info!(
        "Issued transport CA {}/{} valid until {}",
        namespace,
        secret_name,
        ca.not_after()
    );
    Ok(ca)
}

/// Parse a user-provided CA secret.
///
/// Accepts `tls.crt`/`tls.key` or `ca.crt`/`ca.key`. The certificate must be
/// a CA, match the private key and be currently valid.
pub fn parse_custom_ca_secret(secret: &Secret) -> Result<Ca> {
    let secret_name = secret.name_any();
    let ca = if secret_value(secret, CERT_FILE).is_some() {
        ca_from_secret(secret, CERT_FILE, KEY_FILE)
    } else {
        ca_from_secret(secret, CA_CERT_FILE, CA_KEY_FILE)
    }
    .map_err(|e| match e {
        Error::CertificateError(msg) => {
            Error::CertificateError(format!("custom CA secret {secret_name}: {msg}"))
        }
        other => other,
    })?;

    let now = Utc::now();
    if !ca.is_valid_at(now) {
        return Err(Error::CertificateError(format!(
            "custom CA secret {secret_name}: certificate is only valid from {} to {}",
            ca.not_before(),
            ca.not_after()
        )));
    }
    Ok(ca)
}

fn ca_from_secret(secret: &Secret, cert_key: &str, key_key: &str) -> Result<Ca> {
    let read = |key: &str| -> Result<String> {
        let value = secret_value(secret, key)
            .ok_or_else(|| Error::CertificateError(format!("missing {key}")))?;
        String::from_utf8(value.to_vec())
            .map_err(|_| Error::CertificateError(format!("{key} is not valid PEM")))
    };
    Ca::from_pem(&read(cert_key)?, &read(key_key)?)
}
