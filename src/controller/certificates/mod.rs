//! Certificate authorities and the secrets holding them

mod ca;
mod secrets;
mod transport;
#[cfg(test)]
mod transport_test;
mod watches;

pub use ca::{Ca, RotationParams, DEFAULT_CA_VALIDITY, DEFAULT_ROTATE_BEFORE};
#[cfg(test)]
pub(crate) use secrets::fake;
pub use secrets::{
    delete_best_effort, get_secret_from_ref, secret_data, secret_value, KubeSecretStore,
    SecretStore,
};
pub use transport::{
    parse_custom_ca_secret, reconcile_self_signed_ca, TransportCaReconciler,
};
pub use watches::{reconcile_custom_cert_watch, DynamicWatches};
