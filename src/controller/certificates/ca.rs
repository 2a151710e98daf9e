//! Certificate authority material

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose,
};
use x509_parser::pem::parse_x509_pem;

use crate::error::{Error, Result};

pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);
pub const DEFAULT_ROTATE_BEFORE: Duration = Duration::from_secs(24 * 60 * 60);

/// When a generated certificate must be replaced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationParams {
    /// Lifetime of newly generated certificates
    pub validity: Duration,
    /// Safety margin before expiry at which a certificate is replaced
    pub rotate_before: Duration,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            validity: DEFAULT_CA_VALIDITY,
            rotate_before: DEFAULT_ROTATE_BEFORE,
        }
    }
}

/// A CA certificate with its private key, both PEM encoded
#[derive(Clone)]
pub struct Ca {
    cert_pem: String,
    key_pem: String,
    common_name: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl fmt::Debug for Ca {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ca")
            .field("common_name", &self.common_name)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl Ca {
    /// Generate a self-signed CA valid from now for `validity`
    pub fn self_signed(common_name: &str, validity: Duration) -> Result<Self> {
        let now = Utc::now();
        let validity = chrono::Duration::from_std(validity)
            .map_err(|e| Error::CertificateError(format!("invalid CA validity: {e}")))?;
        Self::generate(common_name, now, now + validity)
    }

    /// Generate a self-signed CA for an explicit validity window
    pub fn generate(
        common_name: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| Error::CertificateError(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = to_offset_date_time(not_before)?;
        params.not_after = to_offset_date_time(not_after)?;

        let key = KeyPair::generate()
            .map_err(|e| Error::CertificateError(format!("failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| Error::CertificateError(format!("failed to create CA cert: {e}")))?;

        Self::from_pem(&cert.pem(), &key.serialize_pem())
    }

    /// Load a CA from PEM encoded certificate and private key.
    ///
    /// The certificate must be a CA and the key must belong to it. The
    /// validity window is not checked, see [`Ca::is_valid_at`].
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| Error::CertificateError(format!("failed to parse PEM certificate: {e}")))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| Error::CertificateError(format!("failed to parse certificate: {e}")))?;

        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false);
        if !is_ca {
            return Err(Error::CertificateError(
                "certificate is not a CA (basic constraints)".to_string(),
            ));
        }

        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| Error::CertificateError(format!("failed to parse private key: {e}")))?;
        if *cert.public_key().subject_public_key.data != *key.public_key_raw() {
            return Err(Error::CertificateError(
                "private key does not match the certificate".to_string(),
            ));
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            common_name,
            not_before: from_timestamp(cert.validity().not_before.timestamp())?,
            not_after: from_timestamp(cert.validity().not_after.timestamp())?,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_after
    }

    /// True once `now` is within `rotate_before` of the expiry, or before the
    /// start of the validity window.
    pub fn should_rotate(&self, params: &RotationParams, now: DateTime<Utc>) -> bool {
        if now < self.not_before {
            return true;
        }
        match chrono::Duration::from_std(params.rotate_before) {
            Ok(margin) => now + margin >= self.not_after,
            // a margin too large to represent covers any certificate
            Err(_) => true,
        }
    }
}

fn to_offset_date_time(at: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| Error::CertificateError(format!("invalid certificate date: {e}")))
}

fn from_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::CertificateError(format!("invalid certificate date: {secs}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_ca() {
        let ca = Ca::self_signed("quickstart-transport", DEFAULT_CA_VALIDITY).unwrap();
        assert_eq!(ca.common_name(), "quickstart-transport");
        assert!(ca.cert_pem().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.key_pem().contains("PRIVATE KEY"));
        assert!(ca.is_valid_at(Utc::now()));
        assert!(!ca.should_rotate(&RotationParams::default(), Utc::now()));
    }

    #[test]
    fn test_from_pem_round_trips_generated_ca() {
        let ca = Ca::self_signed("es-transport", DEFAULT_CA_VALIDITY).unwrap();
        let loaded = Ca::from_pem(ca.cert_pem(), ca.key_pem()).unwrap();
        assert_eq!(loaded.common_name(), "es-transport");
        assert_eq!(loaded.not_after(), ca.not_after());
    }

    #[test]
    fn test_rotation_margin() {
        let now = Utc::now();
        let ca = Ca::generate("es", now - chrono::Duration::days(1), now + chrono::Duration::hours(12))
            .unwrap();

        // expires in 12h, within the default 24h margin
        assert!(ca.should_rotate(&RotationParams::default(), now));

        let lenient = RotationParams {
            validity: DEFAULT_CA_VALIDITY,
            rotate_before: Duration::from_secs(60 * 60),
        };
        assert!(!ca.should_rotate(&lenient, now));
    }

    #[test]
    fn test_not_yet_valid_ca_is_rotated() {
        let now = Utc::now();
        let ca = Ca::generate(
            "es",
            now + chrono::Duration::days(1),
            now + chrono::Duration::days(30),
        )
        .unwrap();
        assert!(!ca.is_valid_at(now));
        assert!(ca.should_rotate(&RotationParams::default(), now));
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let ca = Ca::self_signed("es", DEFAULT_CA_VALIDITY).unwrap();
        let other = Ca::self_signed("other", DEFAULT_CA_VALIDITY).unwrap();

        let err = Ca::from_pem(ca.cert_pem(), other.key_pem()).unwrap_err();
        assert!(matches!(err, Error::CertificateError(msg) if msg.contains("does not match")));
    }

    #[test]
    fn test_leaf_certificate_is_rejected() {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["es.local".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();

        let err = Ca::from_pem(&cert.pem(), &key.serialize_pem()).unwrap_err();
        assert!(matches!(err, Error::CertificateError(msg) if msg.contains("not a CA")));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            Ca::from_pem("not a certificate", "not a key"),
            Err(Error::CertificateError(_))
        ));
    }
}
