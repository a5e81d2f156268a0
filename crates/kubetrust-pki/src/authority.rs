//! Certificate authorities and certificate inspection
//!
//! A [`CertificateAuthority`] keeps its material as PEM so it can be cloned
//! freely and persisted as-is. The private key is optional: an authority
//! loaded without its key can still validate existing leaves but never
//! signs new ones.

use std::net::IpAddr;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose, PublicKeyData,
};
use x509_parser::prelude::*;

use crate::altnames::AltNames;
use crate::error::{PkiError, Result};

/// Validity period for authority certificates (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Compute certificate validity period from now
fn compute_validity(years: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(years * 365);
    (now, not_after)
}

pub(crate) fn unix_now() -> i64 {
    ::time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Identity and validity of a parsed certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// Subject organizations
    pub organizations: Vec<String>,
    /// Whether basic constraints mark this as a CA
    pub is_ca: bool,
    /// DNS and IP SANs
    pub alt_names: AltNames,
    /// DER-encoded SubjectPublicKeyInfo
    pub public_key_der: Vec<u8>,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let organizations = cert
            .subject()
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(str::to_string)
            .collect();

        let mut alt_names = AltNames::default();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| PkiError::ParseError(format!("failed to parse SAN extension: {}", e)))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => alt_names.push_dns(*dns),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            alt_names.push_ip(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            organizations,
            is_ca: cert.is_ca(),
            alt_names,
            public_key_der: cert.public_key().raw.to_vec(),
        })
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }

    /// Seconds remaining until certificate expires
    pub fn remaining_secs(&self) -> i64 {
        self.not_after - unix_now()
    }

    /// Check if certificate has expired
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Check that `cert_der` carries a valid signature from `ca_cert_pem`
///
/// Returns the reason on failure so callers can wrap it with the
/// certificate's own name.
pub fn check_signature_from(
    cert_der: &[u8],
    ca_cert_pem: &str,
) -> Result<std::result::Result<(), String>> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    let ca_cert_der = parse_pem(ca_cert_pem)?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    if cert.issuer().as_raw() != ca_cert.subject().as_raw() {
        return Ok(Err(format!(
            "issued by '{}', expected '{}'",
            cert.issuer(),
            ca_cert.subject()
        )));
    }

    Ok(cert
        .verify_signature(Some(ca_cert.public_key()))
        .map_err(|_| "signature verification failed".to_string()))
}

/// A signing authority, with or without its private key
#[derive(Clone)]
pub struct CertificateAuthority {
    /// PEM-encoded CA certificate
    ca_cert_pem: String,
    /// CA key pair serialized as PEM (KeyPair isn't Clone); `None` when keyless
    ca_key_pem: Option<String>,
}

impl CertificateAuthority {
    /// Create a new self-signed authority
    pub fn new(common_name: &str) -> Result<Self> {
        if common_name.trim().is_empty() {
            return Err(PkiError::InvalidSubject(
                "authority common name is empty".to_string(),
            ));
        }

        let mut params = CertificateParams::default();

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

        let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let ca_key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_cert_pem: cert.pem(),
            ca_key_pem: Some(ca_key_pem),
        })
    }

    /// Load an authority from its certificate and private key
    ///
    /// The key must parse and must belong to the certificate.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        let info = CertificateInfo::from_pem(cert_pem)?;

        if key.subject_public_key_info() != info.public_key_der {
            return Err(PkiError::ParseError(
                "CA private key does not match CA certificate".to_string(),
            ));
        }

        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: Some(key_pem.to_string()),
        })
    }

    /// Load an authority from its certificate alone
    pub fn from_cert_pem(cert_pem: &str) -> Result<Self> {
        let _ = CertificateInfo::from_pem(cert_pem)?;
        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: None,
        })
    }

    /// Get the CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Get the CA private key in PEM format, if present
    pub fn ca_key_pem(&self) -> Option<&str> {
        self.ca_key_pem.as_deref()
    }

    /// Whether this authority can sign
    pub fn has_key(&self) -> bool {
        self.ca_key_pem.is_some()
    }

    /// Public key in PEM format, derived from the private key when present
    pub fn public_key_pem(&self) -> Result<Option<String>> {
        match self.ca_key_pem {
            Some(_) => Ok(Some(self.load_key_pair()?.public_key_pem())),
            None => Ok(None),
        }
    }

    /// Get certificate info (validity period, subject, SANs)
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.ca_cert_pem)
    }

    /// Load the key pair from stored PEM
    pub(crate) fn load_key_pair(&self) -> Result<KeyPair> {
        let pem = self.ca_key_pem.as_deref().ok_or_else(|| {
            PkiError::ParseError("CA private key is not available".to_string())
        })?;
        KeyPair::from_pem(pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("CertificateAuthority")
            .field("has_key", &self.has_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_can_be_created() {
        let ca = CertificateAuthority::new("Test CA").expect("CA creation should succeed");
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.ca_key_pem().unwrap().contains("PRIVATE KEY"));
        assert!(ca.has_key());

        let info = ca.cert_info().expect("CA info should parse");
        assert!(info.is_ca);
        assert_eq!(info.common_name, "Test CA");
        assert!(!info.is_expired());
    }

    #[test]
    fn empty_common_name_is_rejected() {
        assert!(matches!(
            CertificateAuthority::new(" "),
            Err(PkiError::InvalidSubject(_))
        ));
    }

    #[test]
    fn ca_certificate_validity_period() {
        let ca = CertificateAuthority::new("Test CA").expect("CA creation should succeed");
        let info = ca.cert_info().expect("CA info should parse");

        let validity_days = info.lifetime_secs() / (24 * 60 * 60);
        let expected_days = CA_VALIDITY_YEARS * 365;
        assert!(
            (validity_days - expected_days).abs() <= 1,
            "CA cert should have {} year validity, got {} days",
            CA_VALIDITY_YEARS,
            validity_days
        );
    }

    #[test]
    fn ca_can_be_saved_and_loaded() {
        let ca1 = CertificateAuthority::new("Persistent CA").expect("CA creation should succeed");
        let cert_pem = ca1.ca_cert_pem().to_string();
        let key_pem = ca1.ca_key_pem().unwrap().to_string();

        let ca2 =
            CertificateAuthority::from_pem(&cert_pem, &key_pem).expect("CA loading should succeed");
        assert_eq!(ca2.ca_cert_pem(), cert_pem);
        assert_eq!(
            ca1.public_key_pem().unwrap(),
            ca2.public_key_pem().unwrap()
        );
    }

    #[test]
    fn key_spki_matches_certificate_public_key() {
        let ca = CertificateAuthority::new("SPKI CA").expect("CA creation should succeed");
        let key = KeyPair::from_pem(ca.ca_key_pem().unwrap()).unwrap();
        let info = CertificateInfo::from_pem(ca.ca_cert_pem()).unwrap();

        assert_eq!(key.subject_public_key_info(), info.public_key_der);
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let ca1 = CertificateAuthority::new("CA One").expect("CA creation should succeed");
        let ca2 = CertificateAuthority::new("CA Two").expect("CA creation should succeed");

        let result =
            CertificateAuthority::from_pem(ca1.ca_cert_pem(), ca2.ca_key_pem().unwrap());
        assert!(
            matches!(result, Err(PkiError::ParseError(msg)) if msg.contains("does not match"))
        );
    }

    #[test]
    fn corrupted_material_is_detected() {
        let good_ca = CertificateAuthority::new("Good CA").expect("CA creation should succeed");

        let result = CertificateAuthority::from_pem(good_ca.ca_cert_pem(), "invalid key pem");
        assert!(result.is_err());

        let result =
            CertificateAuthority::from_pem("invalid cert pem", good_ca.ca_key_pem().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn keyless_authority_cannot_expose_key() {
        let ca = CertificateAuthority::new("External CA").expect("CA creation should succeed");
        let keyless =
            CertificateAuthority::from_cert_pem(ca.ca_cert_pem()).expect("cert should load");

        assert!(!keyless.has_key());
        assert!(keyless.ca_key_pem().is_none());
        assert!(keyless.public_key_pem().unwrap().is_none());
        assert!(keyless.load_key_pair().is_err());
        assert!(!format!("{:?}", ca).contains("PRIVATE"));
    }

    #[test]
    fn self_signed_ca_checks_against_itself() {
        let ca = CertificateAuthority::new("Root").expect("CA creation should succeed");
        let other = CertificateAuthority::new("Other").expect("CA creation should succeed");
        let der = parse_pem(ca.ca_cert_pem()).unwrap();

        assert!(check_signature_from(&der, ca.ca_cert_pem()).unwrap().is_ok());
        assert!(check_signature_from(&der, other.ca_cert_pem()).unwrap().is_err());
    }

    #[test]
    fn pem_parsing_errors() {
        let result = parse_pem("this is not valid PEM data at all");
        match result {
            Err(PkiError::ParseError(msg)) => assert!(msg.contains("parse PEM")),
            _ => panic!("Expected ParseError"),
        }
    }
}
