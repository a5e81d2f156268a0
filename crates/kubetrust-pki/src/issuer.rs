//! Leaf certificate issuance
//!
//! The signing primitive: given a fully computed [`IssueRequest`] and an
//! authority holding its key, produce a fresh key pair and a certificate
//! signed by that authority. The request is plain data, so the same
//! request computed from the registry is what existing certificates are
//! checked against.

use rcgen::{
    string::Ia5String, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};

use crate::altnames::AltNames;
use crate::authority::{check_signature_from, parse_pem, CertificateAuthority, CertificateInfo};
use crate::certs::ExtendedUsage;
use crate::error::{PkiError, Result};

/// Validity period for leaf certificates (days from issuance)
pub const LEAF_VALIDITY_DAYS: i64 = 3650;

/// Everything needed to issue one leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    /// Subject common name
    pub common_name: String,
    /// Subject organizations
    pub organizations: Vec<String>,
    /// Extended key usages; must not be empty
    pub usages: Vec<ExtendedUsage>,
    /// DNS and IP SANs
    pub alt_names: AltNames,
}

impl IssueRequest {
    /// Request with a subject and usages but no SANs
    pub fn new(common_name: impl Into<String>, usages: Vec<ExtendedUsage>) -> Self {
        Self {
            common_name: common_name.into(),
            organizations: Vec::new(),
            usages,
            alt_names: AltNames::default(),
        }
    }

    /// Reject requests that can only come from a broken registry
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(PkiError::InvalidSubject("common name is empty".to_string()));
        }
        if self.usages.is_empty() {
            return Err(PkiError::InvalidSubject(format!(
                "certificate {} has no usages",
                self.common_name
            )));
        }
        Ok(())
    }

    /// Check an existing certificate against this request
    ///
    /// The common name must match exactly; every expected SAN must be
    /// present, extra SANs on disk are tolerated.
    pub fn matches(&self, info: &CertificateInfo) -> std::result::Result<(), String> {
        if info.common_name != self.common_name {
            return Err(format!(
                "common name is '{}', expected '{}'",
                info.common_name, self.common_name
            ));
        }
        let missing_dns: Vec<&str> = self
            .alt_names
            .dns_names
            .iter()
            .filter(|n| !info.alt_names.dns_names.contains(n))
            .map(String::as_str)
            .collect();
        if !missing_dns.is_empty() {
            return Err(format!("missing DNS names: {}", missing_dns.join(", ")));
        }
        let missing_ips: Vec<String> = self
            .alt_names
            .ips
            .iter()
            .filter(|ip| !info.alt_names.ips.contains(ip))
            .map(ToString::to_string)
            .collect();
        if !missing_ips.is_empty() {
            return Err(format!("missing IP addresses: {}", missing_ips.join(", ")));
        }
        Ok(())
    }
}

/// A freshly signed certificate and its private key
#[derive(Clone)]
pub struct IssuedCert {
    /// Certificate in PEM format
    pub cert_pem: String,
    /// Private key in PEM format
    pub key_pem: String,
}

impl std::fmt::Debug for IssuedCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCert")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

/// Random positive 63-bit serial number
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; 8];
    aws_lc_rs::rand::fill(&mut bytes).map_err(|_| {
        PkiError::CertificateGenerationFailed("random serial generation failed".to_string())
    })?;
    let serial = (u64::from_be_bytes(bytes) & (i64::MAX as u64)).max(1);
    Ok(SerialNumber::from(serial))
}

fn san_entries(alt_names: &AltNames) -> Result<Vec<SanType>> {
    let mut sans = Vec::with_capacity(alt_names.dns_names.len() + alt_names.ips.len());
    for dns in &alt_names.dns_names {
        let name = Ia5String::try_from(dns.clone()).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("invalid DNS name '{}': {}", dns, e))
        })?;
        sans.push(SanType::DnsName(name));
    }
    sans.extend(alt_names.ips.iter().copied().map(SanType::IpAddress));
    Ok(sans)
}

/// Sign a new leaf certificate with `ca`
///
/// The leaf inherits the authority's `notBefore`, expires
/// [`LEAF_VALIDITY_DAYS`] after issuance and always carries key
/// encipherment plus digital signature usages.
pub fn issue_leaf(ca: &CertificateAuthority, request: &IssueRequest) -> Result<IssuedCert> {
    request.validate()?;

    let ca_info = ca.cert_info()?;

    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(request.common_name.clone()),
    );
    for org in &request.organizations {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
    }
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.serial_number = Some(random_serial()?);
    params.key_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = request.usages.iter().map(|u| u.to_rcgen()).collect();

    params.not_before = ::time::OffsetDateTime::from_unix_timestamp(ca_info.not_before)
        .map_err(|e| PkiError::ParseError(format!("invalid CA notBefore: {}", e)))?;
    params.not_after =
        ::time::OffsetDateTime::now_utc() + ::time::Duration::days(LEAF_VALIDITY_DAYS);

    params.subject_alt_names = san_entries(&request.alt_names)?;

    let leaf_key = KeyPair::generate().map_err(|e| {
        PkiError::KeyGenerationFailed(format!("failed to generate leaf key: {}", e))
    })?;

    let ca_key = ca.load_key_pair()?;
    let issuer = Issuer::from_ca_cert_pem(ca.ca_cert_pem(), &ca_key)
        .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

    let cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!(
            "failed to sign {}: {}",
            request.common_name, e
        ))
    })?;

    Ok(IssuedCert {
        cert_pem: cert.pem(),
        key_pem: leaf_key.serialize_pem(),
    })
}

/// Validate an existing leaf against its authority and the expected request
///
/// Any mismatch is reported as [`PkiError::CertificateInvalid`] for
/// `base_name`.
pub fn verify_leaf(
    base_name: &str,
    cert_pem: &str,
    ca: &CertificateAuthority,
    expected: &IssueRequest,
) -> Result<CertificateInfo> {
    let der = parse_pem(cert_pem).map_err(|e| PkiError::invalid(base_name, e.to_string()))?;
    let info =
        CertificateInfo::from_der(&der).map_err(|e| PkiError::invalid(base_name, e.to_string()))?;

    check_signature_from(&der, ca.ca_cert_pem())?
        .map_err(|reason| PkiError::invalid(base_name, reason))?;

    if info.is_expired() {
        return Err(PkiError::invalid(base_name, "expired"));
    }

    expected
        .matches(&info)
        .map_err(|reason| PkiError::invalid(base_name, reason))?;

    Ok(info)
}
