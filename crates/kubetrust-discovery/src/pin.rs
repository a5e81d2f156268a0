//! Public key pinning
//!
//! A pin is `sha256:` followed by the hex SHA-256 of a certificate's
//! SubjectPublicKeyInfo. Pins are distributed out of band, typically printed
//! when the control plane is created.

use std::collections::BTreeSet;

use aws_lc_rs::digest::{digest, SHA256};
use x509_parser::prelude::*;

use crate::error::{DiscoveryError, Result};

/// Prefix of every supported pin
pub const PIN_PREFIX: &str = "sha256:";

/// Pin for a DER-encoded SubjectPublicKeyInfo
pub fn pin_for_spki(spki_der: &[u8]) -> String {
    let hash = digest(&SHA256, spki_der);
    let hex: String = hash.as_ref().iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", PIN_PREFIX, hex)
}

/// Public key info of a DER certificate
pub fn spki_of_certificate(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(cert_der).map_err(|e| {
        DiscoveryError::InvalidTrustObject(format!("failed to parse root certificate: {}", e))
    })?;
    Ok(cert.public_key().raw.to_vec())
}

/// Pin for a PEM certificate
pub fn pin_for_certificate(cert_pem: &str) -> Result<String> {
    let der = kubetrust_pki::authority::parse_pem(cert_pem)
        .map_err(|e| DiscoveryError::InvalidTrustObject(e.to_string()))?;
    Ok(pin_for_spki(&spki_of_certificate(&der)?))
}

/// Allow-list of root public keys
///
/// Empty means pinning is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedKeySet {
    hashes: BTreeSet<String>,
}

impl PinnedKeySet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set from pin strings
    pub fn from_pins<I, S>(pins: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for pin in pins {
            set.allow(pin.as_ref())?;
        }
        Ok(set)
    }

    /// Add a pin; the prefix and hex digits are case-insensitive
    pub fn allow(&mut self, pin: &str) -> Result<()> {
        let pin = pin.trim();
        let hex = pin
            .get(..PIN_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(PIN_PREFIX))
            .map(|_| &pin[PIN_PREFIX.len()..])
            .ok_or_else(|| {
                DiscoveryError::InvalidPin(format!("'{}' must start with {}", pin, PIN_PREFIX))
            })?;
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DiscoveryError::InvalidPin(format!(
                "'{}' must carry 64 hex characters",
                pin
            )));
        }
        self.hashes
            .insert(format!("{}{}", PIN_PREFIX, hex.to_ascii_lowercase()));
        Ok(())
    }

    /// Whether pinning is disabled
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Number of pins
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Check a DER root certificate against the set
    ///
    /// Always fails with [`DiscoveryError::PinMismatch`] for a key that is not
    /// listed; callers decide whether an empty set means "skip".
    pub fn check_certificate(&self, cert_der: &[u8]) -> Result<()> {
        let actual = pin_for_spki(&spki_of_certificate(cert_der)?);
        if self.hashes.contains(&actual) {
            Ok(())
        } else {
            Err(DiscoveryError::PinMismatch { actual })
        }
    }

    /// Pins in canonical form
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hashes.iter().map(String::as_str)
    }
}
