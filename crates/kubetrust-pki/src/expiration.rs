//! Expiration report for materialized certificates

use std::path::Path;

use crate::authority::CertificateInfo;
use crate::error::Result;
use crate::store;
use crate::tree::CertificateTree;

/// State of one certificate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpirationStatus {
    /// No certificate file on disk
    Absent,
    /// The file exists but does not parse
    Unreadable(String),
    /// Parsed certificate
    Present {
        /// Subject common name
        common_name: String,
        /// Expiry as a unix timestamp
        not_after: i64,
        /// Seconds left until expiry, negative once expired
        remaining_secs: i64,
    },
}

/// One row of the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationEntry {
    /// Registry name
    pub name: String,
    /// On-disk base name
    pub base_name: String,
    /// Signing authority, `None` for authorities
    pub authority: Option<String>,
    /// What was found on disk
    pub status: ExpirationStatus,
}

impl ExpirationEntry {
    /// Whether the certificate exists and has expired
    pub fn is_expired(&self) -> bool {
        matches!(
            self.status,
            ExpirationStatus::Present { remaining_secs, .. } if remaining_secs <= 0
        )
    }
}

/// Report expiry of every certificate in `tree`
///
/// Authorities come first, each followed by its leaves. Missing or
/// unparsable files are listed rather than failing the report; only I/O
/// errors other than "not found" abort it.
pub fn check_expiration(tree: &CertificateTree, pki_dir: &Path) -> Result<Vec<ExpirationEntry>> {
    let mut entries = Vec::with_capacity(tree.specs().len());
    for entry in tree.authorities() {
        for spec in std::iter::once(entry.authority).chain(entry.leaf_specs()) {
            let status = match store::load_cert(pki_dir, &spec.base_name)? {
                None => ExpirationStatus::Absent,
                Some(pem) => match CertificateInfo::from_pem(&pem) {
                    Ok(info) => ExpirationStatus::Present {
                        remaining_secs: info.remaining_secs(),
                        common_name: info.common_name,
                        not_after: info.not_after,
                    },
                    Err(e) => ExpirationStatus::Unreadable(e.to_string()),
                },
            };
            entries.push(ExpirationEntry {
                name: spec.name.clone(),
                base_name: spec.base_name.clone(),
                authority: (!spec.is_authority()).then(|| spec.ca_name.clone()),
                status,
            });
        }
    }
    Ok(entries)
}
