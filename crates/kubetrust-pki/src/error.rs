//! Error types for certificate tree operations

use thiserror::Error;

/// PKI errors
///
/// `UnknownAuthorityReference`, `DuplicateSpec`, `NestedAuthority` and
/// `InvalidSubject` indicate a defect in the registry or its configuration
/// and abort the whole run. The materialization variants identify the
/// authority or leaf whose on-disk state was rejected.
#[derive(Debug, Error)]
pub enum PkiError {
    /// A leaf names an authority that is not in the registry
    #[error("certificate {leaf_name} references unknown authority {ca_name}")]
    UnknownAuthorityReference {
        /// Name of the leaf spec
        leaf_name: String,
        /// The unresolved authority name
        ca_name: String,
    },

    /// Two registry entries share a name
    #[error("duplicate certificate spec name: {name}")]
    DuplicateSpec {
        /// The repeated name
        name: String,
    },

    /// An authority is itself signed by another authority
    #[error("certificate {name} is signed by {ca_name}, which is not a root authority")]
    NestedAuthority {
        /// Name of the offending spec
        name: String,
        /// The authority it references
        ca_name: String,
    },

    /// A certificate on disk at an authority's location is not a CA
    #[error("certificate {base_name} is not a certificate authority")]
    NotAnAuthority {
        /// On-disk base name
        base_name: String,
    },

    /// An authority has no private key and a leaf under it is missing or invalid
    #[error("cannot issue {leaf_name}: authority key is not available and the existing certificate is missing or invalid")]
    MissingAuthorityKeyCannotIssue {
        /// Name of the leaf that would need signing
        leaf_name: String,
    },

    /// Existing material does not match what the current configuration expects
    #[error("certificate {base_name} is invalid: {reason}")]
    CertificateInvalid {
        /// On-disk base name
        base_name: String,
        /// Why the certificate was rejected
        reason: String,
    },

    /// Empty common name or empty usage list
    #[error("invalid certificate subject: {0}")]
    InvalidSubject(String),

    /// Cluster context cannot produce alternative names
    #[error("invalid cluster context: {0}")]
    InvalidContext(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

impl PkiError {
    /// Create a `CertificateInvalid` error for the given base name
    pub fn invalid(base_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CertificateInvalid {
            base_name: base_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error points at a registry or configuration defect
    /// rather than at on-disk state
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownAuthorityReference { .. }
                | Self::DuplicateSpec { .. }
                | Self::NestedAuthority { .. }
                | Self::InvalidSubject(_)
                | Self::InvalidContext(_)
        )
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let io_err = std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "cannot read ca.key",
        );
        let err: PkiError = io_err.into();

        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("cannot read ca.key"));
        assert!(!err.is_construction_error());
    }

    #[test]
    fn messages_name_the_failing_certificate() {
        let err = PkiError::UnknownAuthorityReference {
            leaf_name: "apiserver".to_string(),
            ca_name: "missing-ca".to_string(),
        };
        assert!(err.to_string().contains("apiserver"));
        assert!(err.to_string().contains("missing-ca"));
        assert!(err.is_construction_error());

        let err = PkiError::invalid("etcd/server", "expired");
        assert_eq!(err.to_string(), "certificate etcd/server is invalid: expired");
    }
}
