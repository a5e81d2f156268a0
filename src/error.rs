//! Error types for kubetrust

use thiserror::Error;

/// Top-level error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Certificate tree error
    #[error(transparent)]
    Pki(#[from] kubetrust_pki::PkiError),

    /// Discovery error
    #[error(transparent)]
    Discovery(#[from] kubetrust_discovery::DiscoveryError),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Tracing could not be installed
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for kubetrust operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use kubetrust_pki::PkiError;

    #[test]
    fn crate_errors_convert_transparently() {
        let err: Error = PkiError::NotAnAuthority {
            base_name: "etcd/ca".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "certificate etcd/ca is not a certificate authority");

        let err: Error = kubetrust_discovery::DiscoveryError::NoEndpoints.into();
        assert!(matches!(err, Error::Discovery(_)));
    }
}
