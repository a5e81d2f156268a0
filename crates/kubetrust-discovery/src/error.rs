//! Error types for trust discovery

use std::time::Duration;

use thiserror::Error;

/// Discovery errors
///
/// `SignatureInvalid`, `PinMismatch`, `InconsistentTrustObject` and
/// `Transport` end a single attempt against one endpoint; the race keeps
/// retrying that endpoint until it wins or the global timeout fires.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Token does not match `[a-z0-9]{6}.[a-z0-9]{16}`
    #[error("malformed bootstrap token: {0}")]
    MalformedToken(String),

    /// Detached signature does not verify with the token secret
    #[error("trust object signature for token {token_id} is invalid: {reason}")]
    SignatureInvalid {
        /// Public token id
        token_id: String,
        /// What failed
        reason: String,
    },

    /// Root certificate public key is not in the pin set
    #[error("root certificate public key {actual} is not pinned")]
    PinMismatch {
        /// Pin computed from the discovered root
        actual: String,
    },

    /// Secure refetch returned different bytes than the insecure fetch
    #[error("trust object from {endpoint} changed between insecure and secure fetch")]
    InconsistentTrustObject {
        /// Endpoint that answered
        endpoint: String,
    },

    /// No endpoint produced a validated trust object in time
    #[error("discovery timed out after {timeout:?}{}", last_error_suffix(.last_error))]
    DiscoveryTimedOut {
        /// Configured global timeout
        timeout: Duration,
        /// Last per-attempt error observed, if any
        last_error: Option<String>,
    },

    /// The attempt was cancelled by the coordinator
    #[error("discovery attempt cancelled")]
    Cancelled,

    /// No candidate endpoints were supplied
    #[error("no discovery endpoints configured")]
    NoEndpoints,

    /// Connection or HTTP failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Pin string is not `sha256:<64 hex>`
    #[error("invalid pin: {0}")]
    InvalidPin(String),

    /// The OS random source failed while generating a token
    #[error("bootstrap token generation failed: {0}")]
    TokenGeneration(String),

    /// Endpoint is not usable for discovery
    #[error("invalid discovery endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured
        endpoint: String,
        /// Why it was refused
        reason: String,
    },

    /// Trust object cannot be decoded
    #[error("invalid trust object: {0}")]
    InvalidTrustObject(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(": last error: {}", e))
        .unwrap_or_default()
}

impl DiscoveryError {
    /// Whether an attempt failing with this error may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MalformedToken(_)
                | Self::TokenGeneration(_)
                | Self::InvalidEndpoint { .. }
                | Self::Cancelled
                | Self::NoEndpoints
                | Self::InvalidPin(_)
        )
    }
}

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;
