//! Kubetrust Discovery - establishing trust in an existing control plane
//!
//! A joining node holds a short-lived bootstrap token and, optionally, the
//! pins of the cluster's root key. This crate turns those into a validated
//! root certificate and API server URL:
//!
//! - **Token**: `<id>.<secret>`; the id selects a signature, the secret verifies it
//! - **Trust object**: the published kubeconfig plus per-token detached signatures
//! - **Client**: insecure fetch, signature check, pin check, pinned refetch
//! - **Race**: all candidate endpoints in parallel, first validated answer wins
//!
//! Nothing fetched is trusted before the signature check passes, and with
//! pins configured nothing is trusted before the pinned refetch matches.

use std::sync::Arc;
use std::time::Duration;

pub mod client;
pub mod error;
pub mod http;
pub mod pin;
pub mod race;
pub mod signature;
pub mod source;
pub mod token;
pub mod trust_object;

#[cfg(test)]
pub(crate) mod testing;

pub use client::DiscoveryClient;
pub use error::{DiscoveryError, Result};
pub use http::HttpTrustObjectSource;
pub use pin::{pin_for_certificate, PinnedKeySet};
pub use race::{race_endpoints, DiscoveryOutcome};
pub use source::{TrustObjectSource, Verification};
pub use token::BootstrapToken;
pub use trust_object::{sign_trust_object, ClusterTrustObject, TrustObject};

/// Default global discovery timeout
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between polls and attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Inputs of one discovery run
#[derive(Clone)]
pub struct DiscoveryConfig {
    /// Candidate API server endpoints (`host:port` or URL)
    pub endpoints: Vec<String>,
    /// Bootstrap token `<id>.<secret>`
    pub token: String,
    /// Allowed root key pins; empty disables pinning
    pub pins: Vec<String>,
    /// Global timeout for the whole race
    pub timeout: Duration,
    /// Interval between polls and between failed attempts
    pub retry_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            token: String::new(),
            pins: Vec::new(),
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl std::fmt::Debug for DiscoveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryConfig")
            .field("endpoints", &self.endpoints)
            .field("pins", &self.pins)
            .field("timeout", &self.timeout)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

/// Discover and validate the cluster's root of trust
///
/// Token, pins and endpoint URLs are validated before any endpoint is
/// contacted.
pub async fn discover_cluster_trust(
    config: &DiscoveryConfig,
    source: Arc<dyn TrustObjectSource>,
) -> Result<DiscoveryOutcome> {
    let pins = PinnedKeySet::from_pins(&config.pins)?;
    let client = DiscoveryClient::new(source, &config.token, pins, config.retry_interval)?;
    if config.endpoints.is_empty() {
        return Err(DiscoveryError::NoEndpoints);
    }
    for endpoint in &config.endpoints {
        crate::http::cluster_info_url(endpoint)?;
    }
    race_endpoints(Arc::new(client), &config.endpoints, config.timeout).await
}
