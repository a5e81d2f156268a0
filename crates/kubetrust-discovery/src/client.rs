//! Discovery client
//!
//! One attempt against one endpoint:
//!
//! 1. Poll the trust object without authenticating the server until it
//!    carries a signature for our token id
//! 2. Verify that signature with the token secret
//! 3. With pins configured: check the root key, refetch over TLS trusting
//!    only that root, and require byte-identical config
//!
//! Every await point races the cancellation token, so an attempt stops as
//! soon as another endpoint wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DiscoveryError, Result};
use crate::pin::PinnedKeySet;
use crate::source::{TrustObjectSource, Verification};
use crate::token::BootstrapToken;
use crate::trust_object::{ClusterTrustObject, TrustObject};

/// Await `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
        value = fut => Ok(value),
    }
}

/// Runs the discovery state machine against single endpoints
pub struct DiscoveryClient {
    source: Arc<dyn TrustObjectSource>,
    token: BootstrapToken,
    pins: PinnedKeySet,
    retry_interval: Duration,
}

impl DiscoveryClient {
    /// Create a client for `token`
    ///
    /// A malformed token fails here, before any network I/O.
    pub fn new(
        source: Arc<dyn TrustObjectSource>,
        token: &str,
        pins: PinnedKeySet,
        retry_interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            source,
            token: BootstrapToken::parse(token)?,
            pins,
            retry_interval,
        })
    }

    /// Interval between polls and between failed attempts
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Token id this client authenticates with
    pub fn token_id(&self) -> &str {
        self.token.id()
    }

    /// Run one full attempt against `endpoint`
    pub async fn attempt(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<ClusterTrustObject> {
        let insecure = self.poll_insecure(endpoint, cancel).await?;
        let trust = insecure.verify(&self.token)?;

        if self.pins.is_empty() {
            info!(endpoint = %endpoint, "no key pins configured, trusting token-signed root");
            return Ok(trust);
        }
        self.pins.check_certificate(&trust.root_ca_der)?;

        let secure = cancellable(
            cancel,
            self.source
                .fetch(endpoint, Verification::TrustedRoot(&trust.root_ca_der)),
        )
        .await??;
        if secure.kubeconfig()?.as_bytes() != trust.wire_config.as_slice() {
            return Err(DiscoveryError::InconsistentTrustObject {
                endpoint: endpoint.to_string(),
            });
        }

        debug!(endpoint = %endpoint, "trust object confirmed over pinned TLS");
        Ok(trust)
    }

    /// Fetch until the object is retrievable and signed for our token
    async fn poll_insecure(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<TrustObject> {
        loop {
            let fetched =
                cancellable(cancel, self.source.fetch(endpoint, Verification::Insecure)).await?;
            match fetched {
                Ok(trust) if trust.signature_for(&self.token).is_some() => return Ok(trust),
                Ok(_) => {
                    debug!(
                        endpoint = %endpoint,
                        token_id = %self.token.id(),
                        "trust object not yet signed for token"
                    );
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "trust object not retrievable yet");
                }
            }
            cancellable(cancel, tokio::time::sleep(self.retry_interval)).await?;
        }
    }
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("token", &self.token)
            .field("pins", &self.pins.len())
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}
