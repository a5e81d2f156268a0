//! HTTPS transport against the API server
//!
//! Only `https` endpoints are accepted and both clients refuse plain HTTP,
//! so the pinned refetch can never be downgraded to an unauthenticated
//! connection. Bodies are read under [`MAX_TRUST_OBJECT_BYTES`] since the
//! first fetch trusts nothing about the peer.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DiscoveryError, Result};
use crate::source::{TrustObjectSource, Verification};
use crate::trust_object::{TrustObject, CLUSTER_INFO_NAME, CLUSTER_INFO_NAMESPACE};

/// Largest accepted trust object body (the API server's object size limit)
pub const MAX_TRUST_OBJECT_BYTES: usize = 1024 * 1024;

/// URL of the trust object on `endpoint`
///
/// Endpoints without a scheme are assumed to be HTTPS; any other explicit
/// scheme is refused.
pub fn cluster_info_url(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let authority = match trimmed.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => rest,
        Some((scheme, _)) => {
            return Err(invalid_endpoint(
                endpoint,
                format!("scheme {} is not allowed, only https", scheme),
            ))
        }
        None => trimmed,
    };
    if authority.is_empty() {
        return Err(invalid_endpoint(endpoint, "missing host"));
    }
    Ok(format!(
        "https://{}/api/v1/namespaces/{}/configmaps/{}",
        authority, CLUSTER_INFO_NAMESPACE, CLUSTER_INFO_NAME
    ))
}

fn invalid_endpoint(endpoint: &str, reason: impl Into<String>) -> DiscoveryError {
    DiscoveryError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.into(),
    }
}

/// Fetches the trust object with reqwest
#[derive(Debug, Clone)]
pub struct HttpTrustObjectSource {
    insecure: reqwest::Client,
}

impl HttpTrustObjectSource {
    /// Create a new HTTP source
    ///
    /// The client for unauthenticated polls is built once and shared by
    /// every fetch; pinned refetches build a client around the discovered
    /// root.
    pub fn new() -> Result<Self> {
        Ok(Self {
            insecure: Self::client(Verification::Insecure)?,
        })
    }

    fn client(verification: Verification<'_>) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder().https_only(true);
        let builder = match verification {
            Verification::Insecure => builder.danger_accept_invalid_certs(true),
            Verification::TrustedRoot(der) => {
                let root = reqwest::Certificate::from_der(der).map_err(|e| {
                    DiscoveryError::Transport(format!("invalid root certificate: {}", e))
                })?;
                builder
                    .tls_built_in_root_certs(false)
                    .add_root_certificate(root)
            }
        };
        builder
            .build()
            .map_err(|e| DiscoveryError::Transport(format!("failed to build HTTP client: {}", e)))
    }
}

/// Accumulates a response body, refusing anything over a fixed size
#[derive(Debug)]
struct CappedBody {
    limit: usize,
    buf: Vec<u8>,
}

impl CappedBody {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::new(),
        }
    }

    /// Refuse early when the peer announces an oversized body
    fn check_declared(&self, content_length: Option<u64>) -> Result<()> {
        match content_length {
            Some(len) if len > self.limit as u64 => Err(too_large(self.limit)),
            _ => Ok(()),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if self.buf.len() + chunk.len() > self.limit {
            return Err(too_large(self.limit));
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn too_large(limit: usize) -> DiscoveryError {
    DiscoveryError::Transport(format!("response body exceeds {} bytes", limit))
}

#[async_trait]
impl TrustObjectSource for HttpTrustObjectSource {
    async fn fetch(&self, endpoint: &str, verification: Verification<'_>) -> Result<TrustObject> {
        let url = cluster_info_url(endpoint)?;
        let secure = !matches!(verification, Verification::Insecure);
        let client = if secure {
            Self::client(verification)?
        } else {
            self.insecure.clone()
        };
        debug!(url = %url, secure, "fetching trust object");

        let mut response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Transport(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let mut body = CappedBody::new(MAX_TRUST_OBJECT_BYTES);
        body.check_declared(response.content_length())?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DiscoveryError::Transport(format!("reading {} failed: {}", url, e)))?
        {
            body.push(&chunk)?;
        }
        TrustObject::from_json(&body.into_bytes())
    }
}
