//! Transport seam for fetching the trust object

use async_trait::async_trait;

use crate::error::Result;
use crate::trust_object::TrustObject;

/// How the server must be authenticated for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification<'a> {
    /// Accept any server certificate
    Insecure,
    /// Trust only this DER root certificate
    TrustedRoot(&'a [u8]),
}

/// Something that can fetch the published trust object from an endpoint
///
/// Implementations must be cancel-safe: a fetch future may be dropped at
/// any await point when the race is decided.
#[async_trait]
pub trait TrustObjectSource: Send + Sync {
    /// Fetch the trust object from `endpoint`
    async fn fetch(&self, endpoint: &str, verification: Verification<'_>) -> Result<TrustObject>;
}
