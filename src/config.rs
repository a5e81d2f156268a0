//! Configuration file
//!
//! A single YAML document with one section per concern. Every field has a
//! default, so a missing file or a partial file is valid; command line flags
//! override what the file says.
//!
//! ```yaml
//! pki:
//!   pkiDir: /etc/kubernetes/pki
//! cluster:
//!   nodeName: cp-0
//!   advertiseAddress: 10.0.0.10
//! discovery:
//!   endpoints: ["10.0.0.10:6443"]
//!   pins: ["sha256:..."]
//!   timeoutSecs: 300
//! telemetry:
//!   json: false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kubetrust_discovery::DiscoveryConfig;
use kubetrust_pki::ClusterContext;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::telemetry::TelemetryConfig;

/// Default PKI directory
pub const DEFAULT_PKI_DIR: &str = "/etc/kubernetes/pki";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubetrustConfig {
    /// Certificate tree settings
    pub pki: PkiConfig,
    /// Cluster context feeding SAN computation
    pub cluster: ClusterContext,
    /// Joining-node discovery settings
    pub discovery: DiscoverySettings,
    /// Logging
    pub telemetry: TelemetryConfig,
}

/// Certificate tree settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PkiConfig {
    /// Directory holding certificates and keys
    pub pki_dir: PathBuf,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            pki_dir: PathBuf::from(DEFAULT_PKI_DIR),
        }
    }
}

/// Discovery settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoverySettings {
    /// Candidate API server endpoints
    pub endpoints: Vec<String>,
    /// Bootstrap token
    pub token: Option<String>,
    /// Root key pins (`sha256:<hex>`)
    pub pins: Vec<String>,
    /// Global discovery timeout in seconds
    pub timeout_secs: u64,
    /// Poll/retry interval in seconds
    pub retry_interval_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            token: None,
            pins: Vec::new(),
            timeout_secs: kubetrust_discovery::DEFAULT_DISCOVERY_TIMEOUT.as_secs(),
            retry_interval_secs: kubetrust_discovery::DEFAULT_RETRY_INTERVAL.as_secs(),
        }
    }
}

impl std::fmt::Debug for DiscoverySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoverySettings")
            .field("endpoints", &self.endpoints)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("pins", &self.pins)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_interval_secs", &self.retry_interval_secs)
            .finish()
    }
}

impl DiscoverySettings {
    /// Build the discovery inputs; a token is required
    pub fn to_discovery_config(&self) -> Result<DiscoveryConfig> {
        let token = self
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::config("discovery requires a bootstrap token"))?;
        if self.retry_interval_secs == 0 {
            return Err(Error::config("discovery.retryIntervalSecs must be positive"));
        }
        Ok(DiscoveryConfig {
            endpoints: self.endpoints.clone(),
            token,
            pins: self.pins.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
        })
    }
}

impl KubetrustConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Self::from_yaml(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a YAML document; an empty document yields the defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }
}
