//! Bootstrap trust object
//!
//! The control plane publishes a ConfigMap-shaped object readable without
//! authentication. Its `kubeconfig` entry is a minimal kubeconfig naming the
//! API server and embedding the root CA; every `signature-<token id>` entry
//! is a detached signature of the exact `kubeconfig` bytes.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::signature::{sign_detached, verify_detached};
use crate::token::BootstrapToken;

/// Namespace the trust object is published in
pub const CLUSTER_INFO_NAMESPACE: &str = "kube-public";

/// Name of the trust object
pub const CLUSTER_INFO_NAME: &str = "cluster-info";

/// Data key of the wire-encoded config
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Prefix of the per-token signature keys
pub const SIGNATURE_KEY_PREFIX: &str = "signature-";

/// Kubeconfig embedded in the trust object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    /// Kind (always "Config")
    #[serde(default)]
    pub kind: String,
    /// Clusters; discovery uses the first
    #[serde(default)]
    pub clusters: Vec<KubeconfigCluster>,
}

/// Cluster entry in kubeconfig
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    #[serde(default)]
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name
    #[serde(default)]
    pub name: String,
    /// Object namespace
    #[serde(default)]
    pub namespace: String,
}

/// The published trust object, untrusted until verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustObject {
    /// API version
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Key/value payload
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "ConfigMap".to_string()
}

impl TrustObject {
    /// Build an unsigned trust object for `server_url` and a PEM root CA
    pub fn from_parts(server_url: &str, ca_cert_pem: &str) -> Result<Self> {
        let kubeconfig = Kubeconfig {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![KubeconfigCluster {
                name: String::new(),
                cluster: ClusterConfig {
                    server: server_url.to_string(),
                    certificate_authority_data: Some(STANDARD.encode(ca_cert_pem)),
                },
            }],
        };
        let encoded = serde_yaml::to_string(&kubeconfig)
            .map_err(|e| DiscoveryError::InvalidTrustObject(format!("encode kubeconfig: {}", e)))?;

        let mut data = BTreeMap::new();
        data.insert(KUBECONFIG_KEY.to_string(), encoded);
        Ok(Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: CLUSTER_INFO_NAME.to_string(),
                namespace: CLUSTER_INFO_NAMESPACE.to_string(),
            },
            data,
        })
    }

    /// Decode the JSON form served by the API server
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DiscoveryError::InvalidTrustObject(format!("decode trust object: {}", e)))
    }

    /// Encode as JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| DiscoveryError::InvalidTrustObject(format!("encode trust object: {}", e)))
    }

    /// The signed wire-encoded config
    pub fn kubeconfig(&self) -> Result<&str> {
        self.data.get(KUBECONFIG_KEY).map(String::as_str).ok_or_else(|| {
            DiscoveryError::InvalidTrustObject(format!("missing '{}' entry", KUBECONFIG_KEY))
        })
    }

    /// Signature published for `token`, if any
    pub fn signature_for(&self, token: &BootstrapToken) -> Option<&str> {
        self.data.get(&token.signature_key()).map(String::as_str)
    }

    /// Add or replace the signature entry for `token`
    pub fn sign(&mut self, token: &BootstrapToken) -> Result<()> {
        let (key, jws) = sign_trust_object(self, token)?;
        self.data.insert(key, jws);
        Ok(())
    }

    /// Check the token signature and decode the config
    ///
    /// The result is authenticated by the token only; pinning and the
    /// secure refetch are the caller's job.
    pub fn verify(&self, token: &BootstrapToken) -> Result<ClusterTrustObject> {
        let kubeconfig = self.kubeconfig()?;
        let jws = self
            .signature_for(token)
            .ok_or_else(|| DiscoveryError::SignatureInvalid {
                token_id: token.id().to_string(),
                reason: "no signature for token".to_string(),
            })?;
        verify_detached(token, kubeconfig.as_bytes(), jws)?;
        ClusterTrustObject::decode(kubeconfig)
    }
}

/// Signature entry `(key, detached JWS)` for `token` over `trust`'s config
pub fn sign_trust_object(trust: &TrustObject, token: &BootstrapToken) -> Result<(String, String)> {
    let jws = sign_detached(token, trust.kubeconfig()?.as_bytes())?;
    Ok((token.signature_key(), jws))
}

/// Decoded and signature-checked cluster trust material
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterTrustObject {
    /// API server URL
    pub server_url: String,
    /// Root CA certificate (PEM)
    pub root_ca_pem: String,
    /// Root CA certificate (DER)
    pub root_ca_der: Vec<u8>,
    /// The exact config bytes the signature covered
    pub wire_config: Vec<u8>,
}

impl ClusterTrustObject {
    /// Decode the wire-encoded config
    pub fn decode(wire_config: &str) -> Result<Self> {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(wire_config)
            .map_err(|e| DiscoveryError::InvalidTrustObject(format!("decode kubeconfig: {}", e)))?;
        let cluster = kubeconfig
            .clusters
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::InvalidTrustObject("kubeconfig has no clusters".into()))?
            .cluster;

        let ca_data = cluster.certificate_authority_data.ok_or_else(|| {
            DiscoveryError::InvalidTrustObject("cluster has no certificate authority data".into())
        })?;
        let pem_bytes = STANDARD.decode(ca_data.trim()).map_err(|e| {
            DiscoveryError::InvalidTrustObject(format!("certificate authority data: {}", e))
        })?;
        let root_ca_pem = String::from_utf8(pem_bytes).map_err(|_| {
            DiscoveryError::InvalidTrustObject("certificate authority data is not PEM".into())
        })?;
        let root_ca_der = pem::parse(&root_ca_pem)
            .map_err(|e| DiscoveryError::InvalidTrustObject(format!("root CA PEM: {}", e)))?
            .into_contents();

        Ok(Self {
            server_url: cluster.server,
            root_ca_pem,
            root_ca_der,
            wire_config: wire_config.as_bytes().to_vec(),
        })
    }
}

impl std::fmt::Debug for ClusterTrustObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterTrustObject")
            .field("server_url", &self.server_url)
            .field("root_ca_der_len", &self.root_ca_der.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetrust_pki::CertificateAuthority;

    fn token() -> BootstrapToken {
        BootstrapToken::parse("abcdef.0123456789abcdef").unwrap()
    }

    fn signed(ca: &CertificateAuthority) -> TrustObject {
        let mut trust = TrustObject::from_parts("https://10.0.0.10:6443", ca.ca_cert_pem()).unwrap();
        trust.sign(&token()).unwrap();
        trust
    }

    #[test]
    fn signed_object_verifies_and_decodes() {
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        let trust = signed(&ca);

        let decoded = trust.verify(&token()).unwrap();
        assert_eq!(decoded.server_url, "https://10.0.0.10:6443");
        assert_eq!(decoded.root_ca_pem, ca.ca_cert_pem());
        assert_eq!(
            decoded.root_ca_der,
            kubetrust_pki::authority::parse_pem(ca.ca_cert_pem()).unwrap()
        );
        assert_eq!(decoded.wire_config, trust.kubeconfig().unwrap().as_bytes());
    }

    #[test]
    fn json_form_is_a_config_map() {
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        let trust = signed(&ca);
        let json: serde_json::Value = serde_json::from_slice(&trust.to_json().unwrap()).unwrap();

        assert_eq!(json["kind"], "ConfigMap");
        assert_eq!(json["metadata"]["namespace"], "kube-public");
        assert!(json["data"]["signature-abcdef"].is_string());
        assert!(json["data"]["kubeconfig"]
            .as_str()
            .unwrap()
            .contains("certificate-authority-data"));

        let back = TrustObject::from_json(&trust.to_json().unwrap()).unwrap();
        assert_eq!(back, trust);
    }

    #[test]
    fn tampered_config_fails_for_every_token() {
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        let tokens = [
            token(),
            BootstrapToken::parse("uvwxyz.abcdefabcdefabcd").unwrap(),
        ];
        let mut trust = TrustObject::from_parts("https://10.0.0.10:6443", ca.ca_cert_pem()).unwrap();
        for t in &tokens {
            trust.sign(t).unwrap();
        }

        let config = trust.data.get_mut(KUBECONFIG_KEY).unwrap();
        *config = config.replacen("10.0.0.10", "10.0.0.66", 1);

        for t in &tokens {
            assert!(matches!(
                trust.verify(t),
                Err(DiscoveryError::SignatureInvalid { .. })
            ));
        }
    }

    #[test]
    fn missing_signature_or_config_is_reported() {
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        let unsigned = TrustObject::from_parts("https://cp:6443", ca.ca_cert_pem()).unwrap();
        assert!(unsigned.signature_for(&token()).is_none());
        assert!(matches!(
            unsigned.verify(&token()),
            Err(DiscoveryError::SignatureInvalid { .. })
        ));

        let empty = TrustObject::from_json(br#"{"data":{}}"#).unwrap();
        assert!(matches!(
            empty.verify(&token()),
            Err(DiscoveryError::InvalidTrustObject(_))
        ));
    }

    #[test]
    fn kubeconfig_without_clusters_is_invalid() {
        let wire = "apiVersion: v1\nkind: Config\nclusters: []\n";
        assert!(matches!(
            ClusterTrustObject::decode(wire),
            Err(DiscoveryError::InvalidTrustObject(_))
        ));
    }
}
