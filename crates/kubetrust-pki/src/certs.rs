//! Declarative certificate registry
//!
//! Every certificate the control plane can produce is described by a
//! [`CertSpec`]. A spec with an empty `ca_name` is itself an authority;
//! every other spec is a leaf signed by the authority it names. The table
//! is static code, not user input.

use std::fmt;
use std::sync::Arc;

use crate::altnames::{
    ApiServerAltNames, ClusterContext, CommonNameFromNodeName, EtcdAltNames, SanMutator,
};
use crate::error::Result;
use crate::issuer::IssueRequest;

/// Extended key usage requested for a leaf certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendedUsage {
    /// TLS server authentication
    ServerAuth,
    /// TLS client authentication
    ClientAuth,
}

impl ExtendedUsage {
    pub(crate) fn to_rcgen(self) -> rcgen::ExtendedKeyUsagePurpose {
        match self {
            Self::ServerAuth => rcgen::ExtendedKeyUsagePurpose::ServerAuth,
            Self::ClientAuth => rcgen::ExtendedKeyUsagePurpose::ClientAuth,
        }
    }
}

impl fmt::Display for ExtendedUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerAuth => write!(f, "server auth"),
            Self::ClientAuth => write!(f, "client auth"),
        }
    }
}

/// Subject and usage template of a certificate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertSubject {
    /// Subject common name
    pub common_name: String,
    /// Subject organizations
    pub organizations: Vec<String>,
    /// Extended key usages (leaves only)
    pub usages: Vec<ExtendedUsage>,
}

impl CertSubject {
    /// Subject with only a common name
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    /// Add an organization
    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.organizations.push(org.into());
        self
    }

    /// Add an extended key usage
    pub fn usage(mut self, usage: ExtendedUsage) -> Self {
        self.usages.push(usage);
        self
    }
}

/// Static definition of one certificate
#[derive(Debug, Clone)]
pub struct CertSpec {
    /// Unique registry name
    pub name: String,
    /// Path of the files relative to the PKI directory, without extension
    pub base_name: String,
    /// Name of the signing authority; empty for authorities
    pub ca_name: String,
    /// Subject/usage template
    pub subject: CertSubject,
    /// Strategies computing the dynamic part of the identity
    pub mutators: Vec<Arc<dyn SanMutator>>,
}

impl CertSpec {
    /// Define a self-signed authority
    pub fn authority(
        name: impl Into<String>,
        base_name: impl Into<String>,
        common_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_name: base_name.into(),
            ca_name: String::new(),
            subject: CertSubject::new(common_name),
            mutators: Vec::new(),
        }
    }

    /// Define a leaf signed by `ca_name`
    pub fn leaf(
        name: impl Into<String>,
        base_name: impl Into<String>,
        ca_name: impl Into<String>,
        subject: CertSubject,
    ) -> Self {
        Self {
            name: name.into(),
            base_name: base_name.into(),
            ca_name: ca_name.into(),
            subject,
            mutators: Vec::new(),
        }
    }

    /// Attach a SAN strategy
    pub fn with_mutator(mut self, mutator: impl SanMutator + 'static) -> Self {
        self.mutators.push(Arc::new(mutator));
        self
    }

    /// Whether this spec describes an authority
    pub fn is_authority(&self) -> bool {
        self.ca_name.is_empty()
    }

    /// Compute the request this spec produces against `ctx`
    ///
    /// Deterministic: the same spec and context always yield the same
    /// subject and SAN set, which is what existing certificates are
    /// validated against.
    pub fn issue_request(&self, ctx: &ClusterContext) -> Result<IssueRequest> {
        let mut request = IssueRequest::new(
            self.subject.common_name.clone(),
            self.subject.usages.clone(),
        );
        request.organizations = self.subject.organizations.clone();
        for mutator in &self.mutators {
            mutator.mutate(ctx, &mut request)?;
        }
        Ok(request)
    }
}

/// Registry names of the built-in hierarchy
pub mod names {
    /// Cluster root authority
    pub const CA: &str = "ca";
    /// API server serving certificate
    pub const API_SERVER: &str = "apiserver";
    /// API server client certificate for kubelets
    pub const API_SERVER_KUBELET_CLIENT: &str = "apiserver-kubelet-client";
    /// Front proxy authority
    pub const FRONT_PROXY_CA: &str = "front-proxy-ca";
    /// Front proxy client certificate
    pub const FRONT_PROXY_CLIENT: &str = "front-proxy-client";
    /// etcd authority
    pub const ETCD_CA: &str = "etcd-ca";
    /// etcd serving certificate
    pub const ETCD_SERVER: &str = "etcd-server";
    /// etcd peer certificate
    pub const ETCD_PEER: &str = "etcd-peer";
    /// etcd health check client
    pub const ETCD_HEALTHCHECK_CLIENT: &str = "etcd-healthcheck-client";
    /// API server client certificate for etcd
    pub const API_SERVER_ETCD_CLIENT: &str = "apiserver-etcd-client";
}

/// Organization granted cluster-admin to the kubelet client certificate
pub const CLUSTER_ADMINS_GROUP: &str = "kubeadm:cluster-admins";

/// The control-plane certificate hierarchy
pub fn default_registry() -> Vec<CertSpec> {
    use ExtendedUsage::{ClientAuth, ServerAuth};

    vec![
        CertSpec::authority(names::CA, "ca", "kubernetes"),
        CertSpec::leaf(
            names::API_SERVER,
            "apiserver",
            names::CA,
            CertSubject::new("kube-apiserver").usage(ServerAuth),
        )
        .with_mutator(ApiServerAltNames),
        CertSpec::leaf(
            names::API_SERVER_KUBELET_CLIENT,
            "apiserver-kubelet-client",
            names::CA,
            CertSubject::new("kube-apiserver-kubelet-client")
                .organization(CLUSTER_ADMINS_GROUP)
                .usage(ClientAuth),
        ),
        CertSpec::authority(names::FRONT_PROXY_CA, "front-proxy-ca", "front-proxy-ca"),
        CertSpec::leaf(
            names::FRONT_PROXY_CLIENT,
            "front-proxy-client",
            names::FRONT_PROXY_CA,
            CertSubject::new("front-proxy-client").usage(ClientAuth),
        ),
        CertSpec::authority(names::ETCD_CA, "etcd/ca", "etcd-ca"),
        CertSpec::leaf(
            names::ETCD_SERVER,
            "etcd/server",
            names::ETCD_CA,
            CertSubject::new("kube-etcd")
                .usage(ServerAuth)
                .usage(ClientAuth),
        )
        .with_mutator(CommonNameFromNodeName)
        .with_mutator(EtcdAltNames),
        CertSpec::leaf(
            names::ETCD_PEER,
            "etcd/peer",
            names::ETCD_CA,
            CertSubject::new("kube-etcd-peer")
                .usage(ServerAuth)
                .usage(ClientAuth),
        )
        .with_mutator(CommonNameFromNodeName)
        .with_mutator(EtcdAltNames),
        CertSpec::leaf(
            names::ETCD_HEALTHCHECK_CLIENT,
            "etcd/healthcheck-client",
            names::ETCD_CA,
            CertSubject::new("kube-etcd-healthcheck-client").usage(ClientAuth),
        ),
        CertSpec::leaf(
            names::API_SERVER_ETCD_CLIENT,
            "apiserver-etcd-client",
            names::ETCD_CA,
            CertSubject::new("kube-apiserver-etcd-client").usage(ClientAuth),
        ),
    ]
}
