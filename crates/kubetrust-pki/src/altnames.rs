//! Subject alternative name computation
//!
//! Leaf certificates derive their subject and SANs from live cluster
//! configuration. Each [`CertSpec`](crate::CertSpec) carries a list of
//! [`SanMutator`] strategies; every strategy receives the [`ClusterContext`]
//! explicitly and edits the [`IssueRequest`] being built, so computing the
//! expected identity of a certificate never touches global state.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{PkiError, Result};
use crate::issuer::IssueRequest;

/// Default Kubernetes service subnet
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";

/// Default cluster DNS domain
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";

/// Cluster configuration consumed by SAN strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterContext {
    /// Name of the node the certificates are issued on
    pub node_name: String,
    /// Address the API server advertises to the cluster
    pub advertise_address: Option<IpAddr>,
    /// Service CIDR (comma separated for dual-stack; the first entry wins)
    pub service_subnet: String,
    /// Cluster DNS domain
    pub dns_domain: String,
    /// Stable control-plane endpoint, `host` or `host:port`
    pub control_plane_endpoint: Option<String>,
    /// Extra API server SANs (DNS names or IPs)
    pub api_server_cert_sans: Vec<String>,
}

impl Default for ClusterContext {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            advertise_address: None,
            service_subnet: DEFAULT_SERVICE_SUBNET.to_string(),
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
            control_plane_endpoint: None,
            api_server_cert_sans: Vec::new(),
        }
    }
}

impl ClusterContext {
    /// Create a context for the given node with defaults for everything else
    pub fn for_node(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    /// Check that the context can feed every built-in strategy
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(PkiError::InvalidContext("node name is empty".to_string()));
        }
        self.first_service_ip()?;
        Ok(())
    }

    /// First usable address of the service subnet (the `kubernetes` service IP)
    pub fn first_service_ip(&self) -> Result<IpAddr> {
        let cidr = self
            .service_subnet
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default();
        first_ip_in_cidr(cidr)
    }

    /// Host part of the control-plane endpoint, if one is configured
    pub fn control_plane_host(&self) -> Option<String> {
        let endpoint = self.control_plane_endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        if let Ok(addr) = endpoint.parse::<SocketAddr>() {
            return Some(addr.ip().to_string());
        }
        if endpoint.parse::<IpAddr>().is_ok() {
            return Some(endpoint.to_string());
        }
        match endpoint.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => Some(host.to_string()),
            _ => Some(endpoint.to_string()),
        }
    }
}

fn first_ip_in_cidr(cidr: &str) -> Result<IpAddr> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| PkiError::InvalidContext(format!("service subnet '{}' is not a CIDR", cidr)))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|e| PkiError::InvalidContext(format!("service subnet '{}': {}", cidr, e)))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|e| PkiError::InvalidContext(format!("service subnet '{}': {}", cidr, e)))?;

    match addr {
        IpAddr::V4(v4) => {
            if prefix > 31 {
                return Err(PkiError::InvalidContext(format!(
                    "service subnet '{}' has no usable addresses",
                    cidr
                )));
            }
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            let network = u32::from(v4) & mask;
            Ok(IpAddr::V4(Ipv4Addr::from(network + 1)))
        }
        IpAddr::V6(v6) => {
            if prefix > 127 {
                return Err(PkiError::InvalidContext(format!(
                    "service subnet '{}' has no usable addresses",
                    cidr
                )));
            }
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            let network = u128::from(v6) & mask;
            Ok(IpAddr::V6(Ipv6Addr::from(network + 1)))
        }
    }
}

/// DNS names and IP addresses a certificate is valid for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltNames {
    /// DNS SANs, in insertion order without duplicates
    pub dns_names: Vec<String>,
    /// IP SANs, in insertion order without duplicates
    pub ips: Vec<IpAddr>,
}

impl AltNames {
    /// Add a DNS name unless already present
    pub fn push_dns(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !name.is_empty() && !self.dns_names.contains(&name) {
            self.dns_names.push(name);
        }
    }

    /// Add an IP address unless already present
    pub fn push_ip(&mut self, ip: IpAddr) {
        if !self.ips.contains(&ip) {
            self.ips.push(ip);
        }
    }

    /// Add a value that may be either an IP address or a DNS name
    pub fn push_any(&mut self, value: &str) {
        match value.parse::<IpAddr>() {
            Ok(ip) => self.push_ip(ip),
            Err(_) => self.push_dns(value),
        }
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: &AltNames) {
        for name in &other.dns_names {
            self.push_dns(name.clone());
        }
        for ip in &other.ips {
            self.push_ip(*ip);
        }
    }

    /// Whether every name and address in `other` is also in `self`
    pub fn contains_all(&self, other: &AltNames) -> bool {
        other.dns_names.iter().all(|n| self.dns_names.contains(n))
            && other.ips.iter().all(|ip| self.ips.contains(ip))
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty() && self.ips.is_empty()
    }
}

/// Strategy that derives part of a leaf's identity from the cluster context
pub trait SanMutator: fmt::Debug + Send + Sync {
    /// Apply this strategy to the request being built
    fn mutate(&self, ctx: &ClusterContext, request: &mut IssueRequest) -> Result<()>;
}

/// SANs for the API server serving certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiServerAltNames;

impl SanMutator for ApiServerAltNames {
    fn mutate(&self, ctx: &ClusterContext, request: &mut IssueRequest) -> Result<()> {
        let names = &mut request.alt_names;
        names.push_dns(ctx.node_name.clone());
        names.push_dns("kubernetes");
        names.push_dns("kubernetes.default");
        names.push_dns("kubernetes.default.svc");
        names.push_dns(format!("kubernetes.default.svc.{}", ctx.dns_domain));

        names.push_ip(ctx.first_service_ip()?);
        if let Some(ip) = ctx.advertise_address {
            names.push_ip(ip);
        }
        if let Some(host) = ctx.control_plane_host() {
            names.push_any(&host);
        }
        for extra in &ctx.api_server_cert_sans {
            names.push_any(extra.trim());
        }
        Ok(())
    }
}

/// SANs for etcd serving and peer certificates
#[derive(Debug, Clone, Copy, Default)]
pub struct EtcdAltNames;

impl SanMutator for EtcdAltNames {
    fn mutate(&self, ctx: &ClusterContext, request: &mut IssueRequest) -> Result<()> {
        let names = &mut request.alt_names;
        names.push_dns(ctx.node_name.clone());
        names.push_dns("localhost");
        if let Some(ip) = ctx.advertise_address {
            names.push_ip(ip);
        }
        names.push_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        names.push_ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
        Ok(())
    }
}

/// Replace the common name with the node name
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonNameFromNodeName;

impl SanMutator for CommonNameFromNodeName {
    fn mutate(&self, ctx: &ClusterContext, request: &mut IssueRequest) -> Result<()> {
        request.common_name = ctx.node_name.clone();
        Ok(())
    }
}

/// Fixed SANs independent of the cluster context
#[derive(Debug, Clone, Default)]
pub struct StaticAltNames(pub AltNames);

impl SanMutator for StaticAltNames {
    fn mutate(&self, _ctx: &ClusterContext, request: &mut IssueRequest) -> Result<()> {
        request.alt_names.extend(&self.0);
        Ok(())
    }
}
