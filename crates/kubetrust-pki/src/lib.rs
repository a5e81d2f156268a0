//! Kubetrust PKI - control-plane certificate authority tree
//!
//! This crate owns the certificates a control plane issues for its own
//! services:
//!
//! - **Registry**: static [`CertSpec`] table describing every authority and leaf
//! - **Tree**: the registry resolved into authorities and the leaves they sign
//! - **Issuer**: signs leaves with per-service subjects and SANs
//! - **Materializer**: reuses, validates or generates files in the PKI directory
//!
//! # Architecture
//!
//! Trees are exactly one level deep. Authorities are materialized before
//! their leaves; an authority whose key is not on disk can only vouch for
//! leaves that already exist.

pub mod altnames;
pub mod authority;
pub mod certs;
pub mod error;
pub mod expiration;
pub mod issuer;
pub mod materialize;
pub mod service_account;
pub mod store;
pub mod tree;

pub use altnames::{
    AltNames, ApiServerAltNames, ClusterContext, CommonNameFromNodeName, EtcdAltNames,
    SanMutator, StaticAltNames,
};
pub use authority::{CertificateAuthority, CertificateInfo};
pub use certs::{default_registry, CertSpec, CertSubject, ExtendedUsage};
pub use error::{PkiError, Result};
pub use expiration::{check_expiration, ExpirationEntry, ExpirationStatus};
pub use issuer::{issue_leaf, verify_leaf, IssueRequest, IssuedCert};
pub use materialize::{materialize, MaterializeAction, MaterializeReport, MaterializedCert};
pub use service_account::ensure_service_account_key;
pub use tree::{AuthorityEntry, CertificateTree};
