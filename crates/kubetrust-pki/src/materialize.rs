//! Idempotent materialization of a certificate tree
//!
//! For every authority, then every leaf it signs, decide whether the files
//! on disk are reused, validated or generated. Existing material is never
//! overwritten: anything that no longer matches the registry is reported as
//! an error for an operator to resolve.
//!
//! The run is not transactional. Files written before a failure stay on
//! disk, and a later run picks them up as existing material. Callers must
//! serialize runs against the same directory; no locking is done here.

use std::path::Path;

use rcgen::{KeyPair, PublicKeyData};
use tracing::{debug, info};

use crate::altnames::ClusterContext;
use crate::authority::{CertificateAuthority, CertificateInfo};
use crate::certs::CertSpec;
use crate::error::{PkiError, Result};
use crate::issuer::{issue_leaf, verify_leaf, IssueRequest};
use crate::store;
use crate::tree::CertificateTree;

/// What happened to one certificate during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeAction {
    /// New key material was generated and written
    Generated,
    /// An existing authority was loaded for signing
    Reused,
    /// An existing leaf was checked and left untouched
    Validated,
}

/// One certificate in a [`MaterializeReport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedCert {
    /// Registry name
    pub name: String,
    /// On-disk base name
    pub base_name: String,
    /// Whether the certificate is an authority
    pub is_authority: bool,
    /// Outcome
    pub action: MaterializeAction,
}

/// Outcome of a successful [`materialize`] run, in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Every authority and leaf that was handled
    pub certs: Vec<MaterializedCert>,
}

impl MaterializeReport {
    fn record(&mut self, spec: &CertSpec, action: MaterializeAction) {
        self.certs.push(MaterializedCert {
            name: spec.name.clone(),
            base_name: spec.base_name.clone(),
            is_authority: spec.is_authority(),
            action,
        });
    }

    /// Registry names of the certificates that were generated
    pub fn generated(&self) -> Vec<&str> {
        self.certs
            .iter()
            .filter(|c| c.action == MaterializeAction::Generated)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Action taken for `name`, if it was processed
    pub fn action(&self, name: &str) -> Option<MaterializeAction> {
        self.certs.iter().find(|c| c.name == name).map(|c| c.action)
    }
}

/// Bring `pki_dir` in line with `tree`
///
/// Every leaf's expected identity is computed before any file is touched,
/// so a context that cannot produce a request fails without writing.
pub fn materialize(
    tree: &CertificateTree,
    pki_dir: &Path,
    ctx: &ClusterContext,
) -> Result<MaterializeReport> {
    ctx.validate()?;

    let mut plan = Vec::with_capacity(tree.len());
    for entry in tree.authorities() {
        let leaves = entry
            .leaf_specs()
            .map(|spec| Ok((spec, spec.issue_request(ctx)?)))
            .collect::<Result<Vec<_>>>()?;
        plan.push((entry.authority, leaves));
    }

    let mut report = MaterializeReport::default();
    for (authority_spec, leaves) in plan {
        let (ca, action) = ensure_authority(authority_spec, pki_dir)?;
        report.record(authority_spec, action);

        for (leaf_spec, request) in leaves {
            let action = if ca.has_key() {
                ensure_leaf(leaf_spec, &request, &ca, pki_dir)?
            } else {
                validate_leaf_under_keyless(leaf_spec, &request, &ca, pki_dir)?
            };
            report.record(leaf_spec, action);
        }
    }

    Ok(report)
}

fn ensure_authority(
    spec: &CertSpec,
    pki_dir: &Path,
) -> Result<(CertificateAuthority, MaterializeAction)> {
    let base = spec.base_name.as_str();
    let cert_pem = store::load_cert(pki_dir, base)?;
    let key_pem = store::load_key(pki_dir, base)?;

    let cert_pem = match (cert_pem, key_pem.as_deref()) {
        (None, None) => {
            let ca = CertificateAuthority::new(&spec.subject.common_name)?;
            let key = ca.ca_key_pem().ok_or_else(|| {
                PkiError::KeyGenerationFailed(format!("no key generated for {}", base))
            })?;
            store::write_cert_and_key(pki_dir, base, ca.ca_cert_pem(), key)?;
            if let Some(public_pem) = ca.public_key_pem()? {
                store::write_public_key(pki_dir, base, &public_pem)?;
            }
            info!(cert = %spec.name, path = %base, "generated certificate authority");
            return Ok((ca, MaterializeAction::Generated));
        }
        (None, Some(_)) => {
            return Err(PkiError::invalid(
                base,
                "private key present without certificate",
            ))
        }
        (Some(cert_pem), _) => cert_pem,
    };

    let info =
        CertificateInfo::from_pem(&cert_pem).map_err(|e| PkiError::invalid(base, e.to_string()))?;
    if !info.is_ca {
        return Err(PkiError::NotAnAuthority {
            base_name: base.to_string(),
        });
    }
    if info.is_expired() {
        return Err(PkiError::invalid(base, "expired"));
    }

    let ca = match key_pem {
        Some(key_pem) => CertificateAuthority::from_pem(&cert_pem, &key_pem)
            .map_err(|e| PkiError::invalid(base, e.to_string()))?,
        None => {
            info!(cert = %spec.name, "authority key absent, existing leaves will be validated only");
            CertificateAuthority::from_cert_pem(&cert_pem)?
        }
    };

    debug!(cert = %spec.name, has_key = ca.has_key(), "reusing certificate authority");
    Ok((ca, MaterializeAction::Reused))
}

fn ensure_leaf(
    spec: &CertSpec,
    request: &IssueRequest,
    ca: &CertificateAuthority,
    pki_dir: &Path,
) -> Result<MaterializeAction> {
    let base = spec.base_name.as_str();
    let Some(cert_pem) = store::load_cert(pki_dir, base)? else {
        let issued = issue_leaf(ca, request)?;
        store::write_cert_and_key(pki_dir, base, &issued.cert_pem, &issued.key_pem)?;
        info!(cert = %spec.name, path = %base, ca = %spec.ca_name, "issued certificate");
        return Ok(MaterializeAction::Generated);
    };

    let info = verify_leaf(base, &cert_pem, ca, request)?;
    check_leaf_key(base, &info, pki_dir)?;

    debug!(cert = %spec.name, "existing certificate is valid");
    Ok(MaterializeAction::Validated)
}

fn check_leaf_key(base: &str, info: &CertificateInfo, pki_dir: &Path) -> Result<()> {
    let key_pem = store::load_key(pki_dir, base)?
        .ok_or_else(|| PkiError::invalid(base, "private key is missing"))?;
    let key = KeyPair::from_pem(&key_pem)
        .map_err(|e| PkiError::invalid(base, format!("failed to parse private key: {}", e)))?;
    if key.subject_public_key_info() != info.public_key_der {
        return Err(PkiError::invalid(
            base,
            "private key does not match certificate",
        ));
    }
    Ok(())
}

fn validate_leaf_under_keyless(
    spec: &CertSpec,
    request: &IssueRequest,
    ca: &CertificateAuthority,
    pki_dir: &Path,
) -> Result<MaterializeAction> {
    let base = spec.base_name.as_str();
    let cannot_issue = || PkiError::MissingAuthorityKeyCannotIssue {
        leaf_name: spec.name.clone(),
    };

    let cert_pem = store::load_cert(pki_dir, base)?.ok_or_else(cannot_issue)?;
    let info = verify_leaf(base, &cert_pem, ca, request).map_err(|e| {
        debug!(cert = %spec.name, error = %e, "leaf under keyless authority rejected");
        cannot_issue()
    })?;
    check_leaf_key(base, &info, pki_dir).map_err(|_| cannot_issue())?;

    debug!(cert = %spec.name, "existing certificate is valid");
    Ok(MaterializeAction::Validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::{default_registry, names, CertSubject, ExtendedUsage};
    use crate::store::{cert_path, key_path, pub_path};
    use std::fs;
    use tempfile::TempDir;

    fn ctx() -> ClusterContext {
        let mut ctx = ClusterContext::for_node("cp-0");
        ctx.advertise_address = Some("192.168.10.5".parse().unwrap());
        ctx
    }

    fn default_tree() -> CertificateTree {
        CertificateTree::build(default_registry()).unwrap()
    }

    fn small_tree() -> CertificateTree {
        CertificateTree::build(vec![
            CertSpec::authority("ca", "ca", "kubernetes"),
            CertSpec::leaf(
                "client",
                "client",
                "ca",
                CertSubject::new("client").usage(ExtendedUsage::ClientAuth),
            ),
        ])
        .unwrap()
    }

    /// Story: a fresh control plane gets every authority and leaf generated
    #[test]
    fn story_fresh_directory_generates_everything() {
        let dir = TempDir::new().unwrap();
        let report = materialize(&default_tree(), dir.path(), &ctx()).unwrap();

        assert_eq!(report.certs.len(), 10);
        assert_eq!(report.generated().len(), 10);
        assert!(report.certs[0].is_authority);

        for base in ["ca", "front-proxy-ca", "etcd/ca"] {
            assert!(cert_path(dir.path(), base).exists(), "{}", base);
            assert!(key_path(dir.path(), base).exists(), "{}", base);
            assert!(pub_path(dir.path(), base).exists(), "{}", base);
        }
        assert!(cert_path(dir.path(), "etcd/healthcheck-client").exists());
        assert!(!pub_path(dir.path(), "apiserver").exists());
    }

    /// Story: re-running leaves every byte on disk untouched
    #[test]
    fn story_second_run_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let tree = default_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();

        let ca_cert = fs::read(cert_path(dir.path(), "ca")).unwrap();
        let ca_key = fs::read(key_path(dir.path(), "ca")).unwrap();
        let leaf_cert = fs::read(cert_path(dir.path(), "apiserver")).unwrap();

        let report = materialize(&tree, dir.path(), &ctx()).unwrap();
        assert!(report.generated().is_empty());
        assert_eq!(report.action(names::CA), Some(MaterializeAction::Reused));
        assert_eq!(
            report.action(names::API_SERVER),
            Some(MaterializeAction::Validated)
        );

        assert_eq!(fs::read(cert_path(dir.path(), "ca")).unwrap(), ca_cert);
        assert_eq!(fs::read(key_path(dir.path(), "ca")).unwrap(), ca_key);
        assert_eq!(fs::read(cert_path(dir.path(), "apiserver")).unwrap(), leaf_cert);
    }

    #[test]
    fn deleted_leaf_is_reissued_by_existing_authority() {
        let dir = TempDir::new().unwrap();
        let tree = small_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();
        let ca_cert = fs::read(cert_path(dir.path(), "ca")).unwrap();

        fs::remove_file(cert_path(dir.path(), "client")).unwrap();
        fs::remove_file(key_path(dir.path(), "client")).unwrap();

        let report = materialize(&tree, dir.path(), &ctx()).unwrap();
        assert_eq!(report.generated(), vec!["client"]);
        assert_eq!(fs::read(cert_path(dir.path(), "ca")).unwrap(), ca_cert);
    }

    /// Story: an external CA is provided without its key; existing leaves
    /// are accepted, a missing one cannot be signed
    #[test]
    fn story_keyless_authority() {
        let dir = TempDir::new().unwrap();
        let tree = small_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();

        fs::remove_file(key_path(dir.path(), "ca")).unwrap();
        let report = materialize(&tree, dir.path(), &ctx()).unwrap();
        assert_eq!(report.action("client"), Some(MaterializeAction::Validated));

        fs::remove_file(cert_path(dir.path(), "client")).unwrap();
        match materialize(&tree, dir.path(), &ctx()) {
            Err(PkiError::MissingAuthorityKeyCannotIssue { leaf_name }) => {
                assert_eq!(leaf_name, "client")
            }
            other => panic!("expected MissingAuthorityKeyCannotIssue, got {:?}", other),
        }
        assert!(!cert_path(dir.path(), "client").exists());
    }

    #[test]
    fn keyless_authority_rejects_leaf_signed_elsewhere() {
        let dir = TempDir::new().unwrap();
        let tree = small_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();
        fs::remove_file(key_path(dir.path(), "ca")).unwrap();

        let other = CertificateAuthority::new("kubernetes").unwrap();
        let request = IssueRequest::new("client", vec![ExtendedUsage::ClientAuth]);
        let issued = issue_leaf(&other, &request).unwrap();
        store::write_cert_and_key(dir.path(), "client", &issued.cert_pem, &issued.key_pem)
            .unwrap();

        assert!(matches!(
            materialize(&tree, dir.path(), &ctx()),
            Err(PkiError::MissingAuthorityKeyCannotIssue { .. })
        ));
    }

    #[test]
    fn leaf_certificate_at_authority_path_is_not_an_authority() {
        let dir = TempDir::new().unwrap();
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        let request = IssueRequest::new("imposter", vec![ExtendedUsage::ClientAuth]);
        let issued = issue_leaf(&ca, &request).unwrap();
        store::write_cert_and_key(dir.path(), "ca", &issued.cert_pem, &issued.key_pem).unwrap();

        match materialize(&small_tree(), dir.path(), &ctx()) {
            Err(PkiError::NotAnAuthority { base_name }) => assert_eq!(base_name, "ca"),
            other => panic!("expected NotAnAuthority, got {:?}", other),
        }
    }

    #[test]
    fn leaf_signed_by_replaced_authority_is_invalid_and_kept() {
        let dir = TempDir::new().unwrap();
        let tree = small_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();
        let leaf_before = fs::read(cert_path(dir.path(), "client")).unwrap();

        let replacement = CertificateAuthority::new("kubernetes").unwrap();
        store::write_cert_and_key(
            dir.path(),
            "ca",
            replacement.ca_cert_pem(),
            replacement.ca_key_pem().unwrap(),
        )
        .unwrap();

        match materialize(&tree, dir.path(), &ctx()) {
            Err(PkiError::CertificateInvalid { base_name, .. }) => assert_eq!(base_name, "client"),
            other => panic!("expected CertificateInvalid, got {:?}", other),
        }
        assert_eq!(fs::read(cert_path(dir.path(), "client")).unwrap(), leaf_before);
    }

    #[test]
    fn changed_advertise_address_invalidates_apiserver() {
        let dir = TempDir::new().unwrap();
        let tree = default_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();

        let mut moved = ctx();
        moved.advertise_address = Some("192.168.10.99".parse().unwrap());
        match materialize(&tree, dir.path(), &moved) {
            Err(PkiError::CertificateInvalid { base_name, reason }) => {
                assert_eq!(base_name, "apiserver");
                assert!(reason.contains("192.168.10.99"));
            }
            other => panic!("expected CertificateInvalid, got {:?}", other),
        }
    }

    #[test]
    fn mismatched_leaf_key_is_invalid() {
        let dir = TempDir::new().unwrap();
        let tree = small_tree();
        materialize(&tree, dir.path(), &ctx()).unwrap();

        let stray = KeyPair::generate().unwrap();
        fs::write(key_path(dir.path(), "client"), stray.serialize_pem()).unwrap();

        assert!(matches!(
            materialize(&tree, dir.path(), &ctx()),
            Err(PkiError::CertificateInvalid { base_name, .. }) if base_name == "client"
        ));
    }

    #[test]
    fn orphan_authority_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        store::write_key(dir.path(), "ca", "not really a key").unwrap();

        assert!(matches!(
            materialize(&small_tree(), dir.path(), &ctx()),
            Err(PkiError::CertificateInvalid { base_name, .. }) if base_name == "ca"
        ));
    }

    #[test]
    fn invalid_context_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let result = materialize(&default_tree(), dir.path(), &ClusterContext::default());
        assert!(matches!(result, Err(PkiError::InvalidContext(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
