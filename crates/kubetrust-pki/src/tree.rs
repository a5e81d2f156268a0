//! Two-level certificate tree
//!
//! The registry is flattened into an arena of specs plus a name index.
//! Authorities are keyed by their registry name, and each authority owns
//! the ordered list of leaves it signs. Building the tree is pure: no
//! files are touched, so a broken registry never leaves partial state.

use std::collections::HashMap;

use crate::certs::CertSpec;
use crate::error::{PkiError, Result};

/// An authority together with the leaves it signs
#[derive(Debug, Clone, Copy)]
pub struct AuthorityEntry<'a> {
    /// The authority spec
    pub authority: &'a CertSpec,
    /// Leaves signed by it, in registry order
    pub leaves: &'a [usize],
    specs: &'a [CertSpec],
}

impl<'a> AuthorityEntry<'a> {
    /// Iterate the leaf specs under this authority
    pub fn leaf_specs(&self) -> impl Iterator<Item = &'a CertSpec> + 'a {
        let (specs, leaves) = (self.specs, self.leaves);
        leaves.iter().map(move |&i| &specs[i])
    }
}

#[derive(Debug, Clone)]
struct AuthorityNode {
    spec: usize,
    leaves: Vec<usize>,
}

/// Mapping from authority to the leaves it signs
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct CertificateTree {
    specs: Vec<CertSpec>,
    index: HashMap<String, usize>,
    authorities: Vec<AuthorityNode>,
}

impl CertificateTree {
    /// Build the tree from a flat registry
    ///
    /// Fails with [`PkiError::UnknownAuthorityReference`] when a leaf names
    /// an authority that is not in the registry, [`PkiError::DuplicateSpec`]
    /// when two specs share a name, and [`PkiError::NestedAuthority`] when a
    /// leaf's authority is not a root.
    pub fn build(registry: Vec<CertSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(registry.len());
        for (i, spec) in registry.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(PkiError::DuplicateSpec {
                    name: spec.name.clone(),
                });
            }
        }

        let mut authorities: Vec<AuthorityNode> = Vec::new();
        let mut node_of: HashMap<usize, usize> = HashMap::new();
        for (i, spec) in registry.iter().enumerate() {
            if spec.is_authority() {
                node_of.insert(i, authorities.len());
                authorities.push(AuthorityNode {
                    spec: i,
                    leaves: Vec::new(),
                });
            }
        }

        for (i, spec) in registry.iter().enumerate() {
            if spec.is_authority() {
                continue;
            }
            let ca = *index
                .get(&spec.ca_name)
                .ok_or_else(|| PkiError::UnknownAuthorityReference {
                    leaf_name: spec.name.clone(),
                    ca_name: spec.ca_name.clone(),
                })?;
            let node = *node_of.get(&ca).ok_or_else(|| PkiError::NestedAuthority {
                name: spec.name.clone(),
                ca_name: spec.ca_name.clone(),
            })?;
            authorities[node].leaves.push(i);
        }

        Ok(Self {
            specs: registry,
            index,
            authorities,
        })
    }

    /// Authorities in registry order, each with its leaves
    pub fn authorities(&self) -> impl Iterator<Item = AuthorityEntry<'_>> {
        self.authorities.iter().map(move |node| AuthorityEntry {
            authority: &self.specs[node.spec],
            leaves: &node.leaves,
            specs: &self.specs,
        })
    }

    /// Look up an authority by name
    pub fn authority(&self, name: &str) -> Option<AuthorityEntry<'_>> {
        self.authorities().find(|entry| entry.authority.name == name)
    }

    /// Look up any spec by name
    pub fn get(&self, name: &str) -> Option<&CertSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    /// All specs in registry order
    pub fn specs(&self) -> &[CertSpec] {
        &self.specs
    }

    /// Number of authorities
    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    /// Whether the tree has no authorities
    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }
}
