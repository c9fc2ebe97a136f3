//! Registry of live fencing domains.
//!
//! The registry owns every [`FenceDomain`]. Names are unique and compared
//! exactly (case-sensitive). Domains are kept in insertion order; the
//! daemon only ever has a handful, so lookups are a linear scan.

use super::FenceDomain;
use crate::constants::MAX_GROUPNAME_LEN;
use crate::error::DomainError;

/// Collection of fencing domains keyed by name.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: Vec<FenceDomain>,
}

impl DomainRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { domains: Vec::new() }
    }

    /// Create and register a domain named `name`.
    ///
    /// Fails with [`DomainError::Exists`] if the name is taken, leaving the
    /// existing domain untouched.
    pub fn create(&mut self, name: &str) -> Result<&mut FenceDomain, DomainError> {
        if name.len() > MAX_GROUPNAME_LEN {
            return Err(DomainError::NameTooLong {
                len: name.len(),
                max: MAX_GROUPNAME_LEN,
            });
        }
        if self.find(name).is_some() {
            return Err(DomainError::Exists(name.to_owned()));
        }
        self.domains.push(FenceDomain::new(name));
        let idx = self.domains.len() - 1;
        Ok(&mut self.domains[idx])
    }

    /// Look up a domain by exact name.
    pub fn find(&self, name: &str) -> Option<&FenceDomain> {
        self.domains.iter().find(|fd| fd.name() == name)
    }

    /// Look up a domain by exact name for mutation.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut FenceDomain> {
        self.domains.iter_mut().find(|fd| fd.name() == name)
    }

    /// Remove a domain, returning it so the caller decides when it drops.
    ///
    /// Dropping the returned domain releases its queued changes, history
    /// and node sets.
    pub fn destroy(&mut self, name: &str) -> Option<FenceDomain> {
        let idx = self.domains.iter().position(|fd| fd.name() == name)?;
        Some(self.domains.remove(idx))
    }

    /// Number of live domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// True if no domain is registered.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FenceDomain> {
        self.domains.iter()
    }

    /// Iterate mutably in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FenceDomain> {
        self.domains.iter_mut()
    }
}
