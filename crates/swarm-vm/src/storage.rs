//! Storage backends.
//!
//! A storage is an addressable mapping from fully-qualified location names
//! to references plus a type index: `typify` pins a location's type so later
//! stores are checked against it. [`LocalStorage`] is per-VM and copied into
//! job clones wholesale. [`SharedStorage`] is process-wide: its maps live in
//! `DashMap`s behind `Arc`s, and a per-location lock table arbitrates
//! `Lock`/`Unlock`; an acquire on a held location fails and the VM retries
//! with cooperative yielding.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use swarm_core::types::Type;
use swarm_isa::{Location, Reference};

use crate::error::{RuntimeError, RuntimeExCode, VmError};

fn check_type(loc: &Location, value: &Reference, expected: Option<&Type>) -> Result<(), VmError> {
    if let Some(expected) = expected {
        let actual = value.type_of();
        if !actual.is_assignable_to(expected) {
            return Err(RuntimeError::new(
                RuntimeExCode::InvalidArgumentType,
                format!("cannot store {actual} into {loc} typified as {expected}"),
            )
            .into());
        }
    }
    Ok(())
}

/// Per-VM storage for local, object-prop, and primitive locations.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    map: HashMap<String, Reference>,
    types: HashMap<String, Type>,
}

impl LocalStorage {
    pub fn new() -> Self {
        LocalStorage::default()
    }

    pub fn has(&self, loc: &Location) -> bool {
        self.map.contains_key(&loc.fq_name())
    }

    pub fn load(&self, loc: &Location) -> Option<Reference> {
        self.map.get(&loc.fq_name()).cloned()
    }

    pub fn store(&mut self, loc: &Location, value: Reference) -> Result<(), VmError> {
        check_type(loc, &value, self.types.get(&loc.fq_name()))?;
        self.map.insert(loc.fq_name(), value);
        Ok(())
    }

    pub fn typify(&mut self, loc: &Location, ty: Type) {
        self.types.insert(loc.fq_name(), ty);
    }

    /// The first cell whose fully-qualified name starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<Reference> {
        self.map
            .iter()
            .find(|(name, _)| name.starts_with(prefix))
            .map(|(_, v)| v.clone())
    }
}

/// Process-wide storage for shared locations, plus its lock table.
#[derive(Debug, Clone, Default)]
pub struct SharedStorage {
    map: Arc<DashMap<String, Reference>>,
    types: Arc<DashMap<String, Type>>,
    /// Location name → owner id of the holder.
    locks: Arc<DashMap<String, String>>,
}

impl SharedStorage {
    pub fn new() -> Self {
        SharedStorage::default()
    }

    pub fn has(&self, loc: &Location) -> bool {
        self.map.contains_key(&loc.fq_name())
    }

    pub fn load(&self, loc: &Location) -> Option<Reference> {
        self.map.get(&loc.fq_name()).map(|r| r.clone())
    }

    pub fn store(&mut self, loc: &Location, value: Reference) -> Result<(), VmError> {
        let expected = self.types.get(&loc.fq_name()).map(|t| t.clone());
        check_type(loc, &value, expected.as_ref())?;
        self.map.insert(loc.fq_name(), value);
        Ok(())
    }

    pub fn typify(&mut self, loc: &Location, ty: Type) {
        self.types.insert(loc.fq_name(), ty);
    }

    /// The first cell whose fully-qualified name starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<Reference> {
        self.map
            .iter()
            .find(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.value().clone())
    }

    /// Try to take the per-location mutex. Fails when any other owner holds
    /// it; re-acquisition by the same owner succeeds idempotently.
    pub fn acquire(&self, loc: &Location, owner: &str) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.locks.entry(loc.fq_name()) {
            Entry::Vacant(e) => {
                e.insert(owner.to_string());
                true
            }
            Entry::Occupied(e) => e.get() == owner,
        }
    }

    pub fn release(&self, loc: &Location, owner: &str) {
        self.locks
            .remove_if(&loc.fq_name(), |_, held_by| held_by == owner);
    }

    /// Fails while any lock is held.
    pub fn clear(&mut self) -> Result<(), VmError> {
        if !self.locks.is_empty() {
            return Err(VmError::Internal(
                "attempted to clear shared storage with live locks".into(),
            ));
        }
        self.map.clear();
        self.types.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typify_enforces_stores() {
        let mut store = LocalStorage::new();
        let loc = Location::local("x");
        store.typify(&loc, Type::number());
        assert!(store.store(&loc, Reference::Number(3.0)).is_ok());
        let err = store.store(&loc, Reference::Boolean(true));
        assert!(matches!(
            err,
            Err(VmError::Runtime(RuntimeError {
                code: RuntimeExCode::InvalidArgumentType,
                ..
            }))
        ));
    }

    #[test]
    fn shared_locks_are_exclusive_but_reentrant_for_owner() {
        let store = SharedStorage::new();
        let loc = Location::shared("var_c_1");
        assert!(store.acquire(&loc, "a"));
        assert!(!store.acquire(&loc, "b"));
        assert!(store.acquire(&loc, "a"), "same owner re-acquires");
        store.release(&loc, "b");
        assert!(!store.acquire(&loc, "b"), "release by non-owner is a no-op");
        store.release(&loc, "a");
        assert!(store.acquire(&loc, "b"));
    }

    #[test]
    fn clear_refuses_with_held_locks() {
        let mut store = SharedStorage::new();
        let loc = Location::shared("var_c_1");
        store.store(&loc, Reference::Number(1.0)).unwrap();
        assert!(store.acquire(&loc, "a"));
        assert!(store.clear().is_err());
        store.release(&loc, "a");
        assert!(store.clear().is_ok());
        assert!(!store.has(&loc));
    }
}
