//! In-memory store

use super::{decode_all, decode_one, replace, RawObjects, ResourceStore};
use crate::error::{Error, Result};
use crate::types::{Resource, ResourceKind};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Store operations, for call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    List,
    Get,
    Update,
}

/// In-memory store for tests and embedders
///
/// Records are held as raw JSON, the same as a real store would, so every
/// read hands back a fresh copy. Calls are counted per kind and operation,
/// and a kind can be marked as failing to simulate an unreachable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RefCell<BTreeMap<(String, ResourceKind), RawObjects>>,
    calls: RefCell<BTreeMap<(ResourceKind, StoreOp), usize>>,
    failing: RefCell<BTreeSet<ResourceKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a resource
    pub fn insert<R: Resource>(&self, namespace: &str, resource: &R) -> Result<()> {
        let value = serde_json::to_value(resource)?;
        self.objects
            .borrow_mut()
            .entry((namespace.to_string(), R::KIND))
            .or_default()
            .insert(resource.name().to_string(), value);
        Ok(())
    }

    /// Number of resources of a kind in a namespace
    pub fn count(&self, namespace: &str, kind: ResourceKind) -> usize {
        self.objects
            .borrow()
            .get(&(namespace.to_string(), kind))
            .map_or(0, |objects| objects.len())
    }

    /// Make every subsequent call for `kind` fail
    pub fn fail_on(&self, kind: ResourceKind) {
        self.failing.borrow_mut().insert(kind);
    }

    pub fn clear_failures(&self) {
        self.failing.borrow_mut().clear();
    }

    /// How many times `op` has been called for `kind`
    pub fn calls(&self, kind: ResourceKind, op: StoreOp) -> usize {
        self.calls.borrow().get(&(kind, op)).copied().unwrap_or(0)
    }

    fn record(&self, kind: ResourceKind, op: StoreOp) -> Result<()> {
        *self.calls.borrow_mut().entry((kind, op)).or_default() += 1;
        if self.failing.borrow().contains(&kind) {
            return Err(Error::Store(format!(
                "{} {} unavailable",
                kind.plural(),
                match op {
                    StoreOp::List => "list",
                    StoreOp::Get => "get",
                    StoreOp::Update => "update",
                }
            )));
        }
        Ok(())
    }
}

impl ResourceStore for MemoryStore {
    fn list<R: Resource>(&self, namespace: &str) -> Result<Vec<R>> {
        self.record(R::KIND, StoreOp::List)?;
        match self.objects.borrow().get(&(namespace.to_string(), R::KIND)) {
            Some(objects) => decode_all(objects),
            None => Ok(Vec::new()),
        }
    }

    fn get<R: Resource>(&self, namespace: &str, name: &str) -> Result<R> {
        self.record(R::KIND, StoreOp::Get)?;
        match self.objects.borrow().get(&(namespace.to_string(), R::KIND)) {
            Some(objects) => decode_one(objects, name),
            None => Err(Error::NotFound {
                kind: R::KIND,
                name: name.to_string(),
            }),
        }
    }

    fn update<R: Resource>(&self, namespace: &str, resource: &R) -> Result<()> {
        self.record(R::KIND, StoreOp::Update)?;
        let mut objects = self.objects.borrow_mut();
        match objects.get_mut(&(namespace.to_string(), R::KIND)) {
            Some(objects) => replace(objects, resource),
            None => Err(Error::NotFound {
                kind: R::KIND,
                name: resource.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Engine, Volume};

    const NS: &str = "blockstore-system";

    #[test]
    fn test_list_is_scoped_by_namespace() {
        let store = MemoryStore::new();
        store.insert(NS, &Volume::new("v1")).unwrap();
        store.insert("other", &Volume::new("v2")).unwrap();

        let volumes: Vec<Volume> = store.list(NS).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "v1");
        assert!(store.list::<Engine>(NS).unwrap().is_empty());
        assert_eq!(store.calls(ResourceKind::Volume, StoreOp::List), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get::<Volume>(NS, "v1").unwrap_err();
        assert!(err.is_not_found());

        store.insert(NS, &Volume::new("v1")).unwrap();
        assert!(store.get::<Volume>(NS, "v2").unwrap_err().is_not_found());
        assert_eq!(store.get::<Volume>(NS, "v1").unwrap().name, "v1");
    }

    #[test]
    fn test_update_requires_existing_record() {
        let store = MemoryStore::new();
        let mut engine = Engine::new("e1", "v1");
        assert!(store.update(NS, &engine).unwrap_err().is_not_found());

        store.insert(NS, &engine).unwrap();
        engine.spec.active = true;
        store.update(NS, &engine).unwrap();
        assert!(store.get::<Engine>(NS, "e1").unwrap().spec.active);
        assert_eq!(store.count(NS, ResourceKind::Engine), 1);
    }

    #[test]
    fn test_failure_injection() {
        let store = MemoryStore::new();
        store.insert(NS, &Volume::new("v1")).unwrap();
        store.fail_on(ResourceKind::Volume);

        let err = store.list::<Volume>(NS).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(store.list::<Engine>(NS).is_ok());

        store.clear_failures();
        assert!(store.list::<Volume>(NS).is_ok());
    }
}
