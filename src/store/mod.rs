//! Resource store trait and implementations

mod json_file;
mod memory;

pub use json_file::{JsonFileStore, JsonStoreConfig};
pub use memory::{MemoryStore, StoreOp};

use crate::error::{Error, Result};
use crate::types::Resource;
use serde_json::Value;
use std::collections::BTreeMap;

/// Trait defining the store operations the upgrade needs
///
/// The store holds the persisted copy of every resource. The upgrade only
/// reads through it while reconciling; writes happen when the caller flushes
/// the cache.
pub trait ResourceStore {
    /// List every resource of kind `R` in a namespace
    fn list<R: Resource>(&self, namespace: &str) -> Result<Vec<R>>;

    /// Get a single resource, failing with `NotFound` if it does not exist
    fn get<R: Resource>(&self, namespace: &str, name: &str) -> Result<R>;

    /// Replace an existing resource, failing with `NotFound` if it does not exist
    fn update<R: Resource>(&self, namespace: &str, resource: &R) -> Result<()>;

    /// Replace several existing resources of one kind.
    ///
    /// Stores that can batch writes should override this; the default
    /// updates one record at a time.
    fn update_all<R: Resource>(&self, namespace: &str, resources: &[&R]) -> Result<()> {
        for resource in resources {
            self.update(namespace, *resource)?;
        }
        Ok(())
    }
}

/// Records of a single kind, as stored: name -> raw JSON
type RawObjects = BTreeMap<String, Value>;

fn decode_all<R: Resource>(objects: &RawObjects) -> Result<Vec<R>> {
    objects
        .iter()
        .map(|(name, value)| decode_entry(name, value))
        .collect()
}

fn decode_one<R: Resource>(objects: &RawObjects, name: &str) -> Result<R> {
    let value = objects.get(name).ok_or_else(|| Error::NotFound {
        kind: R::KIND,
        name: name.to_string(),
    })?;
    decode_entry(name, value)
}

/// Decode a record stored under `key`. A record without a name takes the
/// key as its name; a record named differently from its key is rejected.
fn decode_entry<R: Resource>(key: &str, value: &Value) -> Result<R> {
    let mut resource: R = serde_json::from_value(value.clone())?;
    if resource.name().is_empty() {
        resource.set_name(key.to_string());
    } else if resource.name() != key {
        return Err(Error::Store(format!(
            "{} stored under '{}' is named '{}'",
            R::KIND,
            key,
            resource.name()
        )));
    }
    Ok(resource)
}

fn replace<R: Resource>(objects: &mut RawObjects, resource: &R) -> Result<()> {
    let slot = objects
        .get_mut(resource.name())
        .ok_or_else(|| Error::NotFound {
            kind: R::KIND,
            name: resource.name().to_string(),
        })?;
    *slot = serde_json::to_value(resource)?;
    Ok(())
}
