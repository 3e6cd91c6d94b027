//! Directory-backed JSON store

use super::{decode_all, decode_one, replace, RawObjects, ResourceStore};
use crate::error::{Error, Result};
use crate::types::{Resource, ResourceKind};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Configuration for the JSON file store
#[derive(Debug, Clone)]
pub struct JsonStoreConfig {
    /// Directory holding one subdirectory per namespace
    /// (e.g., /var/lib/blockstore/resources)
    pub root: PathBuf,
}

impl Default for JsonStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/blockstore/resources"),
        }
    }
}

/// Store that keeps each kind of resource in one JSON file per namespace
///
/// Layout is `<root>/<namespace>/<kind>.json`, where each file is an object
/// mapping resource name to record. A missing file is an empty collection.
pub struct JsonFileStore {
    config: JsonStoreConfig,
}

impl JsonFileStore {
    /// Create a store with the default configuration
    pub fn new() -> Self {
        Self::with_config(JsonStoreConfig::default())
    }

    pub fn with_config(config: JsonStoreConfig) -> Self {
        Self { config }
    }

    /// Create or replace a resource
    pub fn insert<R: Resource>(&self, namespace: &str, resource: &R) -> Result<()> {
        let mut objects = self.load(namespace, R::KIND)?;
        objects.insert(resource.name().to_string(), serde_json::to_value(resource)?);
        self.save(namespace, R::KIND, &objects)
    }

    /// Get the file path for a kind within a namespace
    fn kind_file(&self, namespace: &str, kind: ResourceKind) -> PathBuf {
        self.config
            .root
            .join(namespace)
            .join(format!("{}.json", kind.plural()))
    }

    fn load(&self, namespace: &str, kind: ResourceKind) -> Result<RawObjects> {
        let path = self.kind_file(namespace, kind);
        if !path.exists() {
            debug!(path = %path.display(), "No resource file, treating as empty");
            return Ok(RawObjects::new());
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Store(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    fn save(&self, namespace: &str, kind: ResourceKind, objects: &RawObjects) -> Result<()> {
        let path = self.kind_file(namespace, kind);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(objects)?;
        fs::write(&path, content)?;
        Ok(())
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for JsonFileStore {
    fn list<R: Resource>(&self, namespace: &str) -> Result<Vec<R>> {
        decode_all(&self.load(namespace, R::KIND)?)
    }

    fn get<R: Resource>(&self, namespace: &str, name: &str) -> Result<R> {
        decode_one(&self.load(namespace, R::KIND)?, name)
    }

    fn update<R: Resource>(&self, namespace: &str, resource: &R) -> Result<()> {
        let mut objects = self.load(namespace, R::KIND)?;
        replace(&mut objects, resource)?;
        self.save(namespace, R::KIND, &objects)
    }

    /// Rewrite the kind file once for the whole batch; nothing is written
    /// if any record is missing
    fn update_all<R: Resource>(&self, namespace: &str, resources: &[&R]) -> Result<()> {
        let mut objects = self.load(namespace, R::KIND)?;
        for resource in resources {
            replace(&mut objects, *resource)?;
        }
        self.save(namespace, R::KIND, &objects)
    }
}
