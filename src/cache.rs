//! In-memory resource cache shared by the upgrade steps
//!
//! Each kind is listed from the store at most once per run. Every step works
//! on the cached objects, so a change made by one step is seen by the next.
//! Nothing is written back until the caller calls [`ResourceCache::flush`].

use crate::error::{Error, Result};
use crate::store::ResourceStore;
use crate::types::{Backup, Engine, Resource, ResourceKind, Volume};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Cached objects of a single kind
#[derive(Debug)]
pub struct KindCache<R> {
    listed: bool,
    objects: BTreeMap<String, R>,
}

impl<R> Default for KindCache<R> {
    fn default() -> Self {
        Self {
            listed: false,
            objects: BTreeMap::new(),
        }
    }
}

/// Resource types that have a slot in [`ResourceCache`]
pub trait Cached: Resource {
    fn slot(cache: &ResourceCache) -> &KindCache<Self>;
    fn slot_mut(cache: &mut ResourceCache) -> &mut KindCache<Self>;
}

impl Cached for Volume {
    fn slot(cache: &ResourceCache) -> &KindCache<Self> {
        &cache.volumes
    }
    fn slot_mut(cache: &mut ResourceCache) -> &mut KindCache<Self> {
        &mut cache.volumes
    }
}

impl Cached for Engine {
    fn slot(cache: &ResourceCache) -> &KindCache<Self> {
        &cache.engines
    }
    fn slot_mut(cache: &mut ResourceCache) -> &mut KindCache<Self> {
        &mut cache.engines
    }
}

impl Cached for Backup {
    fn slot(cache: &ResourceCache) -> &KindCache<Self> {
        &cache.backups
    }
    fn slot_mut(cache: &mut ResourceCache) -> &mut KindCache<Self> {
        &mut cache.backups
    }
}

/// Typed cache of volumes, engines and backups for one upgrade run
#[derive(Debug, Default)]
pub struct ResourceCache {
    volumes: KindCache<Volume>,
    engines: KindCache<Engine>,
    backups: KindCache<Backup>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// List every resource of kind `R` into the cache, once.
    ///
    /// Objects already cached through [`get`](Self::get) or [`put`](Self::put)
    /// win over the listed copies so in-memory changes are never lost.
    pub fn list_and_cache<R: Cached>(
        &mut self,
        store: &impl ResourceStore,
        namespace: &str,
    ) -> Result<&mut BTreeMap<String, R>> {
        let slot = R::slot_mut(self);
        if !slot.listed {
            let listed = store.list::<R>(namespace)?;
            debug!(kind = %R::KIND, count = listed.len(), "Listed resources into cache");
            let mut seen = BTreeSet::new();
            for resource in &listed {
                if !seen.insert(resource.name()) {
                    return Err(Error::Store(format!(
                        "store listed {} '{}' more than once",
                        R::KIND,
                        resource.name()
                    )));
                }
            }
            for resource in listed {
                slot.objects
                    .entry(resource.name().to_string())
                    .or_insert(resource);
            }
            slot.listed = true;
        }
        Ok(&mut slot.objects)
    }

    /// Get a single resource, fetching it from the store if it is not cached
    pub fn get<R: Cached>(
        &mut self,
        store: &impl ResourceStore,
        namespace: &str,
        name: &str,
    ) -> Result<&mut R> {
        match R::slot_mut(self).objects.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let resource = store.get::<R>(namespace, name)?;
                Ok(entry.insert(resource))
            }
        }
    }

    /// Look up a cached resource without touching the store
    pub fn find<R: Cached>(&self, name: &str) -> Option<&R> {
        R::slot(self).objects.get(name)
    }

    pub fn find_mut<R: Cached>(&mut self, name: &str) -> Option<&mut R> {
        R::slot_mut(self).objects.get_mut(name)
    }

    /// Insert or replace a cached resource
    pub fn put<R: Cached>(&mut self, resource: R) {
        R::slot_mut(self)
            .objects
            .insert(resource.name().to_string(), resource);
    }

    /// Cached resources of kind `R`, in name order
    pub fn iter<'a, R: Cached + 'a>(&'a self) -> impl Iterator<Item = &'a R> {
        R::slot(self).objects.values()
    }

    pub fn len<R: Cached>(&self) -> usize {
        R::slot(self).objects.len()
    }

    /// Whether kind `R` has been listed from the store in this run
    pub fn is_listed<R: Cached>(&self) -> bool {
        R::slot(self).listed
    }

    /// Write every cached resource back to the store.
    ///
    /// Kinds are flushed in [`ResourceKind::ALL`] order. Returns the number
    /// of resources written.
    pub fn flush(&self, store: &impl ResourceStore, namespace: &str) -> Result<usize> {
        let mut written = 0;
        for kind in ResourceKind::ALL {
            written += match kind {
                ResourceKind::Volume => self.flush_kind::<Volume>(store, namespace)?,
                ResourceKind::Engine => self.flush_kind::<Engine>(store, namespace)?,
                ResourceKind::Backup => self.flush_kind::<Backup>(store, namespace)?,
            };
        }
        Ok(written)
    }

    fn flush_kind<R: Cached>(&self, store: &impl ResourceStore, namespace: &str) -> Result<usize> {
        let resources: Vec<&R> = self.iter::<R>().collect();
        if resources.is_empty() {
            return Ok(0);
        }
        store.update_all(namespace, &resources).map_err(|e| {
            Error::Store(format!("failed to update {}: {}", R::KIND.plural(), e))
        })?;
        Ok(resources.len())
    }
}
