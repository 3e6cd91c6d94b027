//! Engine record repairs: drop the deprecated backup status and restore
//! the one-active-engine-per-volume invariant

use super::StepReport;
use crate::cache::ResourceCache;
use crate::error::Result;
use crate::progress::ProgressMonitor;
use crate::store::ResourceStore;
use crate::types::{Engine, Volume};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Clear `status.backupStatus` on every engine
pub fn remove_engine_backup_status(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
) -> Result<StepReport> {
    let engines = cache.list_and_cache::<Engine>(store, namespace)?;

    let mut progress = ProgressMonitor::new("removeEngineBackupStatus", 0, engines.len());
    let mut changed = 0;
    for engine in engines.values_mut() {
        progress.inc();
        if engine.status.backup_status.take().is_some() {
            changed += 1;
        }
    }

    let mut report = StepReport::new("removeEngineBackupStatus", progress.current());
    report.changed = changed;
    Ok(report)
}

/// Pick the engine a volume should treat as active.
///
/// The first engine, in name order, whose node is any of the volume's
/// desired, current or pending nodes wins. Empty node fields never match.
pub fn select_active_engine<'a>(engines: &[&'a Engine], volume: &Volume) -> Option<&'a Engine> {
    let nodes = volume.node_affinity();
    engines.iter().copied().find(|engine| {
        nodes
            .iter()
            .any(|node_id| !node_id.is_empty() && *node_id == engine.spec.node_id)
    })
}

/// Engine names grouped by volume; engines without a volume are left out
fn group_by_volume(cache: &ResourceCache) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for engine in cache.iter::<Engine>() {
        if engine.spec.volume_name.is_empty() {
            debug!(engine = %engine.name, "Orphan engine has no volume, leaving it alone");
            continue;
        }
        groups
            .entry(engine.spec.volume_name.clone())
            .or_default()
            .push(engine.name.clone());
    }
    groups
}

/// Decide which engine of a group becomes active, if any.
///
/// Returns `Ok(None)` both when the group needs no change and when no engine
/// can be chosen; the caller tells them apart by `unresolved`.
fn resolve_group(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
    volume_name: &str,
    engine_names: &[String],
    unresolved: &mut Vec<String>,
) -> Result<Option<String>> {
    let engines: Vec<&Engine> = engine_names
        .iter()
        .filter_map(|name| cache.find::<Engine>(name))
        .collect();

    if engines.iter().any(|e| e.spec.active) {
        debug!(volume = volume_name, "Volume already has an active engine");
        return Ok(None);
    }
    if let [engine] = engines.as_slice() {
        return Ok(Some(engine.name.clone()));
    }

    let volume = match cache.get::<Volume>(store, namespace, volume_name) {
        Ok(volume) => volume.clone(),
        Err(e) if e.is_not_found() => {
            error!(
                volume = volume_name,
                "Failed to get the current engine for volume during upgrade: volume not found, will ignore it and continue"
            );
            unresolved.push(volume_name.to_string());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let engines: Vec<&Engine> = engine_names
        .iter()
        .filter_map(|name| cache.find::<Engine>(name))
        .collect();
    match select_active_engine(&engines, &volume) {
        Some(engine) => Ok(Some(engine.name.clone())),
        None => {
            error!(
                volume = volume_name,
                engines = engine_names.len(),
                "Failed to get the current engine for volume during upgrade, will ignore it and continue"
            );
            unresolved.push(volume_name.to_string());
            Ok(None)
        }
    }
}

/// Mark exactly one engine active for every volume that has none.
///
/// Groups that already contain an active engine are left as they are, even
/// when more than one engine is active. Volumes whose engine cannot be
/// determined are logged and reported in `unresolved`; they do not fail the step.
pub fn reconcile_active_engines(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
) -> Result<StepReport> {
    cache.list_and_cache::<Engine>(store, namespace)?;
    let groups = group_by_volume(cache);

    let mut progress = ProgressMonitor::new("reconcileActiveEngines", 0, groups.len());
    let mut unresolved = Vec::new();
    let mut changed = 0;
    for (volume_name, engine_names) in &groups {
        progress.inc();
        let selected = resolve_group(
            namespace,
            store,
            cache,
            volume_name,
            engine_names,
            &mut unresolved,
        )?;
        let Some(name) = selected else {
            continue;
        };
        if let Some(engine) = cache.find_mut::<Engine>(&name) {
            debug!(volume = %volume_name, engine = %engine.name, "Marking engine active");
            engine.spec.active = true;
            changed += 1;
        }
    }

    let mut report = StepReport::new("reconcileActiveEngines", progress.current());
    report.changed = changed;
    report.unresolved = unresolved;
    info!(
        volumes = report.processed,
        activated = report.changed,
        unresolved = report.unresolved.len(),
        "Active engines reconciled"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{EngineBackupStatus, ResourceKind};

    const NS: &str = "blockstore-system";

    fn engine_on(name: &str, volume: &str, node: &str) -> Engine {
        let mut engine = Engine::new(name, volume);
        engine.spec.node_id = node.to_string();
        engine
    }

    fn active(cache: &ResourceCache, name: &str) -> bool {
        cache.find::<Engine>(name).unwrap().spec.active
    }

    #[test]
    fn test_select_active_engine_first_engine_matching_any_node() {
        let e1 = engine_on("e1", "v1", "n1");
        let e2 = engine_on("e2", "v1", "n2");
        let e3 = engine_on("e3", "v1", "n3");
        let engines = [&e1, &e2, &e3];

        // Desired node points at e1, current at e2: name order decides
        let mut volume = Volume::new("v1");
        volume.spec.node_id = "n1".to_string();
        volume.status.current_node_id = "n2".to_string();
        assert_eq!(select_active_engine(&engines, &volume), Some(&e1));

        volume.spec.node_id.clear();
        volume.status.pending_node_id = "n3".to_string();
        assert_eq!(select_active_engine(&engines, &volume), Some(&e2));

        volume.status.current_node_id.clear();
        assert_eq!(select_active_engine(&engines, &volume), Some(&e3));

        volume.status.pending_node_id = "n9".to_string();
        assert_eq!(select_active_engine(&engines, &volume), None);
    }

    #[test]
    fn test_desired_node_match_wins_over_current_node_in_name_order() {
        let store = MemoryStore::new();
        let mut volume = Volume::new("v1");
        volume.spec.node_id = "n1".to_string();
        volume.status.current_node_id = "n2".to_string();
        store.insert(NS, &volume).unwrap();
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &engine_on("e2", "v1", "n2")).unwrap();

        let mut cache = ResourceCache::new();
        reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert!(active(&cache, "e1"));
        assert!(!active(&cache, "e2"));
    }

    #[test]
    fn test_empty_node_ids_never_match() {
        let e1 = engine_on("e1", "v1", "");
        let e2 = engine_on("e2", "v1", "");
        assert_eq!(select_active_engine(&[&e1, &e2], &Volume::new("v1")), None);
    }

    #[test]
    fn test_remove_engine_backup_status() {
        let store = MemoryStore::new();
        let mut e1 = Engine::new("e1", "v1");
        e1.status.backup_status = Some(
            [("b1".to_string(), EngineBackupStatus::default())]
                .into_iter()
                .collect(),
        );
        store.insert(NS, &e1).unwrap();
        store.insert(NS, &Engine::new("e2", "v2")).unwrap();

        let mut cache = ResourceCache::new();
        let report = remove_engine_backup_status(NS, &store, &mut cache).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.changed, 1);
        assert!(cache.iter::<Engine>().all(|e| e.status.backup_status.is_none()));
    }

    #[test]
    fn test_single_engine_becomes_active() {
        let store = MemoryStore::new();
        store.insert(NS, &Engine::new("e1", "v1")).unwrap();

        let mut cache = ResourceCache::new();
        let report = reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert!(active(&cache, "e1"));
        assert_eq!(report.changed, 1);
        assert_eq!(store.calls(ResourceKind::Volume, crate::store::StoreOp::Get), 0);
    }

    #[test]
    fn test_tie_break_by_current_node() {
        let store = MemoryStore::new();
        let mut volume = Volume::new("v1");
        volume.status.current_node_id = "n2".to_string();
        store.insert(NS, &volume).unwrap();
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &engine_on("e2", "v1", "n2")).unwrap();

        let mut cache = ResourceCache::new();
        reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert!(!active(&cache, "e1"));
        assert!(active(&cache, "e2"));
    }

    #[test]
    fn test_existing_active_engines_untouched() {
        let store = MemoryStore::new();
        let mut volume = Volume::new("v1");
        volume.status.current_node_id = "n1".to_string();
        store.insert(NS, &volume).unwrap();
        let mut e2 = engine_on("e2", "v1", "n2");
        e2.spec.active = true;
        let mut e3 = engine_on("e3", "v1", "n3");
        e3.spec.active = true;
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &e2).unwrap();
        store.insert(NS, &e3).unwrap();

        let mut cache = ResourceCache::new();
        let report = reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert_eq!(report.changed, 0);
        assert!(!active(&cache, "e1"));
        assert!(active(&cache, "e2"));
        assert!(active(&cache, "e3"));
    }

    #[test]
    fn test_unresolvable_volume_does_not_block_others() {
        let store = MemoryStore::new();
        store.insert(NS, &Volume::new("v1")).unwrap();
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &engine_on("e2", "v1", "n2")).unwrap();
        store.insert(NS, &Engine::new("e3", "v2")).unwrap();

        let mut cache = ResourceCache::new();
        let report = reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert!(!active(&cache, "e1"));
        assert!(!active(&cache, "e2"));
        assert!(active(&cache, "e3"));
        assert_eq!(report.unresolved, vec!["v1".to_string()]);
    }

    #[test]
    fn test_missing_volume_is_unresolved() {
        let store = MemoryStore::new();
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &engine_on("e2", "v1", "n2")).unwrap();

        let mut cache = ResourceCache::new();
        let report = reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert_eq!(report.unresolved, vec!["v1".to_string()]);
        assert_eq!(report.changed, 0);
    }

    #[test]
    fn test_orphan_engine_ignored() {
        let store = MemoryStore::new();
        store.insert(NS, &Engine::new("orphan", "")).unwrap();

        let mut cache = ResourceCache::new();
        let report = reconcile_active_engines(NS, &store, &mut cache).unwrap();
        assert_eq!(report.processed, 0);
        assert!(!active(&cache, "orphan"));
    }

    #[test]
    fn test_volume_store_failure_propagates() {
        let store = MemoryStore::new();
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &engine_on("e2", "v1", "n2")).unwrap();
        store.fail_on(ResourceKind::Volume);

        let mut cache = ResourceCache::new();
        assert!(reconcile_active_engines(NS, &store, &mut cache).is_err());
    }

    #[test]
    fn test_running_twice_is_idempotent() {
        let store = MemoryStore::new();
        let mut volume = Volume::new("v1");
        volume.status.current_node_id = "n2".to_string();
        store.insert(NS, &volume).unwrap();
        store.insert(NS, &engine_on("e1", "v1", "n1")).unwrap();
        store.insert(NS, &engine_on("e2", "v1", "n2")).unwrap();

        let mut cache = ResourceCache::new();
        reconcile_active_engines(NS, &store, &mut cache).unwrap();
        let first: Vec<Engine> = cache.iter::<Engine>().cloned().collect();

        let report = reconcile_active_engines(NS, &store, &mut cache).unwrap();
        let second: Vec<Engine> = cache.iter::<Engine>().cloned().collect();
        assert_eq!(first, second);
        assert_eq!(report.changed, 0);
    }
}
