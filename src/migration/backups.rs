//! Copy in-flight backup status from engines onto backup records

use super::StepReport;
use crate::cache::ResourceCache;
use crate::error::Result;
use crate::progress::ProgressMonitor;
use crate::store::ResourceStore;
use crate::types::{Backup, Engine, EngineBackupStatus, Volume};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Outcome of picking the engine that drives a backup
#[derive(Debug, PartialEq, Eq)]
pub enum EngineSelection<'a> {
    /// No engine belongs to the backup's volume
    NoCandidates,
    /// Several engines, but the volume record is absent
    VolumeMissing,
    /// Several engines, none running on the volume's current node
    NoneRunningOnCurrentNode,
    Selected(&'a Engine),
}

/// Pick the engine whose backup status is authoritative for a volume.
///
/// A lone engine is taken as-is. With several, only the one desired and
/// observed running on the volume's current node qualifies.
pub fn select_backup_engine<'a>(
    candidates: &[&'a Engine],
    volume: Option<&Volume>,
) -> EngineSelection<'a> {
    match candidates {
        [] => EngineSelection::NoCandidates,
        [engine] => EngineSelection::Selected(*engine),
        _ => {
            let Some(volume) = volume else {
                return EngineSelection::VolumeMissing;
            };
            candidates
                .iter()
                .copied()
                .find(|e| e.is_running_on(&volume.status.current_node_id))
                .map_or(EngineSelection::NoneRunningOnCurrentNode, |e| {
                    EngineSelection::Selected(e)
                })
        }
    }
}

/// Engines grouped by the volume they serve; orphans are left out
fn engines_by_volume(cache: &ResourceCache) -> BTreeMap<&str, Vec<&Engine>> {
    let mut index: BTreeMap<&str, Vec<&Engine>> = BTreeMap::new();
    for engine in cache.iter::<Engine>() {
        if engine.spec.volume_name.is_empty() {
            continue;
        }
        index
            .entry(engine.spec.volume_name.as_str())
            .or_default()
            .push(engine);
    }
    index
}

/// The engine-observed status to copy onto `backup`, if any
fn observed_status(
    backup: &Backup,
    index: &BTreeMap<&str, Vec<&Engine>>,
    cache: &ResourceCache,
) -> Option<EngineBackupStatus> {
    let Some(volume_name) = backup.volume_name() else {
        debug!(backup = %backup.name, "Backup has no volume label, skipping");
        return None;
    };

    let candidates = index.get(volume_name).map_or(&[][..], Vec::as_slice);
    let engine = match select_backup_engine(candidates, cache.find::<Volume>(volume_name)) {
        EngineSelection::Selected(engine) => engine,
        other => {
            debug!(backup = %backup.name, volume = volume_name, outcome = ?other, "No engine selected for backup");
            return None;
        }
    };

    match engine.backup_status(&backup.name) {
        Some(status) => Some(status.clone()),
        None => {
            debug!(backup = %backup.name, engine = %engine.name, "Engine holds no status for backup");
            None
        }
    }
}

/// Propagate each engine's view of a backup onto the backup record
pub fn reconcile_backup_status(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
) -> Result<StepReport> {
    cache.list_and_cache::<Backup>(store, namespace)?;
    cache.list_and_cache::<Engine>(store, namespace)?;
    cache.list_and_cache::<Volume>(store, namespace)?;

    let mut progress =
        ProgressMonitor::new("reconcileBackupStatus", 0, cache.len::<Backup>());

    let updates: Vec<(String, EngineBackupStatus)> = {
        let snapshot: &ResourceCache = cache;
        let index = engines_by_volume(snapshot);
        snapshot
            .iter::<Backup>()
            .filter_map(|backup| {
                progress.inc();
                observed_status(backup, &index, snapshot)
                    .map(|status| (backup.name.clone(), status))
            })
            .collect()
    };

    let mut report = StepReport::new("reconcileBackupStatus", progress.current());
    for (name, status) in updates {
        if let Some(backup) = cache.find_mut::<Backup>(&name) {
            backup.apply_engine_status(&status);
            report.changed += 1;
        }
    }

    info!(
        processed = report.processed,
        updated = report.changed,
        "Backup status reconciled"
    );
    Ok(report)
}
