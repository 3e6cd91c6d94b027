//! The v1.2.2 -> v1.2.3 resource upgrade
//!
//! Backups are upgraded first, because they read the engine backup status
//! that the engine step then deletes. All changes stay in the
//! [`ResourceCache`]; persisting them is up to the caller.

mod backups;
mod check;
mod engines;

pub use backups::{reconcile_backup_status, select_backup_engine, EngineSelection};
pub use check::{check_invariants, Violation};
pub use engines::{reconcile_active_engines, remove_engine_backup_status, select_active_engine};

use crate::cache::ResourceCache;
use crate::error::Result;
use crate::store::ResourceStore;
use tracing::info;

/// Prefix for errors and logs of this upgrade
pub const UPGRADE_LOG_PREFIX: &str = "upgrade from v1.2.2 to v1.2.3: ";

/// What one reconciliation step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub step: &'static str,
    /// Items visited (backups, engines or volumes depending on the step)
    pub processed: usize,
    /// Resources modified in the cache
    pub changed: usize,
    /// Volumes the step could not repair
    pub unresolved: Vec<String>,
}

impl StepReport {
    pub fn new(step: &'static str, processed: usize) -> Self {
        Self {
            step,
            processed,
            ..Default::default()
        }
    }
}

/// Reports of every step of a completed upgrade
#[derive(Debug, Clone, Default)]
pub struct UpgradeSummary {
    pub steps: Vec<StepReport>,
}

impl UpgradeSummary {
    /// Total resources modified across all steps
    pub fn changed(&self) -> usize {
        self.steps.iter().map(|s| s.changed).sum()
    }

    /// Volumes whose active engine could not be determined
    pub fn unresolved_volumes(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.unresolved.iter().map(String::as_str))
            .collect()
    }

    /// Whether every volume could be repaired; dry runs and real runs
    /// report success the same way
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.unresolved.is_empty())
    }
}

/// Run the whole upgrade against the cached resources of a namespace
pub fn upgrade_resources(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
) -> Result<UpgradeSummary> {
    info!(namespace, "{}starting", UPGRADE_LOG_PREFIX);
    let mut summary = UpgradeSummary::default();

    summary.steps.push(
        upgrade_backups(namespace, store, cache)
            .map_err(|e| e.context(format!("{}upgrade backups failed", UPGRADE_LOG_PREFIX)))?,
    );
    summary.steps.extend(
        upgrade_engines(namespace, store, cache)
            .map_err(|e| e.context(format!("{}upgrade engines failed", UPGRADE_LOG_PREFIX)))?,
    );

    info!(
        namespace,
        changed = summary.changed(),
        unresolved = summary.unresolved_volumes().len(),
        "{}finished",
        UPGRADE_LOG_PREFIX
    );
    Ok(summary)
}

fn upgrade_backups(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
) -> Result<StepReport> {
    reconcile_backup_status(namespace, store, cache)
}

fn upgrade_engines(
    namespace: &str,
    store: &impl ResourceStore,
    cache: &mut ResourceCache,
) -> Result<Vec<StepReport>> {
    // The field removal and the active flag are separate passes
    let removed = remove_engine_backup_status(namespace, store, cache)?;
    let activated = reconcile_active_engines(namespace, store, cache)?;
    Ok(vec![removed, activated])
}
