//! Read-only checks of the post-upgrade invariants

use crate::cache::ResourceCache;
use crate::types::Engine;
use std::collections::BTreeMap;
use std::fmt;

/// A cached resource that breaks an invariant the new version relies on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A volume has engines but none is active
    NoActiveEngine { volume: String },
    /// A volume has more than one active engine
    MultipleActiveEngines { volume: String, engines: Vec<String> },
    /// An engine still carries the deprecated backup status
    StaleBackupStatus { engine: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NoActiveEngine { volume } => {
                write!(f, "volume '{}' has no active engine", volume)
            }
            Violation::MultipleActiveEngines { volume, engines } => write!(
                f,
                "volume '{}' has {} active engines: {}",
                volume,
                engines.len(),
                engines.join(", ")
            ),
            Violation::StaleBackupStatus { engine } => {
                write!(f, "engine '{}' still carries backup status", engine)
            }
        }
    }
}

/// Check the cached engines against the post-upgrade invariants.
///
/// Engines without a volume are not checked.
pub fn check_invariants(cache: &ResourceCache) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut active_by_volume: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for engine in cache.iter::<Engine>() {
        if engine.status.backup_status.is_some() {
            violations.push(Violation::StaleBackupStatus {
                engine: engine.name.clone(),
            });
        }
        if engine.spec.volume_name.is_empty() {
            continue;
        }
        let active = active_by_volume
            .entry(engine.spec.volume_name.as_str())
            .or_default();
        if engine.spec.active {
            active.push(engine.name.as_str());
        }
    }

    for (volume, active) in active_by_volume {
        match active.len() {
            0 => violations.push(Violation::NoActiveEngine {
                volume: volume.to_string(),
            }),
            1 => {}
            _ => violations.push(Violation::MultipleActiveEngines {
                volume: volume.to_string(),
                engines: active.into_iter().map(str::to_string).collect(),
            }),
        }
    }

    violations
}
