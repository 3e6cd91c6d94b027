//! Core resource types for the upgrade

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Label on a backup naming the volume it was taken from
pub const BACKUP_VOLUME_LABEL: &str = "blockstore.io/backup-volume";

/// The kinds of resource the upgrade touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Volume,
    Engine,
    Backup,
}

impl ResourceKind {
    /// All kinds, in flush order
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Volume,
        ResourceKind::Engine,
        ResourceKind::Backup,
    ];

    /// Singular name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "volume",
            ResourceKind::Engine => "engine",
            ResourceKind::Backup => "backup",
        }
    }

    /// Collection name used by stores
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "volumes",
            ResourceKind::Engine => "engines",
            ResourceKind::Backup => "backups",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "volume" | "volumes" => Ok(ResourceKind::Volume),
            "engine" | "engines" => Ok(ResourceKind::Engine),
            "backup" | "backups" => Ok(ResourceKind::Backup),
            _ => Err(format!(
                "Invalid resource kind '{}'. Must be volume, engine, or backup",
                s
            )),
        }
    }
}

/// Lifecycle state of an engine instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Running,
    Stopped,
    Starting,
    Stopping,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Canonical backup state recorded on backup resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupState {
    New,
    Pending,
    InProgress,
    Completed,
    Error,
    Unknown,
}

impl BackupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupState::New => "New",
            BackupState::Pending => "Pending",
            BackupState::InProgress => "InProgress",
            BackupState::Completed => "Completed",
            BackupState::Error => "Error",
            BackupState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map the state string an engine reports for a backup onto [`BackupState`].
///
/// Engines speak `in_progress`/`complete`/`error`. Values already in the
/// canonical vocabulary are accepted as-is; anything else is `Unknown`.
pub fn convert_engine_backup_state(state: &str) -> BackupState {
    match state {
        "in_progress" | "InProgress" => BackupState::InProgress,
        "complete" | "Completed" => BackupState::Completed,
        "error" | "Error" => BackupState::Error,
        "New" => BackupState::New,
        "Pending" => BackupState::Pending,
        _ => BackupState::Unknown,
    }
}

/// A record kept in the resource store
pub trait Resource: Clone + Serialize + DeserializeOwned {
    const KIND: ResourceKind;

    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);
}

// === Volume ===

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeSpec {
    /// Node the volume is desired to be attached to
    #[serde(rename = "nodeID")]
    pub node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeStatus {
    #[serde(rename = "currentNodeID")]
    pub current_node_id: String,
    #[serde(rename = "pendingNodeID")]
    pub pending_node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub spec: VolumeSpec,
    pub status: VolumeStatus,
}

impl Volume {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Node identifiers that can claim the volume's active engine
    pub fn node_affinity(&self) -> [&str; 3] {
        [
            self.status.current_node_id.as_str(),
            self.status.pending_node_id.as_str(),
            self.spec.node_id.as_str(),
        ]
    }
}

impl Resource for Volume {
    const KIND: ResourceKind = ResourceKind::Volume;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

// === Engine ===

/// Backup progress as observed by an engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineBackupStatus {
    pub progress: i32,
    #[serde(rename = "backupURL")]
    pub backup_url: String,
    pub error: String,
    pub snapshot_name: String,
    pub state: String,
    pub replica_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSpec {
    pub volume_name: String,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub desire_state: InstanceState,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineStatus {
    pub current_state: InstanceState,
    /// Deprecated; cleared by the upgrade
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_status: Option<BTreeMap<String, EngineBackupStatus>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Engine {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub spec: EngineSpec,
    pub status: EngineStatus,
}

impl Engine {
    pub fn new(name: impl Into<String>, volume_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: EngineSpec {
                volume_name: volume_name.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether the engine is desired and observed to be running on `node_id`
    pub fn is_running_on(&self, node_id: &str) -> bool {
        self.spec.node_id == node_id
            && self.spec.desire_state == InstanceState::Running
            && self.status.current_state == InstanceState::Running
    }

    /// The engine's view of a backup, if it has one
    pub fn backup_status(&self, backup_name: &str) -> Option<&EngineBackupStatus> {
        self.status.backup_status.as_ref()?.get(backup_name)
    }
}

impl Resource for Engine {
    const KIND: ResourceKind = ResourceKind::Engine;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

// === Backup ===

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupStatus {
    pub progress: i32,
    pub url: String,
    pub error: String,
    pub snapshot_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BackupState>,
    pub replica_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Backup {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub status: BackupStatus,
}

impl Backup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Name of the volume this backup belongs to, from its label
    pub fn volume_name(&self) -> Option<&str> {
        self.labels.get(BACKUP_VOLUME_LABEL).map(String::as_str)
    }

    /// Overwrite the transient status fields with an engine's observation
    pub fn apply_engine_status(&mut self, observed: &EngineBackupStatus) {
        self.status.progress = observed.progress;
        self.status.url = observed.backup_url.clone();
        self.status.error = observed.error.clone();
        self.status.snapshot_name = observed.snapshot_name.clone();
        self.status.state = Some(convert_engine_backup_state(&observed.state));
        self.status.replica_address = observed.replica_address.clone();
    }
}

impl Resource for Backup {
    const KIND: ResourceKind = ResourceKind::Backup;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_parse() {
        assert_eq!("engines".parse::<ResourceKind>(), Ok(ResourceKind::Engine));
        assert_eq!("Volume".parse::<ResourceKind>(), Ok(ResourceKind::Volume));
        assert!("replica".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::Backup.plural(), "backups");
        assert_eq!(ResourceKind::Backup.as_str(), "backup");
        assert_eq!(ResourceKind::Engine.to_string(), "engine");
    }

    #[test]
    fn test_convert_engine_backup_state() {
        assert_eq!(convert_engine_backup_state("in_progress"), BackupState::InProgress);
        assert_eq!(convert_engine_backup_state("complete"), BackupState::Completed);
        assert_eq!(convert_engine_backup_state("error"), BackupState::Error);
        assert_eq!(convert_engine_backup_state("InProgress"), BackupState::InProgress);
        assert_eq!(convert_engine_backup_state(""), BackupState::Unknown);
        assert_eq!(convert_engine_backup_state("garbage"), BackupState::Unknown);
    }

    #[test]
    fn test_engine_deserializes_with_defaults() {
        let engine: Engine = serde_json::from_str(
            r#"{
                "name": "e1",
                "spec": {"volumeName": "v1", "nodeID": "n1", "desireState": "running"},
                "status": {"currentState": "bogus", "backupStatus": {"b1": {"progress": 10}}}
            }"#,
        )
        .unwrap();

        assert_eq!(engine.spec.volume_name, "v1");
        assert!(!engine.spec.active);
        assert_eq!(engine.spec.desire_state, InstanceState::Running);
        assert_eq!(engine.status.current_state, InstanceState::Unknown);
        assert_eq!(engine.backup_status("b1").map(|s| s.progress), Some(10));
        assert!(engine.backup_status("b2").is_none());
    }

    #[test]
    fn test_cleared_backup_status_is_not_serialized() {
        let engine = Engine::new("e1", "v1");
        let json = serde_json::to_value(&engine).unwrap();
        assert!(json["status"].get("backupStatus").is_none());
    }

    #[test]
    fn test_apply_engine_status() {
        let mut backup = Backup::new("b1");
        backup.apply_engine_status(&EngineBackupStatus {
            progress: 100,
            backup_url: "s3://bucket/b1".to_string(),
            error: String::new(),
            snapshot_name: "snap-1".to_string(),
            state: "complete".to_string(),
            replica_address: "tcp://10.0.0.5:10000".to_string(),
        });

        assert_eq!(backup.status.progress, 100);
        assert_eq!(backup.status.url, "s3://bucket/b1");
        assert_eq!(backup.status.snapshot_name, "snap-1");
        assert_eq!(backup.status.state, Some(BackupState::Completed));
        assert_eq!(backup.status.replica_address, "tcp://10.0.0.5:10000");
    }

    #[test]
    fn test_volume_node_affinity() {
        let mut volume = Volume::new("v1");
        volume.spec.node_id = "desired".to_string();
        volume.status.current_node_id = "current".to_string();
        volume.status.pending_node_id = "pending".to_string();
        assert_eq!(volume.node_affinity(), ["current", "pending", "desired"]);
    }
}
