//! blockstore-upgrade: one-time migration of block-storage control-plane resources
//!
//! The upgrade walks the volumes, engines and backups of a namespace, repairs
//! the invariants the new version assumes, and leaves the corrected records
//! in a [`ResourceCache`] for the caller to persist with
//! [`ResourceCache::flush`].

pub mod cache;
pub mod error;
pub mod migration;
pub mod progress;
pub mod store;
pub mod types;

pub use cache::ResourceCache;
pub use error::{Error, Result};
pub use migration::{check_invariants, upgrade_resources, StepReport, UpgradeSummary, Violation};
pub use progress::ProgressMonitor;
pub use store::{JsonFileStore, JsonStoreConfig, MemoryStore, ResourceStore};
pub use types::{Backup, BackupState, Engine, InstanceState, ResourceKind, Volume};
