//! Local inventory persistence.
//!
//! The sync engine only talks to the store through these traits, so the
//! SQLite store used by the daemon and the in-memory store used by
//! `--ephemeral` runs and tests are interchangeable.

mod error;
mod memory;
mod sqlite;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ResourceKind, ResourceRow};
use crate::provider::SysInfo;

/// In-place row edit applied by [`ResourceStore::update`].
pub type Mutator = Box<dyn FnOnce(&mut ResourceRow) + Send>;

/// Connection status of a provider account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Init,
    Connected,
    Disconnected,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Init => "init",
            ProviderStatus::Connected => "connected",
            ProviderStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "init" => Ok(ProviderStatus::Init),
            "connected" => Ok(ProviderStatus::Connected),
            "disconnected" => Ok(ProviderStatus::Disconnected),
            other => Err(StoreError::Internal(format!(
                "unknown provider status: {other}"
            ))),
        }
    }
}

/// A provider account as recorded locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub status: ProviderStatus,
    pub status_reason: String,
    pub sys_info: Option<SysInfo>,
    pub last_sync_started_at: Option<String>,
    pub last_sync_finished_at: Option<String>,
}

/// Store trait for synced resource rows.
///
/// Listing and lookups never return soft-deleted rows.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a row by local id.
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceRow>>;

    /// Find a row of `kind` by its external id, under any parent of the
    /// provider.
    async fn find_by_external_id(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        external_id: &str,
    ) -> Result<Option<ResourceRow>>;

    /// Rows of `kind` owned by `parent_id`, oldest first.
    async fn list_children(&self, kind: ResourceKind, parent_id: &str) -> Result<Vec<ResourceRow>>;

    /// Insert a new row. Fails with `Conflict` if the id exists.
    async fn insert_resource(&self, row: &ResourceRow) -> Result<()>;

    /// Soft-delete a row. Returns false if it was already gone.
    async fn soft_delete(&self, id: &str) -> Result<bool>;

    /// Read-modify-write a row atomically and return the new version.
    async fn update_resource(&self, id: &str, mutator: Mutator) -> Result<ResourceRow>;
}

/// Store trait for provider records.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Create the provider record if missing, otherwise refresh its name.
    async fn upsert_provider(&self, id: &str, name: &str) -> Result<ProviderRecord>;

    async fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>>;

    async fn mark_sync_started(&self, id: &str) -> Result<()>;

    async fn mark_sync_finished(&self, id: &str) -> Result<()>;

    async fn set_provider_status(&self, id: &str, status: ProviderStatus, reason: &str)
    -> Result<()>;

    async fn save_sys_info(&self, id: &str, info: &SysInfo) -> Result<()>;
}

/// Combined store used by the sync engine.
pub trait DataStore: ResourceStore + ProviderStore {}

impl<T: ResourceStore + ProviderStore> DataStore for T {}
