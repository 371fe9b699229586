use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{Mutator, ProviderRecord, ProviderStatus, ProviderStore, ResourceStore, Result, StoreError};
use crate::model::{ResourceKind, ResourceRow};
use crate::provider::SysInfo;

#[derive(Default)]
struct Inner {
    /// Rows in insertion order.
    rows: Vec<ResourceRow>,
    index: HashMap<String, usize>,
    providers: HashMap<String, ProviderRecord>,
}

impl Inner {
    fn live(&self, id: &str) -> Option<&ResourceRow> {
        self.index
            .get(id)
            .map(|&i| &self.rows[i])
            .filter(|row| !row.deleted)
    }

    fn provider_mut(&mut self, id: &str) -> Result<&mut ProviderRecord> {
        self.providers
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("provider {id}")))
    }
}

/// Process-local store, used for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row including soft-deleted ones, in insertion order.
    pub async fn all_rows(&self) -> Vec<ResourceRow> {
        self.inner.read().await.rows.clone()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceRow>> {
        Ok(self.inner.read().await.live(id).cloned())
    }

    async fn find_by_external_id(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        external_id: &str,
    ) -> Result<Option<ResourceRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .iter()
            .find(|row| {
                !row.deleted
                    && row.kind == kind
                    && row.provider_id == provider_id
                    && row.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    async fn list_children(&self, kind: ResourceKind, parent_id: &str) -> Result<Vec<ResourceRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .iter()
            .filter(|row| !row.deleted && row.kind == kind && row.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn insert_resource(&self, row: &ResourceRow) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.index.contains_key(&row.id) {
            return Err(StoreError::Conflict(format!("resource {} exists", row.id)));
        }
        let pos = inner.rows.len();
        inner.index.insert(row.id.clone(), pos);
        inner.rows.push(row.clone());
        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(&pos) = inner.index.get(id) else {
            return Ok(false);
        };
        let row = &mut inner.rows[pos];
        if row.deleted {
            return Ok(false);
        }
        row.deleted = true;
        row.updated_at = Utc::now().to_rfc3339();
        Ok(true)
    }

    async fn update_resource(&self, id: &str, mutator: Mutator) -> Result<ResourceRow> {
        let mut inner = self.inner.write().await;
        let pos = match inner.index.get(id) {
            Some(&pos) if !inner.rows[pos].deleted => pos,
            _ => return Err(StoreError::NotFound(format!("resource {id}"))),
        };
        let mut row = inner.rows[pos].clone();
        mutator(&mut row);
        // identity is not editable
        row.id = id.to_string();
        inner.rows[pos] = row.clone();
        Ok(row)
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn upsert_provider(&self, id: &str, name: &str) -> Result<ProviderRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .providers
            .entry(id.to_string())
            .or_insert_with(|| ProviderRecord {
                id: id.to_string(),
                name: name.to_string(),
                status: ProviderStatus::Init,
                status_reason: String::new(),
                sys_info: None,
                last_sync_started_at: None,
                last_sync_finished_at: None,
            });
        record.name = name.to_string();
        Ok(record.clone())
    }

    async fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>> {
        Ok(self.inner.read().await.providers.get(id).cloned())
    }

    async fn mark_sync_started(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.provider_mut(id)?.last_sync_started_at = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    async fn mark_sync_finished(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.provider_mut(id)?.last_sync_finished_at = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    async fn set_provider_status(
        &self,
        id: &str,
        status: ProviderStatus,
        reason: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner.provider_mut(id)?;
        record.status = status;
        record.status_reason = reason.to_string();
        Ok(())
    }

    async fn save_sys_info(&self, id: &str, info: &SysInfo) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.provider_mut(id)?.sys_info = Some(info.clone());
        Ok(())
    }
}
