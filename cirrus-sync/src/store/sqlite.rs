use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};

use super::{Mutator, ProviderRecord, ProviderStatus, ProviderStore, ResourceStore, Result, StoreError};
use crate::model::{ResourceKind, ResourceRow};
use crate::provider::SysInfo;

const RESOURCE_COLUMNS: &str = "id, kind, provider_id, parent_id, external_id, name, status, \
     attrs_json, deleted, created_at, updated_at";

/// SQLite-backed inventory store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("inventory.db"))
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                parent_id TEXT NOT NULL,
                external_id TEXT,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                attrs_json TEXT NOT NULL DEFAULT '{}',
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_resources_parent ON resources (kind, parent_id, deleted)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_resources_external ON resources (provider_id, kind, external_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'init',
                status_reason TEXT NOT NULL DEFAULT '',
                sys_info_json TEXT,
                last_sync_started_at TEXT,
                last_sync_finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_provider(&self, sql: &str, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(sql)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("provider {id}")));
        }
        Ok(())
    }
}

fn resource_from_row(r: &SqliteRow) -> Result<ResourceRow> {
    let kind: String = r.get("kind");
    let attrs_json: String = r.get("attrs_json");
    let attrs: BTreeMap<String, String> = serde_json::from_str(&attrs_json)?;

    Ok(ResourceRow {
        id: r.get("id"),
        kind: kind.parse::<ResourceKind>().map_err(StoreError::Internal)?,
        provider_id: r.get("provider_id"),
        parent_id: r.get("parent_id"),
        external_id: r.get("external_id"),
        name: r.get("name"),
        status: r.get("status"),
        attrs,
        deleted: r.get("deleted"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn provider_from_row(r: &SqliteRow) -> Result<ProviderRecord> {
    let status: String = r.get("status");
    let sys_info_json: Option<String> = r.get("sys_info_json");
    let sys_info = match sys_info_json {
        Some(json) => Some(serde_json::from_str::<SysInfo>(&json)?),
        None => None,
    };

    Ok(ProviderRecord {
        id: r.get("id"),
        name: r.get("name"),
        status: status.parse()?,
        status_reason: r.get("status_reason"),
        sys_info,
        last_sync_started_at: r.get("last_sync_started_at"),
        last_sync_finished_at: r.get("last_sync_finished_at"),
    })
}

#[async_trait]
impl ResourceStore for SqliteStore {
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceRow>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ? AND deleted = 0"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(resource_from_row).transpose()
    }

    async fn find_by_external_id(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        external_id: &str,
    ) -> Result<Option<ResourceRow>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resources
            WHERE provider_id = ? AND kind = ? AND external_id = ? AND deleted = 0
            ORDER BY rowid LIMIT 1
            "#
        ))
        .bind(provider_id)
        .bind(kind.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(resource_from_row).transpose()
    }

    async fn list_children(&self, kind: ResourceKind, parent_id: &str) -> Result<Vec<ResourceRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resources
            WHERE kind = ? AND parent_id = ? AND deleted = 0
            ORDER BY rowid
            "#
        ))
        .bind(kind.as_str())
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(resource_from_row).collect()
    }

    async fn insert_resource(&self, row: &ResourceRow) -> Result<()> {
        let attrs_json = serde_json::to_string(&row.attrs)?;
        let result = sqlx::query(
            r#"
            INSERT INTO resources (id, kind, provider_id, parent_id, external_id, name, status,
                                   attrs_json, deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(row.kind.as_str())
        .bind(&row.provider_id)
        .bind(&row.parent_id)
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.status)
        .bind(&attrs_json)
        .bind(row.deleted)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Conflict(
                format!("resource {} exists", row.id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result =
            sqlx::query("UPDATE resources SET deleted = 1, updated_at = ? WHERE id = ? AND deleted = 0")
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_resource(&self, id: &str, mutator: Mutator) -> Result<ResourceRow> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ? AND deleted = 0"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = current else {
            return Err(StoreError::NotFound(format!("resource {id}")));
        };

        let mut row = resource_from_row(&current)?;
        mutator(&mut row);
        row.id = id.to_string();
        let attrs_json = serde_json::to_string(&row.attrs)?;

        sqlx::query(
            r#"
            UPDATE resources
            SET kind = ?, parent_id = ?, external_id = ?, name = ?, status = ?,
                attrs_json = ?, deleted = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(row.kind.as_str())
        .bind(&row.parent_id)
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.status)
        .bind(&attrs_json)
        .bind(row.deleted)
        .bind(&row.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }
}

#[async_trait]
impl ProviderStore for SqliteStore {
    async fn upsert_provider(&self, id: &str, name: &str) -> Result<ProviderRecord> {
        sqlx::query(
            r#"
            INSERT INTO providers (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        self.get_provider(id)
            .await?
            .ok_or_else(|| StoreError::Internal(format!("provider {id} vanished after upsert")))
    }

    async fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, status, status_reason, sys_info_json,
                   last_sync_started_at, last_sync_finished_at
            FROM providers WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(provider_from_row).transpose()
    }

    async fn mark_sync_started(&self, id: &str) -> Result<()> {
        self.touch_provider(
            "UPDATE providers SET last_sync_started_at = ? WHERE id = ?",
            id,
        )
        .await
    }

    async fn mark_sync_finished(&self, id: &str) -> Result<()> {
        self.touch_provider(
            "UPDATE providers SET last_sync_finished_at = ? WHERE id = ?",
            id,
        )
        .await
    }

    async fn set_provider_status(
        &self,
        id: &str,
        status: ProviderStatus,
        reason: &str,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE providers SET status = ?, status_reason = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(reason)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("provider {id}")));
        }
        Ok(())
    }

    async fn save_sys_info(&self, id: &str, info: &SysInfo) -> Result<()> {
        let json = serde_json::to_string(info)?;
        let result = sqlx::query("UPDATE providers SET sys_info_json = ? WHERE id = ?")
            .bind(&json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("provider {id}")));
        }
        Ok(())
    }
}
