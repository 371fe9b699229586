//! Sync scope: which regions, zones and hosts a pass visits.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{ResourceKind, ResourceRow};
use crate::store::{ResourceStore, Result};

/// Allow-lists restricting a pass. An empty list allows everything at
/// that level. Entries may be local ids or provider global ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRange {
    #[serde(default)]
    pub full_sync: bool,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

fn allowed(list: &[String], row: &ResourceRow) -> bool {
    list.is_empty()
        || list
            .iter()
            .any(|id| *id == row.id || Some(id.as_str()) == row.external_id.as_deref())
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|x| x == id) {
        list.push(id.to_string());
    }
}

impl SyncRange {
    /// Everything, and mark the pass as a full sync.
    pub fn full() -> Self {
        Self {
            full_sync: true,
            ..Self::default()
        }
    }

    /// Whether the pass walks the tree at all. A scope with no lists and
    /// no full-sync flag only probes the provider.
    pub fn needs_sync_info(&self) -> bool {
        self.full_sync || !self.regions.is_empty() || !self.zones.is_empty() || !self.hosts.is_empty()
    }

    pub fn allows_region(&self, region: &ResourceRow) -> bool {
        allowed(&self.regions, region)
    }

    pub fn allows_zone(&self, zone: &ResourceRow) -> bool {
        allowed(&self.zones, zone)
    }

    pub fn allows_host(&self, host: &ResourceRow) -> bool {
        allowed(&self.hosts, host)
    }

    /// Add the ancestors of requested hosts and zones, so the walk can
    /// reach them. Ids that are not in the inventory yet are skipped with a
    /// warning; they are reached on the first full pass.
    pub async fn normalize<S>(&mut self, store: &S, provider_id: &str) -> Result<()>
    where
        S: ResourceStore + ?Sized,
    {
        let hosts = self.hosts.clone();
        for id in &hosts {
            match lookup(store, provider_id, ResourceKind::Host, id).await? {
                Some(host) => push_unique(&mut self.zones, &host.parent_id),
                None => warn!(host = %id, "Host in sync range is not in the inventory"),
            }
        }

        let zones = self.zones.clone();
        for id in &zones {
            match lookup(store, provider_id, ResourceKind::Zone, id).await? {
                Some(zone) => push_unique(&mut self.regions, &zone.parent_id),
                None => warn!(zone = %id, "Zone in sync range is not in the inventory"),
            }
        }

        Ok(())
    }
}

async fn lookup<S: ResourceStore + ?Sized>(
    store: &S,
    provider_id: &str,
    kind: ResourceKind,
    id: &str,
) -> Result<Option<ResourceRow>> {
    if let Some(row) = store.get_resource(id).await? {
        if row.kind == kind {
            return Ok(Some(row));
        }
    }
    store.find_by_external_id(provider_id, kind, id).await
}
