//! Local resource model.
//!
//! Every synced object is stored as a [`ResourceRow`]: a generic record with
//! a stable local id, an optional external id correlating it with the
//! provider's global id, an owning parent and a flat attribute map. Link
//! kinds (host storages, guest NICs, ...) use the same shape; their external
//! id is the global id of the associated object.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an inventory entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Provider records live in their own table; the kind exists so
    /// providers can be referenced as branch parents and event subjects.
    Provider,
    Region,
    Zone,
    Eip,
    Vpc,
    Wire,
    Network,
    SecurityGroup,
    Snapshot,
    Storage,
    StorageCache,
    Disk,
    Host,
    HostStorage,
    HostWire,
    Guest,
    GuestNic,
    GuestDisk,
    GuestEip,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 19] = [
        ResourceKind::Provider,
        ResourceKind::Region,
        ResourceKind::Zone,
        ResourceKind::Eip,
        ResourceKind::Vpc,
        ResourceKind::Wire,
        ResourceKind::Network,
        ResourceKind::SecurityGroup,
        ResourceKind::Snapshot,
        ResourceKind::Storage,
        ResourceKind::StorageCache,
        ResourceKind::Disk,
        ResourceKind::Host,
        ResourceKind::HostStorage,
        ResourceKind::HostWire,
        ResourceKind::Guest,
        ResourceKind::GuestNic,
        ResourceKind::GuestDisk,
        ResourceKind::GuestEip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Provider => "cloudprovider",
            ResourceKind::Region => "cloudregion",
            ResourceKind::Zone => "zone",
            ResourceKind::Eip => "eip",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Wire => "wire",
            ResourceKind::Network => "network",
            ResourceKind::SecurityGroup => "secgroup",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Storage => "storage",
            ResourceKind::StorageCache => "storagecache",
            ResourceKind::Disk => "disk",
            ResourceKind::Host => "host",
            ResourceKind::HostStorage => "hoststorage",
            ResourceKind::HostWire => "hostwire",
            ResourceKind::Guest => "guest",
            ResourceKind::GuestNic => "guestnetwork",
            ResourceKind::GuestDisk => "guestdisk",
            ResourceKind::GuestEip => "guesteip",
        }
    }

    /// Plural noun used in branch descriptions ("zones of region r1").
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Provider => "providers",
            ResourceKind::Region => "regions",
            ResourceKind::Zone => "zones",
            ResourceKind::Eip => "eips",
            ResourceKind::Vpc => "vpcs",
            ResourceKind::Wire => "wires",
            ResourceKind::Network => "networks",
            ResourceKind::SecurityGroup => "security groups",
            ResourceKind::Snapshot => "snapshots",
            ResourceKind::Storage => "storages",
            ResourceKind::StorageCache => "storage caches",
            ResourceKind::Disk => "disks",
            ResourceKind::Host => "hosts",
            ResourceKind::HostStorage => "host storages",
            ResourceKind::HostWire => "host wires",
            ResourceKind::Guest => "vms",
            ResourceKind::GuestNic => "nics",
            ResourceKind::GuestDisk => "vm disks",
            ResourceKind::GuestEip => "vm eip",
        }
    }

    /// Kinds whose external id is unique across parents. A row of these
    /// kinds found under another parent is moved rather than duplicated.
    pub fn is_movable(&self) -> bool {
        matches!(
            self,
            ResourceKind::Host | ResourceKind::Guest | ResourceKind::Disk
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

/// Lightweight reference to an entity, used as branch parent and event
/// subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ResourceKind::Provider => "provider",
            ResourceKind::Region => "region",
            ResourceKind::Guest => "vm",
            other => other.as_str(),
        };
        if self.name.is_empty() || self.name == self.id {
            write!(f, "{} {}", kind, self.id)
        } else {
            write!(f, "{} {}", kind, self.name)
        }
    }
}

/// One subtree of the walk: the children of `kind` under `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub kind: ResourceKind,
    pub parent: EntityRef,
}

impl Branch {
    pub fn new(kind: ResourceKind, parent: EntityRef) -> Self {
        Self { kind, parent }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.kind.plural(), self.parent)
    }
}

/// The synced part of a row: what a descriptor projects onto it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFields {
    pub name: String,
    pub status: String,
    /// Attributes owned by the descriptor. Keys not listed here are left
    /// alone on update; an empty value clears an attribute.
    pub attrs: BTreeMap<String, String>,
}

impl RowFields {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }
}

/// A single field difference between a row and a descriptor projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} => {}", self.field, self.old, self.new)
    }
}

/// Render changes as one line, e.g. `status: running => stopped; vcpu_count: 2 => 4`.
pub fn diff_string(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Persisted local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRow {
    pub id: String,
    pub kind: ResourceKind,
    pub provider_id: String,
    pub parent_id: String,
    pub external_id: Option<String>,
    pub name: String,
    pub status: String,
    pub attrs: BTreeMap<String, String>,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ResourceRow {
    pub fn new(
        kind: ResourceKind,
        provider_id: &str,
        parent_id: &str,
        external_id: Option<String>,
        fields: RowFields,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            provider_id: provider_id.to_string(),
            parent_id: parent_id.to_string(),
            external_id,
            name: fields.name,
            status: fields.status,
            attrs: fields
                .attrs
                .into_iter()
                .filter(|(_, v)| !v.is_empty())
                .collect(),
            deleted: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone(), self.name.clone())
    }

    /// Differences that applying `fields` would make.
    pub fn changes(&self, fields: &RowFields) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        if self.name != fields.name {
            changes.push(FieldChange {
                field: "name".to_string(),
                old: self.name.clone(),
                new: fields.name.clone(),
            });
        }
        if self.status != fields.status {
            changes.push(FieldChange {
                field: "status".to_string(),
                old: self.status.clone(),
                new: fields.status.clone(),
            });
        }
        for (key, new) in &fields.attrs {
            let old = self.attr(key).unwrap_or("");
            if old != new {
                changes.push(FieldChange {
                    field: key.clone(),
                    old: old.to_string(),
                    new: new.clone(),
                });
            }
        }
        changes
    }

    /// Overlay `fields` onto the row.
    pub fn apply(&mut self, fields: RowFields) {
        self.name = fields.name;
        self.status = fields.status;
        for (key, value) in fields.attrs {
            if value.is_empty() {
                self.attrs.remove(&key);
            } else {
                self.attrs.insert(key, value);
            }
        }
        self.updated_at = Utc::now().to_rfc3339();
    }
}
