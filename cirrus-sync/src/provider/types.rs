//! Remote descriptors.
//!
//! Provider clients convert whatever their API returns into these structs
//! once, at the boundary. Everything past that point works on typed fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::RowFields;

/// Common view of a remote object.
pub trait Descriptor: Clone + Send + Sync + 'static {
    /// Provider-assigned id, unique among siblings.
    fn global_id(&self) -> &str;

    fn name(&self) -> &str;

    /// Projection onto a local row, for objects whose fields need no
    /// lookups in the local inventory.
    fn fields(&self) -> RowFields;
}

/// Account-level information returned by the connectivity probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysInfo {
    pub provider: String,
    pub account: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_status() -> String {
    "available".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
}

impl Descriptor for RegionDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
}

impl Descriptor for ZoneDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EipDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub ip_addr: String,
    #[serde(default)]
    pub bandwidth_mbps: u32,
    #[serde(default)]
    pub charge_type: String,
}

impl Descriptor for EipDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
            .with_attr("ip_addr", &self.ip_addr)
            .with_attr("bandwidth_mbps", self.bandwidth_mbps)
            .with_attr("charge_type", &self.charge_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub cidr_block: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Descriptor for VpcDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
            .with_attr("cidr_block", &self.cidr_block)
            .with_attr("is_default", self.is_default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub bandwidth_mbps: u32,
}

impl Descriptor for WireDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status).with_attr("bandwidth_mbps", self.bandwidth_mbps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub ip_start: String,
    pub ip_end: String,
    pub ip_mask: u8,
    #[serde(default)]
    pub gateway: String,
}

impl Descriptor for NetworkDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
            .with_attr("ip_start", &self.ip_start)
            .with_attr("ip_end", &self.ip_end)
            .with_attr("ip_mask", self.ip_mask)
            .with_attr("gateway", &self.gateway)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rules in `direction:action:protocol:ports:cidr` form.
    #[serde(default)]
    pub rules: Vec<String>,
}

impl Descriptor for SecurityGroupDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, "ready")
            .with_attr("description", &self.description)
            .with_attr("rules", self.rules.join(";"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub size_mb: u64,
    /// Global id of the source disk, if the provider reports it.
    #[serde(default)]
    pub disk_id: Option<String>,
}

impl Descriptor for SnapshotDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status).with_attr("size_mb", self.size_mb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCacheDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

impl Descriptor for StorageCacheDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, "ready").with_attr("path", &self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub storage_type: String,
    #[serde(default)]
    pub medium_type: String,
    #[serde(default)]
    pub capacity_mb: u64,
    #[serde(default)]
    pub cache: Option<StorageCacheDesc>,
}

impl Descriptor for StorageDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
            .with_attr("storage_type", &self.storage_type)
            .with_attr("medium_type", &self.medium_type)
            .with_attr("capacity_mb", self.capacity_mb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub size_mb: u64,
    #[serde(default)]
    pub disk_type: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub cache_mode: String,
    #[serde(default)]
    pub mountpoint: String,
    /// Global id of the backing storage.
    #[serde(default)]
    pub storage_id: Option<String>,
}

impl Descriptor for DiskDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
            .with_attr("size_mb", self.size_mb)
            .with_attr("disk_type", &self.disk_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub host_type: String,
    #[serde(default)]
    pub cpu_count: u32,
    #[serde(default)]
    pub mem_size_mb: u64,
    #[serde(default)]
    pub access_ip: String,
}

impl Descriptor for HostDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.name, &self.status)
            .with_attr("host_type", &self.host_type)
            .with_attr("cpu_count", self.cpu_count)
            .with_attr("mem_size_mb", self.mem_size_mb)
            .with_attr("access_ip", &self.access_ip)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDesc {
    pub global_id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub vcpu_count: u32,
    pub vmem_size_mb: u64,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub hypervisor: String,
    #[serde(default)]
    pub billing_type: String,
    /// Global id of the security group, if any.
    #[serde(default)]
    pub secgroup_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Descriptor for VmDesc {
    fn global_id(&self) -> &str {
        &self.global_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    /// Fields without the security group, which needs a lookup.
    fn fields(&self) -> RowFields {
        let mut fields = RowFields::new(&self.name, &self.status)
            .with_attr("vcpu_count", self.vcpu_count)
            .with_attr("vmem_size_mb", self.vmem_size_mb)
            .with_attr("os_type", &self.os_type)
            .with_attr("hypervisor", &self.hypervisor)
            .with_attr("billing_type", &self.billing_type);
        for (key, value) in &self.metadata {
            fields = fields.with_attr(&format!("meta.{key}"), value);
        }
        fields
    }
}

/// A VM network interface. NICs have no provider id; the MAC address
/// identifies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicDesc {
    pub mac: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub driver: String,
    /// Global id of the network the NIC is attached to.
    #[serde(default)]
    pub network_id: Option<String>,
}

impl Descriptor for NicDesc {
    fn global_id(&self) -> &str {
        &self.mac
    }
    fn name(&self) -> &str {
        &self.mac
    }
    fn fields(&self) -> RowFields {
        RowFields::new(&self.mac, "")
            .with_attr("mac", &self.mac)
            .with_attr("ip", &self.ip)
            .with_attr("driver", &self.driver)
    }
}
