//! Cloud provider client boundary.

mod inventory;
mod types;

pub use inventory::{
    HostNode, Inventory, InventoryProvider, RegionNode, StorageNode, VmNode, VpcNode, WireNode,
    ZoneNode,
};
pub use types::{
    Descriptor, DiskDesc, EipDesc, HostDesc, NetworkDesc, NicDesc, RegionDesc, SecurityGroupDesc,
    SnapshotDesc, StorageCacheDesc, StorageDesc, SysInfo, VmDesc, VpcDesc, WireDesc, ZoneDesc,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by provider clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("api error: {0}")]
    Api(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Read-only view of one provider account's resource tree.
///
/// Every list call returns the complete current set of children of the
/// given parent.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Connectivity and credentials probe.
    async fn sys_info(&self) -> ProviderResult<SysInfo>;

    async fn list_regions(&self) -> ProviderResult<Vec<RegionDesc>>;

    async fn list_zones(&self, region: &RegionDesc) -> ProviderResult<Vec<ZoneDesc>>;

    async fn list_eips(&self, region: &RegionDesc) -> ProviderResult<Vec<EipDesc>>;

    async fn list_vpcs(&self, region: &RegionDesc) -> ProviderResult<Vec<VpcDesc>>;

    async fn list_snapshots(&self, region: &RegionDesc) -> ProviderResult<Vec<SnapshotDesc>>;

    async fn list_wires(&self, vpc: &VpcDesc) -> ProviderResult<Vec<WireDesc>>;

    async fn list_security_groups(&self, vpc: &VpcDesc) -> ProviderResult<Vec<SecurityGroupDesc>>;

    async fn list_networks(&self, wire: &WireDesc) -> ProviderResult<Vec<NetworkDesc>>;

    async fn list_storages(&self, zone: &ZoneDesc) -> ProviderResult<Vec<StorageDesc>>;

    async fn list_hosts(&self, zone: &ZoneDesc) -> ProviderResult<Vec<HostDesc>>;

    async fn list_storage_disks(&self, storage: &StorageDesc) -> ProviderResult<Vec<DiskDesc>>;

    async fn list_host_storages(&self, host: &HostDesc) -> ProviderResult<Vec<StorageDesc>>;

    async fn list_host_wires(&self, host: &HostDesc) -> ProviderResult<Vec<WireDesc>>;

    async fn list_vms(&self, host: &HostDesc) -> ProviderResult<Vec<VmDesc>>;

    async fn list_vm_nics(&self, vm: &VmDesc) -> ProviderResult<Vec<NicDesc>>;

    async fn list_vm_disks(&self, vm: &VmDesc) -> ProviderResult<Vec<DiskDesc>>;

    /// The elastic IP bound to the VM, if any.
    async fn vm_eip(&self, vm: &VmDesc) -> ProviderResult<Option<EipDesc>>;
}
