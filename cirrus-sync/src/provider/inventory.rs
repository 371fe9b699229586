//! Provider backed by a JSON inventory snapshot.
//!
//! The snapshot nests the resource tree the same way the walk visits it.
//! Associations (host storages, host wires, VM disks, VM eip) refer to
//! objects elsewhere in the tree by global id.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::types::*;
use super::{CloudProvider, ProviderError, ProviderResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub sys_info: SysInfo,
    #[serde(default)]
    pub regions: Vec<RegionNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionNode {
    #[serde(flatten)]
    pub region: RegionDesc,
    #[serde(default)]
    pub zones: Vec<ZoneNode>,
    #[serde(default)]
    pub eips: Vec<EipDesc>,
    #[serde(default)]
    pub vpcs: Vec<VpcNode>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneNode {
    #[serde(flatten)]
    pub zone: ZoneDesc,
    #[serde(default)]
    pub storages: Vec<StorageNode>,
    #[serde(default)]
    pub hosts: Vec<HostNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNode {
    #[serde(flatten)]
    pub storage: StorageDesc,
    #[serde(default)]
    pub disks: Vec<DiskDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostNode {
    #[serde(flatten)]
    pub host: HostDesc,
    /// Global ids of attached storages.
    #[serde(default)]
    pub storages: Vec<String>,
    /// Global ids of attached wires.
    #[serde(default)]
    pub wires: Vec<String>,
    #[serde(default)]
    pub vms: Vec<VmNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmNode {
    #[serde(flatten)]
    pub vm: VmDesc,
    #[serde(default)]
    pub nics: Vec<NicDesc>,
    /// Global ids of attached disks.
    #[serde(default)]
    pub disks: Vec<String>,
    /// Global id of the bound eip.
    #[serde(default)]
    pub eip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcNode {
    #[serde(flatten)]
    pub vpc: VpcDesc,
    #[serde(default)]
    pub wires: Vec<WireNode>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNode {
    #[serde(flatten)]
    pub wire: WireDesc,
    #[serde(default)]
    pub networks: Vec<NetworkDesc>,
}

impl Inventory {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse inventory")
    }

    fn region(&self, id: &str) -> ProviderResult<&RegionNode> {
        self.regions
            .iter()
            .find(|r| r.region.global_id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("region {id}")))
    }

    fn zones(&self) -> impl Iterator<Item = &ZoneNode> {
        self.regions.iter().flat_map(|r| r.zones.iter())
    }

    fn zone(&self, id: &str) -> ProviderResult<&ZoneNode> {
        self.zones()
            .find(|z| z.zone.global_id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("zone {id}")))
    }

    fn storages(&self) -> impl Iterator<Item = &StorageNode> {
        self.zones().flat_map(|z| z.storages.iter())
    }

    fn hosts(&self) -> impl Iterator<Item = &HostNode> {
        self.zones().flat_map(|z| z.hosts.iter())
    }

    fn host(&self, id: &str) -> ProviderResult<&HostNode> {
        self.hosts()
            .find(|h| h.host.global_id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("host {id}")))
    }

    /// The VM and the region it lives in.
    fn vm(&self, id: &str) -> ProviderResult<(&RegionNode, &VmNode)> {
        self.regions
            .iter()
            .flat_map(|r| {
                r.zones
                    .iter()
                    .flat_map(|z| z.hosts.iter())
                    .flat_map(|h| h.vms.iter())
                    .map(move |vm| (r, vm))
            })
            .find(|(_, vm)| vm.vm.global_id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("vm {id}")))
    }

    fn vpcs(&self) -> impl Iterator<Item = &VpcNode> {
        self.regions.iter().flat_map(|r| r.vpcs.iter())
    }

    fn wires(&self) -> impl Iterator<Item = &WireNode> {
        self.vpcs().flat_map(|v| v.wires.iter())
    }

    fn disk(&self, id: &str) -> ProviderResult<DiskDesc> {
        self.storages()
            .find_map(|s| {
                s.disks.iter().find(|d| d.global_id == id).map(|d| {
                    let mut disk = d.clone();
                    disk.storage_id.get_or_insert_with(|| s.storage.global_id.clone());
                    disk
                })
            })
            .ok_or_else(|| ProviderError::NotFound(format!("disk {id}")))
    }
}

/// [`CloudProvider`] over an [`Inventory`], optionally reloaded from a file
/// before each pass.
pub struct InventoryProvider {
    path: Option<PathBuf>,
    inventory: RwLock<Inventory>,
}

impl InventoryProvider {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            path: None,
            inventory: RwLock::new(inventory),
        }
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let inventory = read_inventory(path).await?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            inventory: RwLock::new(inventory),
        })
    }

    /// Re-read the backing file. No-op for in-memory inventories.
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let inventory = read_inventory(path).await?;
        debug!(path = %path.display(), regions = inventory.regions.len(), "Inventory reloaded");
        *self.inventory.write().await = inventory;
        Ok(())
    }

    pub async fn replace(&self, inventory: Inventory) {
        *self.inventory.write().await = inventory;
    }
}

async fn read_inventory(path: &Path) -> Result<Inventory> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read inventory {}", path.display()))?;
    Inventory::from_json(&json).with_context(|| format!("Invalid inventory {}", path.display()))
}

#[async_trait]
impl CloudProvider for InventoryProvider {
    async fn sys_info(&self) -> ProviderResult<SysInfo> {
        Ok(self.inventory.read().await.sys_info.clone())
    }

    async fn list_regions(&self) -> ProviderResult<Vec<RegionDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv.regions.iter().map(|r| r.region.clone()).collect())
    }

    async fn list_zones(&self, region: &RegionDesc) -> ProviderResult<Vec<ZoneDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv
            .region(&region.global_id)?
            .zones
            .iter()
            .map(|z| z.zone.clone())
            .collect())
    }

    async fn list_eips(&self, region: &RegionDesc) -> ProviderResult<Vec<EipDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv.region(&region.global_id)?.eips.clone())
    }

    async fn list_vpcs(&self, region: &RegionDesc) -> ProviderResult<Vec<VpcDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv
            .region(&region.global_id)?
            .vpcs
            .iter()
            .map(|v| v.vpc.clone())
            .collect())
    }

    async fn list_snapshots(&self, region: &RegionDesc) -> ProviderResult<Vec<SnapshotDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv.region(&region.global_id)?.snapshots.clone())
    }

    async fn list_wires(&self, vpc: &VpcDesc) -> ProviderResult<Vec<WireDesc>> {
        let inv = self.inventory.read().await;
        inv.vpcs()
            .find(|v| v.vpc.global_id == vpc.global_id)
            .map(|v| v.wires.iter().map(|w| w.wire.clone()).collect())
            .ok_or_else(|| ProviderError::NotFound(format!("vpc {}", vpc.global_id)))
    }

    async fn list_security_groups(&self, vpc: &VpcDesc) -> ProviderResult<Vec<SecurityGroupDesc>> {
        let inv = self.inventory.read().await;
        inv.vpcs()
            .find(|v| v.vpc.global_id == vpc.global_id)
            .map(|v| v.security_groups.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("vpc {}", vpc.global_id)))
    }

    async fn list_networks(&self, wire: &WireDesc) -> ProviderResult<Vec<NetworkDesc>> {
        let inv = self.inventory.read().await;
        inv.wires()
            .find(|w| w.wire.global_id == wire.global_id)
            .map(|w| w.networks.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("wire {}", wire.global_id)))
    }

    async fn list_storages(&self, zone: &ZoneDesc) -> ProviderResult<Vec<StorageDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv
            .zone(&zone.global_id)?
            .storages
            .iter()
            .map(|s| s.storage.clone())
            .collect())
    }

    async fn list_hosts(&self, zone: &ZoneDesc) -> ProviderResult<Vec<HostDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv
            .zone(&zone.global_id)?
            .hosts
            .iter()
            .map(|h| h.host.clone())
            .collect())
    }

    async fn list_storage_disks(&self, storage: &StorageDesc) -> ProviderResult<Vec<DiskDesc>> {
        let inv = self.inventory.read().await;
        let node = inv
            .storages()
            .find(|s| s.storage.global_id == storage.global_id)
            .ok_or_else(|| ProviderError::NotFound(format!("storage {}", storage.global_id)))?;
        Ok(node
            .disks
            .iter()
            .map(|d| {
                let mut disk = d.clone();
                disk.storage_id.get_or_insert_with(|| storage.global_id.clone());
                disk
            })
            .collect())
    }

    async fn list_host_storages(&self, host: &HostDesc) -> ProviderResult<Vec<StorageDesc>> {
        let inv = self.inventory.read().await;
        let node = inv.host(&host.global_id)?;
        node.storages
            .iter()
            .map(|id| {
                inv.storages()
                    .find(|s| &s.storage.global_id == id)
                    .map(|s| s.storage.clone())
                    .ok_or_else(|| ProviderError::Api(format!("host storage {id} not in inventory")))
            })
            .collect()
    }

    async fn list_host_wires(&self, host: &HostDesc) -> ProviderResult<Vec<WireDesc>> {
        let inv = self.inventory.read().await;
        let node = inv.host(&host.global_id)?;
        node.wires
            .iter()
            .map(|id| {
                inv.wires()
                    .find(|w| &w.wire.global_id == id)
                    .map(|w| w.wire.clone())
                    .ok_or_else(|| ProviderError::Api(format!("host wire {id} not in inventory")))
            })
            .collect()
    }

    async fn list_vms(&self, host: &HostDesc) -> ProviderResult<Vec<VmDesc>> {
        let inv = self.inventory.read().await;
        Ok(inv
            .host(&host.global_id)?
            .vms
            .iter()
            .map(|v| v.vm.clone())
            .collect())
    }

    async fn list_vm_nics(&self, vm: &VmDesc) -> ProviderResult<Vec<NicDesc>> {
        let inv = self.inventory.read().await;
        let (_, node) = inv.vm(&vm.global_id)?;
        Ok(node.nics.clone())
    }

    async fn list_vm_disks(&self, vm: &VmDesc) -> ProviderResult<Vec<DiskDesc>> {
        let inv = self.inventory.read().await;
        let (_, node) = inv.vm(&vm.global_id)?;
        node.disks.iter().map(|id| inv.disk(id)).collect()
    }

    async fn vm_eip(&self, vm: &VmDesc) -> ProviderResult<Option<EipDesc>> {
        let inv = self.inventory.read().await;
        let (region, node) = inv.vm(&vm.global_id)?;
        let Some(eip_id) = &node.eip else {
            return Ok(None);
        };
        region
            .eips
            .iter()
            .find(|e| &e.global_id == eip_id)
            .cloned()
            .map(Some)
            .ok_or_else(|| ProviderError::Api(format!("eip {eip_id} not in region")))
    }
}
