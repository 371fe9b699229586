//! Test helpers for cirrus-sync integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cirrus_sync::model::{EntityRef, ResourceKind, ResourceRow};
use cirrus_sync::provider::*;
use cirrus_sync::store::{
    MemoryStore, Mutator, ProviderRecord, ProviderStatus, ProviderStore, ResourceStore, Result,
    StoreError,
};
use cirrus_sync::{Action, EventSink, Inventory, InventoryProvider};

pub const PROVIDER_ID: &str = "p-1";

/// One region with two zones. z-1 holds the interesting bits: a storage
/// with a cache, two hosts and a VM wired to every association kind.
pub const INVENTORY: &str = r#"{
    "sys_info": {"provider": "inventory", "account": "acct-1", "version": "1"},
    "regions": [{
        "global_id": "r-1", "name": "north",
        "eips": [
            {"global_id": "eip-1", "name": "web-ip", "ip_addr": "203.0.113.10"},
            {"global_id": "eip-2", "name": "spare", "ip_addr": "203.0.113.11"}
        ],
        "vpcs": [{
            "global_id": "vpc-1", "name": "main", "cidr_block": "10.0.0.0/16",
            "wires": [{
                "global_id": "w-1", "name": "wire-a",
                "networks": [{
                    "global_id": "n-1", "name": "net-a",
                    "ip_start": "10.0.0.2", "ip_end": "10.0.0.254", "ip_mask": 24,
                    "gateway": "10.0.0.1"
                }]
            }],
            "security_groups": [{"global_id": "sg-1", "name": "web", "rules": ["in:allow tcp 443"]}]
        }],
        "snapshots": [{"global_id": "snap-1", "name": "nightly", "size_mb": 40960, "disk_id": "d-1"}],
        "zones": [
            {
                "global_id": "z-1", "name": "north-a",
                "storages": [{
                    "global_id": "st-1", "name": "ssd", "storage_type": "cloud_ssd",
                    "capacity_mb": 1048576,
                    "cache": {"global_id": "sc-1", "name": "ssd-cache", "path": "/cache/st-1"},
                    "disks": [
                        {"global_id": "d-1", "name": "root", "size_mb": 40960},
                        {"global_id": "d-2", "name": "data", "size_mb": 102400}
                    ]
                }],
                "hosts": [
                    {
                        "global_id": "h-1", "name": "host-1", "host_type": "kvm",
                        "storages": ["st-1"], "wires": ["w-1"],
                        "vms": [{
                            "global_id": "i-1", "name": "web", "vcpu_count": 2, "vmem_size_mb": 2048,
                            "secgroup_id": "sg-1",
                            "disks": ["d-1"], "eip": "eip-1",
                            "nics": [
                                {"mac": "00:16:3e:00:00:01", "ip": "10.0.0.5", "network_id": "n-1"},
                                {"mac": "00:16:3e:00:00:02"}
                            ]
                        }]
                    },
                    {
                        "global_id": "h-2", "name": "host-2", "host_type": "kvm",
                        "vms": [{"global_id": "i-2", "name": "batch", "vcpu_count": 4, "vmem_size_mb": 8192}]
                    }
                ]
            },
            {
                "global_id": "z-2", "name": "north-b",
                "storages": [{
                    "global_id": "st-2", "name": "hdd", "storage_type": "cloud_efficiency",
                    "disks": [{"global_id": "d-3", "name": "logs", "size_mb": 20480}]
                }],
                "hosts": [{
                    "global_id": "h-3", "name": "host-3", "host_type": "kvm",
                    "vms": [{"global_id": "i-3", "name": "db", "vcpu_count": 8, "vmem_size_mb": 32768}]
                }]
            }
        ]
    }]
}"#;

pub fn inventory() -> Inventory {
    Inventory::from_json(INVENTORY).unwrap()
}

/// Live rows of one kind, by external id.
pub async fn live(store: &MemoryStore, kind: ResourceKind) -> Vec<ResourceRow> {
    store
        .all_rows()
        .await
        .into_iter()
        .filter(|r| r.kind == kind && !r.deleted)
        .collect()
}

pub async fn live_one(store: &MemoryStore, kind: ResourceKind, external_id: &str) -> ResourceRow {
    live(store, kind)
        .await
        .into_iter()
        .find(|r| r.external_id.as_deref() == Some(external_id))
        .unwrap_or_else(|| panic!("no live {kind} {external_id}"))
}

/// Wraps an [`InventoryProvider`], records every call as `method:id` and
/// fails the calls it was told to fail.
pub struct FaultyProvider {
    inner: InventoryProvider,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FaultyProvider {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inner: InventoryProvider::new(inventory),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &InventoryProvider {
        &self.inner
    }

    /// Fail `method` for the parent with global id `id` ("" for the
    /// account-level calls).
    pub fn fail(&self, method: &str, id: &str) {
        self.failing.lock().unwrap().insert(format!("{method}:{id}"));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn check(&self, method: &str, id: &str) -> ProviderResult<()> {
        let call = format!("{method}:{id}");
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.lock().unwrap().contains(&call) {
            return Err(ProviderError::Unreachable(format!("injected failure in {call}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for FaultyProvider {
    async fn sys_info(&self) -> ProviderResult<SysInfo> {
        self.check("sys_info", "")?;
        self.inner.sys_info().await
    }

    async fn list_regions(&self) -> ProviderResult<Vec<RegionDesc>> {
        self.check("list_regions", "")?;
        self.inner.list_regions().await
    }

    async fn list_zones(&self, region: &RegionDesc) -> ProviderResult<Vec<ZoneDesc>> {
        self.check("list_zones", &region.global_id)?;
        self.inner.list_zones(region).await
    }

    async fn list_eips(&self, region: &RegionDesc) -> ProviderResult<Vec<EipDesc>> {
        self.check("list_eips", &region.global_id)?;
        self.inner.list_eips(region).await
    }

    async fn list_vpcs(&self, region: &RegionDesc) -> ProviderResult<Vec<VpcDesc>> {
        self.check("list_vpcs", &region.global_id)?;
        self.inner.list_vpcs(region).await
    }

    async fn list_snapshots(&self, region: &RegionDesc) -> ProviderResult<Vec<SnapshotDesc>> {
        self.check("list_snapshots", &region.global_id)?;
        self.inner.list_snapshots(region).await
    }

    async fn list_wires(&self, vpc: &VpcDesc) -> ProviderResult<Vec<WireDesc>> {
        self.check("list_wires", &vpc.global_id)?;
        self.inner.list_wires(vpc).await
    }

    async fn list_security_groups(&self, vpc: &VpcDesc) -> ProviderResult<Vec<SecurityGroupDesc>> {
        self.check("list_security_groups", &vpc.global_id)?;
        self.inner.list_security_groups(vpc).await
    }

    async fn list_networks(&self, wire: &WireDesc) -> ProviderResult<Vec<NetworkDesc>> {
        self.check("list_networks", &wire.global_id)?;
        self.inner.list_networks(wire).await
    }

    async fn list_storages(&self, zone: &ZoneDesc) -> ProviderResult<Vec<StorageDesc>> {
        self.check("list_storages", &zone.global_id)?;
        self.inner.list_storages(zone).await
    }

    async fn list_hosts(&self, zone: &ZoneDesc) -> ProviderResult<Vec<HostDesc>> {
        self.check("list_hosts", &zone.global_id)?;
        self.inner.list_hosts(zone).await
    }

    async fn list_storage_disks(&self, storage: &StorageDesc) -> ProviderResult<Vec<DiskDesc>> {
        self.check("list_storage_disks", &storage.global_id)?;
        self.inner.list_storage_disks(storage).await
    }

    async fn list_host_storages(&self, host: &HostDesc) -> ProviderResult<Vec<StorageDesc>> {
        self.check("list_host_storages", &host.global_id)?;
        self.inner.list_host_storages(host).await
    }

    async fn list_host_wires(&self, host: &HostDesc) -> ProviderResult<Vec<WireDesc>> {
        self.check("list_host_wires", &host.global_id)?;
        self.inner.list_host_wires(host).await
    }

    async fn list_vms(&self, host: &HostDesc) -> ProviderResult<Vec<VmDesc>> {
        self.check("list_vms", &host.global_id)?;
        self.inner.list_vms(host).await
    }

    async fn list_vm_nics(&self, vm: &VmDesc) -> ProviderResult<Vec<NicDesc>> {
        self.check("list_vm_nics", &vm.global_id)?;
        self.inner.list_vm_nics(vm).await
    }

    async fn list_vm_disks(&self, vm: &VmDesc) -> ProviderResult<Vec<DiskDesc>> {
        self.check("list_vm_disks", &vm.global_id)?;
        self.inner.list_vm_disks(vm).await
    }

    async fn vm_eip(&self, vm: &VmDesc) -> ProviderResult<Option<EipDesc>> {
        self.check("vm_eip", &vm.global_id)?;
        self.inner.vm_eip(vm).await
    }
}

/// Event sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(String, Action, String)>>,
    pub audits: Mutex<Vec<(String, Action, String, bool)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_for(&self, job_id: &str, action: Action) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, a, _)| job == job_id && *a == action)
            .count()
    }

    pub fn audits_for(&self, job_id: &str) -> Vec<(Action, String, bool)> {
        self.audits
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, ..)| job == job_id)
            .map(|(_, a, d, ok)| (*a, d.clone(), *ok))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn log_event(&self, job_id: &str, _entity: &EntityRef, action: Action, detail: &str) {
        self.events
            .lock()
            .unwrap()
            .push((job_id.to_string(), action, detail.to_string()));
    }

    fn log_action_audit(
        &self,
        job_id: &str,
        _entity: &EntityRef,
        action: Action,
        detail: &str,
        success: bool,
    ) {
        self.audits
            .lock()
            .unwrap()
            .push((job_id.to_string(), action, detail.to_string(), success));
    }
}

/// Wraps a [`MemoryStore`] and fails writes to rows with chosen external
/// ids, and child listings of chosen kinds.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_ids: Mutex<HashSet<String>>,
    failing_lists: Mutex<HashSet<ResourceKind>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_writes(&self, external_id: &str) {
        self.failing_ids.lock().unwrap().insert(external_id.to_string());
    }

    pub fn fail_list(&self, kind: ResourceKind) {
        self.failing_lists.lock().unwrap().insert(kind);
    }

    fn check_write(&self, op: &str, external_id: Option<&str>) -> Result<()> {
        match external_id {
            Some(id) if self.failing_ids.lock().unwrap().contains(id) => {
                Err(StoreError::Internal(format!("injected {op} failure for {id}")))
            }
            _ => Ok(()),
        }
    }

    async fn check_row(&self, op: &str, id: &str) -> Result<()> {
        let row = self.inner.get_resource(id).await?;
        self.check_write(op, row.as_ref().and_then(|r| r.external_id.as_deref()))
    }
}

#[async_trait]
impl ResourceStore for FlakyStore {
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceRow>> {
        self.inner.get_resource(id).await
    }

    async fn find_by_external_id(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        external_id: &str,
    ) -> Result<Option<ResourceRow>> {
        self.inner.find_by_external_id(provider_id, kind, external_id).await
    }

    async fn list_children(&self, kind: ResourceKind, parent_id: &str) -> Result<Vec<ResourceRow>> {
        if self.failing_lists.lock().unwrap().contains(&kind) {
            return Err(StoreError::Internal(format!("injected list failure for {kind}")));
        }
        self.inner.list_children(kind, parent_id).await
    }

    async fn insert_resource(&self, row: &ResourceRow) -> Result<()> {
        self.check_write("insert", row.external_id.as_deref())?;
        self.inner.insert_resource(row).await
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        self.check_row("delete", id).await?;
        self.inner.soft_delete(id).await
    }

    async fn update_resource(&self, id: &str, mutator: Mutator) -> Result<ResourceRow> {
        self.check_row("update", id).await?;
        self.inner.update_resource(id, mutator).await
    }
}

#[async_trait]
impl ProviderStore for FlakyStore {
    async fn upsert_provider(&self, id: &str, name: &str) -> Result<ProviderRecord> {
        self.inner.upsert_provider(id, name).await
    }

    async fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>> {
        self.inner.get_provider(id).await
    }

    async fn mark_sync_started(&self, id: &str) -> Result<()> {
        self.inner.mark_sync_started(id).await
    }

    async fn mark_sync_finished(&self, id: &str) -> Result<()> {
        self.inner.mark_sync_finished(id).await
    }

    async fn set_provider_status(&self, id: &str, status: ProviderStatus, reason: &str) -> Result<()> {
        self.inner.set_provider_status(id, status, reason).await
    }

    async fn save_sys_info(&self, id: &str, info: &SysInfo) -> Result<()> {
        self.inner.save_sys_info(id, info).await
    }
}
