//! Projection of remote records that reference other synced objects.
//!
//! Link rows (host storages, host wires, VM NICs, VM disks, VM eip) and
//! VMs carry local ids of the objects they point at. These are looked up
//! by external id here, before the branch is diffed. Disks and eips the
//! inventory does not know yet are created on the spot; those rows are
//! handed back to the walker with [`Resolver::into_created`] to be counted.

use tracing::warn;

use crate::executor::{PassContext, Projection, Remote, SyncExecutor, Upsert};
use crate::model::{Branch, EntityRef, ResourceKind, ResourceRow, RowFields};
use crate::provider::{
    Descriptor, DiskDesc, EipDesc, NicDesc, SnapshotDesc, StorageDesc, VmDesc, WireDesc,
};
use crate::store::Result;

/// Looks up local rows for remote references during one pass.
pub struct Resolver<'a> {
    executor: &'a SyncExecutor,
    ctx: &'a PassContext,
    created: Vec<(Branch, Upsert)>,
}

impl<'a> Resolver<'a> {
    pub fn new(executor: &'a SyncExecutor, ctx: &'a PassContext) -> Self {
        Self {
            executor,
            ctx,
            created: Vec::new(),
        }
    }

    /// Rows written while resolving, with the branch they belong to.
    pub fn into_created(self) -> Vec<(Branch, Upsert)> {
        self.created
    }

    async fn upsert(
        &mut self,
        branch: Branch,
        global_id: &str,
        fields: RowFields,
    ) -> Result<ResourceRow> {
        let upsert = self
            .executor
            .upsert_child(self.ctx, &branch, global_id, fields)
            .await?;
        let row = upsert.row().clone();
        self.created.push((branch, upsert));
        Ok(row)
    }

    async fn find(&self, kind: ResourceKind, global_id: &str) -> Result<Option<ResourceRow>> {
        self.executor
            .store()
            .find_by_external_id(self.ctx.provider_id(), kind, global_id)
            .await
    }

    /// Local id of a referenced object, or a failed projection.
    async fn require(&self, kind: ResourceKind, global_id: &str) -> std::result::Result<ResourceRow, Projection> {
        match self.find(kind, global_id).await {
            Ok(Some(row)) => Ok(row),
            Ok(None) => Err(Projection::Failed(format!(
                "{kind} {global_id} is not in the inventory"
            ))),
            Err(e) => Err(Projection::Failed(format!("lookup of {kind} {global_id}: {e}"))),
        }
    }

    pub async fn host_storage(&self, storage: StorageDesc) -> Remote<StorageDesc> {
        let projection = match self.require(ResourceKind::Storage, &storage.global_id).await {
            Ok(row) => Projection::Ready(
                RowFields::new(&storage.name, &storage.status).with_attr("storage_id", &row.id),
            ),
            Err(failed) => failed,
        };
        Remote::with(storage, projection)
    }

    pub async fn host_wire(&self, wire: WireDesc) -> Remote<WireDesc> {
        let projection = match self.require(ResourceKind::Wire, &wire.global_id).await {
            Ok(row) => Projection::Ready(
                RowFields::new(&wire.name, &wire.status).with_attr("wire_id", &row.id),
            ),
            Err(failed) => failed,
        };
        Remote::with(wire, projection)
    }

    /// VM fields plus the local security group id. An unknown group clears
    /// the attribute instead of failing the VM.
    pub async fn vm(&self, vm: VmDesc) -> Remote<VmDesc> {
        let mut fields = vm.fields();
        let secgroup_id = match &vm.secgroup_id {
            None => String::new(),
            Some(sg) => match self.find(ResourceKind::SecurityGroup, sg).await {
                Ok(Some(row)) => row.id,
                Ok(None) => {
                    warn!(vm = %vm.global_id, secgroup = %sg, "Security group not in inventory");
                    String::new()
                }
                Err(e) => {
                    let cause = format!("lookup of secgroup {sg}: {e}");
                    return Remote::with(vm, Projection::Failed(cause));
                }
            },
        };
        fields = fields.with_attr("secgroup_id", secgroup_id);
        Remote::with(vm, Projection::Ready(fields))
    }

    /// NICs without an address are not mirrored.
    pub async fn vm_nic(&self, nic: NicDesc) -> Remote<NicDesc> {
        if nic.ip.is_empty() {
            return Remote::with(nic, Projection::Skip("no ip address".to_string()));
        }
        let Some(network_id) = nic.network_id.clone() else {
            let cause = format!("nic {} has no network", nic.mac);
            return Remote::with(nic, Projection::Failed(cause));
        };
        let projection = match self.require(ResourceKind::Network, &network_id).await {
            Ok(row) => Projection::Ready(nic.fields().with_attr("network_id", &row.id)),
            Err(failed) => failed,
        };
        Remote::with(nic, projection)
    }

    /// VM disk link. A disk the inventory does not know yet is created
    /// under its storage first.
    pub async fn vm_disk(&mut self, disk: DiskDesc) -> Remote<DiskDesc> {
        let disk_row = match self.find(ResourceKind::Disk, &disk.global_id).await {
            Ok(Some(row)) => row,
            Ok(None) => match self.create_disk(&disk).await {
                Ok(row) => row,
                Err(failed) => return Remote::with(disk, failed),
            },
            Err(e) => {
                let cause = format!("lookup of disk {}: {e}", disk.global_id);
                return Remote::with(disk, Projection::Failed(cause));
            }
        };
        let fields = RowFields::new(&disk.name, &disk.status)
            .with_attr("disk_id", &disk_row.id)
            .with_attr("driver", &disk.driver)
            .with_attr("cache_mode", &disk.cache_mode)
            .with_attr("mountpoint", &disk.mountpoint);
        Remote::with(disk, Projection::Ready(fields))
    }

    async fn create_disk(&mut self, disk: &DiskDesc) -> std::result::Result<ResourceRow, Projection> {
        let Some(storage_id) = &disk.storage_id else {
            return Err(Projection::Failed(format!(
                "disk {} has no storage",
                disk.global_id
            )));
        };
        let storage = self.require(ResourceKind::Storage, storage_id).await?;
        let branch = Branch::new(ResourceKind::Disk, storage.entity());
        self.upsert(branch, &disk.global_id, disk.fields())
            .await
            .map_err(|e| Projection::Failed(format!("create disk {}: {e}", disk.global_id)))
    }

    /// VM eip link. An eip the inventory does not know yet is created under
    /// `region` first.
    pub async fn vm_eip(&mut self, eip: EipDesc, region: &EntityRef) -> Remote<EipDesc> {
        let eip_row = match self.find(ResourceKind::Eip, &eip.global_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                let branch = Branch::new(ResourceKind::Eip, region.clone());
                match self.upsert(branch, &eip.global_id, eip.fields()).await {
                    Ok(row) => row,
                    Err(e) => {
                        let cause = format!("create eip {}: {e}", eip.global_id);
                        return Remote::with(eip, Projection::Failed(cause));
                    }
                }
            }
            Err(e) => {
                let cause = format!("lookup of eip {}: {e}", eip.global_id);
                return Remote::with(eip, Projection::Failed(cause));
            }
        };
        let fields = RowFields::new(&eip.name, &eip.status)
            .with_attr("eip_id", &eip_row.id)
            .with_attr("ip_addr", &eip.ip_addr);
        Remote::with(eip, Projection::Ready(fields))
    }

    /// Snapshot fields plus the local id of the source disk, if known.
    pub async fn snapshot(&self, snapshot: SnapshotDesc) -> Remote<SnapshotDesc> {
        let disk_id = match &snapshot.disk_id {
            None => String::new(),
            Some(id) => match self.find(ResourceKind::Disk, id).await {
                Ok(row) => row.map(|r| r.id).unwrap_or_default(),
                Err(e) => {
                    let cause = format!("lookup of disk {id}: {e}");
                    return Remote::with(snapshot, Projection::Failed(cause));
                }
            },
        };
        let fields = snapshot.fields().with_attr("disk_id", disk_id);
        Remote::with(snapshot, Projection::Ready(fields))
    }
}
