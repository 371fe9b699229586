//! Tree walk over one provider account.
//!
//! Per region the walk visits eips, zones, vpcs (wires with their networks,
//! security groups), then each zone's subtree (storages with caches and
//! disks, hosts with their storages, wires and VMs), and finally snapshots.
//! A branch whose remote listing or local listing fails is recorded and its
//! subtree skipped; siblings continue unless the policy aborts the pass.
//! Hosts, VMs and disks that left their parent are removed only after the
//! whole region is walked, so a move between zones keeps the row.

use tracing::{debug, info};

use crate::aggregate::ResultAggregator;
use crate::config::BranchPolicy;
use crate::error::{FailureKind, SyncError};
use crate::executor::{PassContext, Remote, SyncExecutor, Upsert};
use crate::model::{Branch, EntityRef, ResourceKind, ResourceRow};
use crate::provider::{
    CloudProvider, Descriptor, HostDesc, ProviderResult, RegionDesc, StorageDesc, VmDesc, VpcDesc,
    WireDesc, ZoneDesc,
};
use crate::resolve::Resolver;
use crate::result::SyncResult;
use crate::scope::SyncRange;

pub struct TreeWalker<'a> {
    provider: &'a dyn CloudProvider,
    executor: &'a SyncExecutor,
    ctx: &'a PassContext,
    range: &'a SyncRange,
    policy: BranchPolicy,
    agg: ResultAggregator,
    aborted: bool,
    orphans: Vec<(Branch, ResourceRow)>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(
        provider: &'a dyn CloudProvider,
        executor: &'a SyncExecutor,
        ctx: &'a PassContext,
        range: &'a SyncRange,
        policy: BranchPolicy,
        agg: ResultAggregator,
    ) -> Self {
        Self {
            provider,
            executor,
            ctx,
            range,
            policy,
            agg,
            aborted: false,
            orphans: Vec::new(),
        }
    }

    /// Walk the whole tree and hand back the aggregator.
    pub async fn walk(mut self) -> ResultAggregator {
        self.sync_regions().await;
        if self.aborted {
            info!(job = %self.ctx.job_id, "Sync pass stopped after first failed branch");
        }
        self.agg
    }

    fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.executor, self.ctx)
    }

    fn branch_failed(&mut self) {
        if self.policy == BranchPolicy::AbortPass {
            self.aborted = true;
        }
    }

    /// Unwrap a remote listing, recording a failure for the branch.
    fn fetched<T>(&mut self, branch: &Branch, fetched: ProviderResult<Vec<T>>) -> Option<Vec<T>> {
        match fetched {
            Ok(items) => Some(items),
            Err(e) => {
                self.agg
                    .record_failure(SyncError::branch(branch, FailureKind::Fetch, e));
                self.branch_failed();
                None
            }
        }
    }

    /// Run one branch and record its result. Returns the synced pairs, or
    /// `None` if the branch failed and its subtree must be skipped.
    async fn apply<R: Descriptor>(
        &mut self,
        branch: &Branch,
        remote: Vec<Remote<R>>,
    ) -> Option<Vec<(ResourceRow, R)>> {
        let out = self.executor.sync_branch(self.ctx, branch, remote).await;
        let failed = out.result.is_error();
        self.agg.record(branch, out.result);
        self.orphans
            .extend(out.orphans.into_iter().map(|row| (branch.clone(), row)));
        if failed {
            self.branch_failed();
            None
        } else {
            Some(out.pairs)
        }
    }

    /// Count rows the resolver wrote on demand, one result per branch.
    fn record_created(&mut self, created: Vec<(Branch, Upsert)>) {
        let mut results: Vec<(Branch, SyncResult)> = Vec::new();
        for (branch, upsert) in created {
            match results.iter_mut().find(|(b, _)| *b == branch) {
                Some((_, result)) => upsert.count(result),
                None => {
                    let mut result = SyncResult::new();
                    upsert.count(&mut result);
                    results.push((branch, result));
                }
            }
        }
        for (branch, result) in results {
            if !result.is_noop() {
                self.agg.record(&branch, result);
            }
        }
    }

    /// Remove the orphans nobody adopted during the region walk.
    async fn remove_orphans(&mut self) {
        let orphans = std::mem::take(&mut self.orphans);
        if self.aborted {
            if !orphans.is_empty() {
                debug!(count = orphans.len(), "Keeping unlisted rows of an aborted pass");
            }
            return;
        }

        let mut results: Vec<(Branch, SyncResult)> = Vec::new();
        for (branch, row) in orphans {
            let index = match results.iter().position(|(b, _)| *b == branch) {
                Some(index) => index,
                None => {
                    results.push((branch, SyncResult::new()));
                    results.len() - 1
                }
            };
            let (branch, result) = &mut results[index];
            self.executor
                .remove_orphan(self.ctx, branch, row, result)
                .await;
        }
        for (branch, result) in results {
            if !result.is_noop() {
                self.agg.record(&branch, result);
            }
        }
    }

    async fn plain<R: Descriptor>(
        &mut self,
        branch: Branch,
        fetched: ProviderResult<Vec<R>>,
    ) -> Option<Vec<(ResourceRow, R)>> {
        let items = self.fetched(&branch, fetched)?;
        self.apply(&branch, items.into_iter().map(Remote::plain).collect())
            .await
    }

    async fn sync_regions(&mut self) {
        let branch = Branch::new(ResourceKind::Region, self.ctx.provider.clone());
        let fetched = self.provider.list_regions().await;
        let Some(regions) = self.plain(branch, fetched).await else {
            return;
        };

        for (row, region) in regions {
            if self.aborted {
                return;
            }
            if !self.range.allows_region(&row) {
                debug!(region = %region.global_id, "Region outside sync range");
                continue;
            }
            self.sync_region(row.entity(), &region).await;
        }
    }

    async fn sync_region(&mut self, parent: EntityRef, region: &RegionDesc) {
        info!(job = %self.ctx.job_id, region = %region.name, "Syncing region");

        if !self.aborted {
            let fetched = self.provider.list_eips(region).await;
            self.plain(Branch::new(ResourceKind::Eip, parent.clone()), fetched)
                .await;
        }

        let zones = if self.aborted {
            None
        } else {
            let fetched = self.provider.list_zones(region).await;
            self.plain(Branch::new(ResourceKind::Zone, parent.clone()), fetched)
                .await
        };

        if !self.aborted {
            let fetched = self.provider.list_vpcs(region).await;
            if let Some(vpcs) = self
                .plain(Branch::new(ResourceKind::Vpc, parent.clone()), fetched)
                .await
            {
                for (row, vpc) in vpcs {
                    if self.aborted {
                        break;
                    }
                    self.sync_vpc(row.entity(), &vpc).await;
                }
            }
        }

        for (row, zone) in zones.unwrap_or_default() {
            if self.aborted {
                break;
            }
            if !self.range.allows_zone(&row) {
                debug!(zone = %zone.global_id, "Zone outside sync range");
                continue;
            }
            self.sync_zone(row.entity(), &zone, &parent).await;
        }

        if !self.aborted {
            let branch = Branch::new(ResourceKind::Snapshot, parent.clone());
            let fetched = self.provider.list_snapshots(region).await;
            if let Some(snapshots) = self.fetched(&branch, fetched) {
                let resolver = self.resolver();
                let mut remote = Vec::with_capacity(snapshots.len());
                for snapshot in snapshots {
                    remote.push(resolver.snapshot(snapshot).await);
                }
                self.apply(&branch, remote).await;
            }
        }

        self.remove_orphans().await;
    }

    async fn sync_vpc(&mut self, parent: EntityRef, vpc: &VpcDesc) {
        let fetched = self.provider.list_wires(vpc).await;
        if let Some(wires) = self
            .plain(Branch::new(ResourceKind::Wire, parent.clone()), fetched)
            .await
        {
            for (row, wire) in wires {
                if self.aborted {
                    return;
                }
                self.sync_wire(row.entity(), &wire).await;
            }
        }

        if !self.aborted {
            let fetched = self.provider.list_security_groups(vpc).await;
            self.plain(Branch::new(ResourceKind::SecurityGroup, parent), fetched)
                .await;
        }
    }

    async fn sync_wire(&mut self, parent: EntityRef, wire: &WireDesc) {
        let fetched = self.provider.list_networks(wire).await;
        self.plain(Branch::new(ResourceKind::Network, parent), fetched)
            .await;
    }

    async fn sync_zone(&mut self, parent: EntityRef, zone: &ZoneDesc, region: &EntityRef) {
        debug!(job = %self.ctx.job_id, zone = %zone.name, "Syncing zone");

        let fetched = self.provider.list_storages(zone).await;
        if let Some(storages) = self
            .plain(Branch::new(ResourceKind::Storage, parent.clone()), fetched)
            .await
        {
            self.sync_storage_caches(&parent, &storages).await;
            for (row, storage) in storages {
                if self.aborted {
                    return;
                }
                let fetched = self.provider.list_storage_disks(&storage).await;
                self.plain(Branch::new(ResourceKind::Disk, row.entity()), fetched)
                    .await;
            }
        }

        if self.aborted {
            return;
        }
        let fetched = self.provider.list_hosts(zone).await;
        let Some(hosts) = self
            .plain(Branch::new(ResourceKind::Host, parent.clone()), fetched)
            .await
        else {
            return;
        };
        for (row, host) in hosts {
            if self.aborted {
                return;
            }
            if !self.range.allows_host(&row) {
                debug!(host = %host.global_id, "Host outside sync range");
                continue;
            }
            self.sync_host(row.entity(), &host, region).await;
        }
    }

    /// Upsert each storage's cache under the zone and point the storage at
    /// it. Caches are never removed here; several storages may share one.
    async fn sync_storage_caches(&mut self, zone: &EntityRef, storages: &[(ResourceRow, StorageDesc)]) {
        let branch = Branch::new(ResourceKind::StorageCache, zone.clone());
        let mut result = SyncResult::new();

        for (row, storage) in storages {
            let Some(cache) = &storage.cache else {
                continue;
            };
            let upsert = match self
                .executor
                .upsert_child(self.ctx, &branch, &cache.global_id, cache.fields())
                .await
            {
                Ok(upsert) => upsert,
                Err(e) => {
                    result.add_error(SyncError::item(&branch, FailureKind::Insert, &cache.global_id, e));
                    continue;
                }
            };
            upsert.count(&mut result);

            match self
                .executor
                .set_attr(self.ctx, row, "storagecache_id", &upsert.row().id)
                .await
            {
                Ok(_) => {}
                Err(e) => result.update_error(SyncError::item(
                    &branch,
                    FailureKind::Update,
                    &storage.global_id,
                    e,
                )),
            }
        }

        if !result.is_noop() {
            self.agg.record(&branch, result);
        }
    }

    async fn sync_host(&mut self, parent: EntityRef, host: &HostDesc, region: &EntityRef) {
        debug!(job = %self.ctx.job_id, host = %host.name, "Syncing host");

        let branch = Branch::new(ResourceKind::HostStorage, parent.clone());
        let fetched = self.provider.list_host_storages(host).await;
        if let Some(storages) = self.fetched(&branch, fetched) {
            let resolver = self.resolver();
            let mut remote = Vec::with_capacity(storages.len());
            for storage in storages {
                remote.push(resolver.host_storage(storage).await);
            }
            self.apply(&branch, remote).await;
        }

        if self.aborted {
            return;
        }
        let branch = Branch::new(ResourceKind::HostWire, parent.clone());
        let fetched = self.provider.list_host_wires(host).await;
        if let Some(wires) = self.fetched(&branch, fetched) {
            let resolver = self.resolver();
            let mut remote = Vec::with_capacity(wires.len());
            for wire in wires {
                remote.push(resolver.host_wire(wire).await);
            }
            self.apply(&branch, remote).await;
        }

        if self.aborted {
            return;
        }
        let branch = Branch::new(ResourceKind::Guest, parent);
        let fetched = self.provider.list_vms(host).await;
        let Some(vms) = self.fetched(&branch, fetched) else {
            return;
        };
        let resolver = self.resolver();
        let mut remote = Vec::with_capacity(vms.len());
        for vm in vms {
            remote.push(resolver.vm(vm).await);
        }
        let Some(vms) = self.apply(&branch, remote).await else {
            return;
        };
        for (row, vm) in vms {
            if self.aborted {
                return;
            }
            self.sync_vm(row.entity(), &vm, region).await;
        }
    }

    async fn sync_vm(&mut self, parent: EntityRef, vm: &VmDesc, region: &EntityRef) {
        let branch = Branch::new(ResourceKind::GuestNic, parent.clone());
        let fetched = self.provider.list_vm_nics(vm).await;
        if let Some(nics) = self.fetched(&branch, fetched) {
            let resolver = self.resolver();
            let mut remote = Vec::with_capacity(nics.len());
            for nic in nics {
                remote.push(resolver.vm_nic(nic).await);
            }
            self.apply(&branch, remote).await;
        }

        if self.aborted {
            return;
        }
        let branch = Branch::new(ResourceKind::GuestDisk, parent.clone());
        let fetched = self.provider.list_vm_disks(vm).await;
        if let Some(disks) = self.fetched(&branch, fetched) {
            let mut resolver = self.resolver();
            let mut remote = Vec::with_capacity(disks.len());
            for disk in disks {
                remote.push(resolver.vm_disk(disk).await);
            }
            self.record_created(resolver.into_created());
            self.apply(&branch, remote).await;
        }

        if self.aborted {
            return;
        }
        let branch = Branch::new(ResourceKind::GuestEip, parent);
        let fetched = self
            .provider
            .vm_eip(vm)
            .await
            .map(|eip| eip.into_iter().collect::<Vec<_>>());
        if let Some(eips) = self.fetched(&branch, fetched) {
            let mut resolver = self.resolver();
            let mut remote = Vec::with_capacity(eips.len());
            for eip in eips {
                remote.push(resolver.vm_eip(eip, region).await);
            }
            self.record_created(resolver.into_created());
            self.apply(&branch, remote).await;
        }
    }
}
