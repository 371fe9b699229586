//! End-to-end sync passes against an in-memory inventory.

mod common;

use std::sync::Arc;

use cirrus_sync::model::ResourceKind;
use cirrus_sync::provider::EipDesc;
use cirrus_sync::store::{MemoryStore, ProviderStatus, ProviderStore};
use cirrus_sync::{
    Action, BranchPolicy, FailureKind, JobStatus, SyncEngine, SyncEvent, SyncRange, SyncReport,
};

use common::*;

async fn setup() -> (Arc<MemoryStore>, Arc<RecordingSink>, SyncEngine, FaultyProvider) {
    let store = Arc::new(MemoryStore::new());
    store.upsert_provider(PROVIDER_ID, "acme").await.unwrap();
    let sink = RecordingSink::new();
    let engine = SyncEngine::new(store.clone(), sink.clone());
    (store, sink, engine, FaultyProvider::new(inventory()))
}

#[tokio::test]
async fn full_pass_mirrors_inventory() {
    let (store, _sink, engine, provider) = setup().await;

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::Completed, "{}", report.summary());
    assert!(report.full_sync);
    assert_eq!(report.totals.added, 27);
    assert_eq!(report.totals.branches_failed, 0);

    let expected = [
        (ResourceKind::Region, 1),
        (ResourceKind::Zone, 2),
        (ResourceKind::Eip, 2),
        (ResourceKind::Vpc, 1),
        (ResourceKind::Wire, 1),
        (ResourceKind::Network, 1),
        (ResourceKind::SecurityGroup, 1),
        (ResourceKind::Snapshot, 1),
        (ResourceKind::Storage, 2),
        (ResourceKind::StorageCache, 1),
        (ResourceKind::Disk, 3),
        (ResourceKind::Host, 3),
        (ResourceKind::HostStorage, 1),
        (ResourceKind::HostWire, 1),
        (ResourceKind::Guest, 3),
        (ResourceKind::GuestNic, 1),
        (ResourceKind::GuestDisk, 1),
        (ResourceKind::GuestEip, 1),
    ];
    for (kind, count) in expected {
        assert_eq!(live(&store, kind).await.len(), count, "{kind}");
    }

    let record = store.get_provider(PROVIDER_ID).await.unwrap().unwrap();
    assert_eq!(record.status, ProviderStatus::Connected);
    assert_eq!(record.sys_info.unwrap().account, "acct-1");
}

#[tokio::test]
async fn second_pass_is_a_noop() {
    let (store, sink, engine, provider) = setup().await;

    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    let before = store.all_rows().await;
    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.totals.added, 0);
    assert_eq!(report.totals.updated, 0);
    assert_eq!(report.totals.deleted, 0);
    assert!(report.totals.changes_by_kind.is_empty());
    assert_eq!(store.all_rows().await, before);

    // Only the closing audit; no branch changed anything.
    let audits = sink.audits_for(&report.job_id);
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].0, Action::CloudFullSync);
    assert_eq!(sink.events_for(&report.job_id, Action::SyncCreate), 0);
}

#[tokio::test]
async fn associations_point_at_local_rows() {
    let (store, _sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    let sg = live_one(&store, ResourceKind::SecurityGroup, "sg-1").await;
    let net = live_one(&store, ResourceKind::Network, "n-1").await;
    let disk = live_one(&store, ResourceKind::Disk, "d-1").await;
    let eip = live_one(&store, ResourceKind::Eip, "eip-1").await;
    let storage = live_one(&store, ResourceKind::Storage, "st-1").await;
    let cache = live_one(&store, ResourceKind::StorageCache, "sc-1").await;
    let wire = live_one(&store, ResourceKind::Wire, "w-1").await;
    let vm = live_one(&store, ResourceKind::Guest, "i-1").await;
    let host = live_one(&store, ResourceKind::Host, "h-1").await;

    assert_eq!(vm.parent_id, host.id);
    assert_eq!(vm.attr("secgroup_id"), Some(sg.id.as_str()));
    assert_eq!(storage.attr("storagecache_id"), Some(cache.id.as_str()));

    let nic = live_one(&store, ResourceKind::GuestNic, "00:16:3e:00:00:01").await;
    assert_eq!(nic.parent_id, vm.id);
    assert_eq!(nic.attr("network_id"), Some(net.id.as_str()));
    assert_eq!(nic.attr("ip"), Some("10.0.0.5"));

    let guest_disk = live_one(&store, ResourceKind::GuestDisk, "d-1").await;
    assert_eq!(guest_disk.attr("disk_id"), Some(disk.id.as_str()));

    let guest_eip = live_one(&store, ResourceKind::GuestEip, "eip-1").await;
    assert_eq!(guest_eip.attr("eip_id"), Some(eip.id.as_str()));
    assert_eq!(guest_eip.attr("ip_addr"), Some("203.0.113.10"));

    let host_storage = live_one(&store, ResourceKind::HostStorage, "st-1").await;
    assert_eq!(host_storage.parent_id, host.id);
    assert_eq!(host_storage.attr("storage_id"), Some(storage.id.as_str()));
    let host_wire = live_one(&store, ResourceKind::HostWire, "w-1").await;
    assert_eq!(host_wire.attr("wire_id"), Some(wire.id.as_str()));

    let snapshot = live_one(&store, ResourceKind::Snapshot, "snap-1").await;
    assert_eq!(snapshot.attr("disk_id"), Some(disk.id.as_str()));
}

#[tokio::test]
async fn remote_removals_are_soft_deleted() {
    let (store, sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    let mut inv = inventory();
    let region = &mut inv.regions[0];
    region.eips.retain(|e| e.global_id != "eip-2");
    region.zones[0].hosts.retain(|h| h.host.global_id != "h-2");
    region.zones[0].hosts[0].vms[0].eip = None;
    provider.inner().replace(inv).await;

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.totals.deleted, 3);
    assert_eq!(report.totals.added, 0);
    assert!(live(&store, ResourceKind::GuestEip).await.is_empty());
    assert_eq!(live(&store, ResourceKind::Eip).await.len(), 1);

    let removed = store
        .all_rows()
        .await
        .into_iter()
        .find(|r| r.external_id.as_deref() == Some("h-2"))
        .unwrap();
    assert!(removed.deleted);
    assert_eq!(sink.events_for(&report.job_id, Action::SyncDelete), 3);
}

#[tokio::test]
async fn field_changes_update_in_place() {
    let (store, sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    let before = live_one(&store, ResourceKind::Guest, "i-1").await;

    let mut inv = inventory();
    let vm = &mut inv.regions[0].zones[0].hosts[0].vms[0].vm;
    vm.status = "stopped".to_string();
    vm.vcpu_count = 4;
    provider.inner().replace(inv).await;

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.totals.updated, 1);
    assert_eq!(report.totals.changes_by_kind.get(&ResourceKind::Guest), Some(&1));
    let after = live_one(&store, ResourceKind::Guest, "i-1").await;
    assert_eq!(after.id, before.id);
    assert_eq!(after.status, "stopped");
    assert_eq!(after.attr("vcpu_count"), Some("4"));
    assert_eq!(after.attr("secgroup_id"), before.attr("secgroup_id"));
    assert_eq!(sink.events_for(&report.job_id, Action::SyncUpdate), 1);
}

#[tokio::test]
async fn host_moves_between_zones_keep_their_row() {
    let (store, _sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    let host = live_one(&store, ResourceKind::Host, "h-3").await;
    let vm = live_one(&store, ResourceKind::Guest, "i-3").await;

    let mut inv = inventory();
    let moved = inv.regions[0].zones[1].hosts.remove(0);
    inv.regions[0].zones[0].hosts.push(moved);
    provider.inner().replace(inv).await;

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.totals.deleted, 0);
    assert_eq!(report.totals.added, 0);
    let zone = live_one(&store, ResourceKind::Zone, "z-1").await;
    let after = live_one(&store, ResourceKind::Host, "h-3").await;
    assert_eq!(after.id, host.id);
    assert_eq!(after.parent_id, zone.id);
    assert_eq!(live_one(&store, ResourceKind::Guest, "i-3").await.id, vm.id);
}

#[tokio::test]
async fn host_moves_to_a_later_zone_keep_their_row() {
    let (store, _sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    let host = live_one(&store, ResourceKind::Host, "h-1").await;
    let vm = live_one(&store, ResourceKind::Guest, "i-1").await;

    // z-1 is walked before z-2, so the host goes missing before it shows up
    let mut inv = inventory();
    let moved = inv.regions[0].zones[0].hosts.remove(0);
    inv.regions[0].zones[1].hosts.push(moved);
    provider.inner().replace(inv).await;

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::Completed, "{}", report.summary());
    assert_eq!(report.totals.added, 0);
    assert_eq!(report.totals.deleted, 0);
    assert_eq!(report.totals.updated, 1);
    let zone = live_one(&store, ResourceKind::Zone, "z-2").await;
    let after = live_one(&store, ResourceKind::Host, "h-1").await;
    assert_eq!(after.id, host.id);
    assert_eq!(after.parent_id, zone.id);
    assert_eq!(live_one(&store, ResourceKind::Guest, "i-1").await.id, vm.id);
    for kind in [ResourceKind::HostStorage, ResourceKind::HostWire] {
        let links = live(&store, kind).await;
        assert_eq!(links.len(), 1, "{kind}");
        assert_eq!(links[0].parent_id, host.id);
    }
}

#[tokio::test]
async fn failed_branch_skips_only_its_subtree() {
    let (store, _sink, engine, provider) = setup().await;
    provider.fail("list_vms", "h-1");

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::CompletedWithErrors);
    assert_eq!(report.totals.branches_failed, 1);
    let failed = report.failed_branches();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, FailureKind::Fetch);
    assert_eq!(failed[0].branch.kind, ResourceKind::Guest);
    assert_eq!(failed[0].branch.parent.name, "host-1");

    assert!(!provider.called("list_vm_nics:i-1"));
    assert!(provider.called("list_vm_nics:i-2"));
    let vms: Vec<_> = live(&store, ResourceKind::Guest)
        .await
        .into_iter()
        .filter_map(|r| r.external_id)
        .collect();
    assert_eq!(vms, vec!["i-2", "i-3"]);
    assert_eq!(live(&store, ResourceKind::HostStorage).await.len(), 1);
    assert!(live(&store, ResourceKind::GuestNic).await.is_empty());
}

#[tokio::test]
async fn failed_fetch_leaves_existing_rows_alone() {
    let (store, _sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    provider.reset_calls();
    provider.fail("list_hosts", "z-1");
    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::CompletedWithErrors);
    assert_eq!(report.totals.deleted, 0);
    assert_eq!(live(&store, ResourceKind::Host).await.len(), 3);
    assert_eq!(live(&store, ResourceKind::Guest).await.len(), 3);
    assert!(!provider.called("list_vms:h-1"));
    assert!(provider.called("list_vms:h-3"));
}

#[tokio::test]
async fn abort_policy_stops_after_first_failure() {
    let store = Arc::new(MemoryStore::new());
    store.upsert_provider(PROVIDER_ID, "acme").await.unwrap();
    let engine =
        SyncEngine::new(store.clone(), RecordingSink::new()).with_policy(BranchPolicy::AbortPass);
    let provider = FaultyProvider::new(inventory());
    provider.fail("list_eips", "r-1");

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::CompletedWithErrors);
    assert_eq!(live(&store, ResourceKind::Region).await.len(), 1);
    assert!(!provider.called("list_zones:r-1"));
    assert!(!provider.called("list_snapshots:r-1"));
    assert!(live(&store, ResourceKind::Zone).await.is_empty());
}

#[tokio::test]
async fn skip_policy_continues_with_siblings() {
    let (store, _sink, engine, provider) = setup().await;
    provider.fail("list_eips", "r-1");

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::CompletedWithErrors);
    assert_eq!(live(&store, ResourceKind::Zone).await.len(), 2);
    // The bound eip is created on demand while linking the VM; the spare
    // one waits for the next pass.
    let eips: Vec<_> = live(&store, ResourceKind::Eip)
        .await
        .into_iter()
        .filter_map(|r| r.external_id)
        .collect();
    assert_eq!(eips, vec!["eip-1"]);
    assert_eq!(live(&store, ResourceKind::GuestEip).await.len(), 1);
}

#[tokio::test]
async fn rows_created_while_linking_are_counted() {
    let (_store, sink, engine, provider) = setup().await;
    provider.fail("list_eips", "r-1");
    provider.fail("list_storage_disks", "st-1");

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    // eip-1 and d-1 only exist through the links of i-1
    let created = sink.events_for(&report.job_id, Action::SyncCreate) as u32;
    assert_eq!(report.totals.added, created);
    assert_eq!(report.totals.added, 25);
    assert_eq!(report.totals.changes_by_kind.get(&ResourceKind::Eip), Some(&1));
    assert_eq!(report.totals.changes_by_kind.get(&ResourceKind::Disk), Some(&2));
}

#[tokio::test]
async fn probe_failure_disconnects_provider() {
    let (store, sink, engine, provider) = setup().await;
    provider.fail("sys_info", "");

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert!(report.status.is_failed());
    assert_eq!(provider.calls(), vec!["sys_info:"]);
    assert!(store.all_rows().await.is_empty());
    let record = store.get_provider(PROVIDER_ID).await.unwrap().unwrap();
    assert_eq!(record.status, ProviderStatus::Disconnected);
    assert!(record.status_reason.contains("injected failure"));
    assert!(
        sink.audits_for(&report.job_id)
            .iter()
            .any(|(a, _, ok)| *a == Action::SetStatus && !ok)
    );

    provider.heal();
    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    assert_eq!(report.status, JobStatus::Completed);
    let record = store.get_provider(PROVIDER_ID).await.unwrap().unwrap();
    assert_eq!(record.status, ProviderStatus::Connected);
    assert!(record.status_reason.is_empty());
}

#[tokio::test]
async fn unregistered_provider_fails_without_calls() {
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(store, RecordingSink::new());
    let provider = FaultyProvider::new(inventory());

    let report = engine.run(&provider, "nobody", SyncRange::full()).await;

    assert!(report.status.is_failed());
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn zone_range_prunes_other_zones() {
    let (store, _sink, engine, provider) = setup().await;
    let range = SyncRange {
        zones: vec!["z-2".to_string()],
        ..SyncRange::default()
    };

    let report = engine.run(&provider, PROVIDER_ID, range).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(!report.full_sync);
    assert!(provider.called("list_hosts:z-2"));
    for call in provider.calls() {
        assert!(
            !call.ends_with(":z-1") && !call.ends_with(":h-1") && !call.ends_with(":st-1"),
            "{call} is outside the range"
        );
    }
    let hosts: Vec<_> = live(&store, ResourceKind::Host)
        .await
        .into_iter()
        .filter_map(|r| r.external_id)
        .collect();
    assert_eq!(hosts, vec!["h-3"]);
}

#[tokio::test]
async fn host_range_walks_only_that_host() {
    let (_store, _sink, engine, provider) = setup().await;
    engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    provider.reset_calls();

    let range = SyncRange {
        hosts: vec!["h-3".to_string()],
        ..SyncRange::default()
    };
    let report = engine.run(&provider, PROVIDER_ID, range).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(provider.called("list_vms:h-3"));
    assert!(!provider.called("list_hosts:z-1"));
    assert!(!provider.called("list_vms:h-1"));
    assert!(!provider.called("list_vms:h-2"));
}

#[tokio::test]
async fn probe_only_range_skips_the_walk() {
    let (store, _sink, engine, provider) = setup().await;

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::default()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(provider.calls(), vec!["sys_info:"]);
    assert!(store.all_rows().await.is_empty());
}

fn eip(id: &str, name: &str) -> EipDesc {
    EipDesc {
        global_id: id.to_string(),
        name: name.to_string(),
        status: "available".to_string(),
        ip_addr: "198.51.100.1".to_string(),
        bandwidth_mbps: 0,
        charge_type: String::new(),
    }
}

fn item_failures(report: &SyncReport) -> Vec<(FailureKind, String)> {
    let mut failures: Vec<_> = report
        .events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::ItemFailed { error } => {
                Some((error.kind, error.item.clone().unwrap_or_default()))
            }
            _ => None,
        })
        .collect();
    failures.sort_by(|a, b| a.1.cmp(&b.1));
    failures
}

#[tokio::test]
async fn store_failures_stay_with_their_item() {
    let store = FlakyStore::new();
    store.upsert_provider(PROVIDER_ID, "acme").await.unwrap();
    let engine = SyncEngine::new(store.clone(), RecordingSink::new());

    let mut inv = inventory();
    for id in ["eip-3", "eip-4", "eip-5"] {
        inv.regions[0].eips.push(eip(id, id));
    }
    let provider = FaultyProvider::new(inv);
    let first = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;
    assert_eq!(first.status, JobStatus::Completed, "{}", first.summary());

    // eip-3 and eip-4 go away, eip-2 and eip-5 change, eip-6 and eip-7 appear
    let mut inv = inventory();
    let eips = &mut inv.regions[0].eips;
    eips[1].name = "renamed".to_string();
    eips.push(eip("eip-5", "renamed"));
    eips.push(eip("eip-6", "eip-6"));
    eips.push(eip("eip-7", "eip-7"));
    provider.inner().replace(inv).await;
    for id in ["eip-4", "eip-5", "eip-7"] {
        store.fail_writes(id);
    }

    let report = engine.run(&provider, PROVIDER_ID, SyncRange::full()).await;

    assert_eq!(report.status, JobStatus::CompletedWithErrors);
    assert_eq!(report.totals.branches_failed, 0);
    assert_eq!(report.totals.errors, 3);
    assert_eq!(report.totals.added, 1);
    assert_eq!(report.totals.updated, 1);
    assert_eq!(report.totals.deleted, 1);
    assert_eq!(
        item_failures(&report),
        vec![
            (FailureKind::Delete, "eip-4".to_string()),
            (FailureKind::Update, "eip-5".to_string()),
            (FailureKind::Insert, "eip-7".to_string()),
        ]
    );

    let mut live_eips: Vec<_> = live(store.inner(), ResourceKind::Eip)
        .await
        .into_iter()
        .map(|r| (r.external_id.unwrap_or_default(), r.name))
        .collect();
    live_eips.sort();
    assert_eq!(
        live_eips,
        vec![
            ("eip-1".to_string(), "web-ip".to_string()),
            ("eip-2".to_string(), "renamed".to_string()),
            ("eip-4".to_string(), "eip-4".to_string()),
            ("eip-5".to_string(), "eip-5".to_string()),
            ("eip-6".to_string(), "eip-6".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_local_listing_fails_only_that_branch() {
    let store = FlakyStore::new();
    store.upsert_provider(PROVIDER_ID, "acme").await.unwrap();
    let engine = SyncEngine::new(store.clone(), RecordingSink::new());
    store.fail_list(ResourceKind::Network);

    let report = engine
        .run(&FaultyProvider::new(inventory()), PROVIDER_ID, SyncRange::full())
        .await;

    assert_eq!(report.status, JobStatus::CompletedWithErrors);
    assert_eq!(report.totals.branches_failed, 1);
    let failed = report.failed_branches();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, FailureKind::List);
    assert_eq!(failed[0].branch.kind, ResourceKind::Network);

    assert!(live(store.inner(), ResourceKind::Network).await.is_empty());
    assert_eq!(live(store.inner(), ResourceKind::SecurityGroup).await.len(), 1);
    assert_eq!(live(store.inner(), ResourceKind::Host).await.len(), 3);
    // the nic of i-1 points at the network that never got mirrored
    assert_eq!(
        item_failures(&report),
        vec![(FailureKind::Resolve, "00:16:3e:00:00:01".to_string())]
    );
}
