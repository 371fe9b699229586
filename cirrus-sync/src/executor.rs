//! Per-branch sync executor.
//!
//! One call reconciles the children of one kind under one parent: lock the
//! parent, list local children, diff against the remote set, then apply
//! removals, updates and additions in that order. Item failures are counted
//! and the branch carries on; only a failed local listing fails the branch.
//!
//! Rows of movable kinds that vanished from their parent are not removed by
//! the branch. They are handed back as orphans, so a later branch can adopt
//! them, and removed with [`SyncExecutor::remove_orphan`] once the caller
//! knows nobody did.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::diff::{RemoteKeyed, diff};
use crate::error::{FailureKind, SyncError};
use crate::events::{Action, EventSink};
use crate::lock::EntityLocks;
use crate::model::{Branch, EntityRef, ResourceRow, RowFields, diff_string};
use crate::provider::Descriptor;
use crate::result::SyncResult;
use crate::store::{DataStore, StoreError};

/// Identity of the running pass.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub job_id: String,
    pub provider: EntityRef,
}

impl PassContext {
    pub fn provider_id(&self) -> &str {
        &self.provider.id
    }
}

/// How a remote record maps onto a local row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Ready(RowFields),
    /// Not mirrored locally; an existing row is left untouched.
    Skip(String),
    /// A reference could not be resolved; counted as an item error.
    Failed(String),
}

/// A remote record paired with its local projection.
#[derive(Debug, Clone)]
pub struct Remote<R> {
    pub desc: R,
    pub projection: Projection,
}

impl<R: Descriptor> Remote<R> {
    /// Remote record whose fields need no lookups.
    pub fn plain(desc: R) -> Self {
        let projection = Projection::Ready(desc.fields());
        Self { desc, projection }
    }

    pub fn with(desc: R, projection: Projection) -> Self {
        Self { desc, projection }
    }
}

impl<R: Descriptor> RemoteKeyed for Remote<R> {
    fn global_id(&self) -> &str {
        self.desc.global_id()
    }
}

/// Outcome of one branch: counters plus the (row, descriptor) pairs that
/// exist after the sync, kept ones first, then added ones.
pub struct BranchSync<R> {
    pub result: SyncResult,
    pub pairs: Vec<(ResourceRow, R)>,
    /// Movable rows the provider no longer lists under this parent.
    pub orphans: Vec<ResourceRow>,
}

impl<R> BranchSync<R> {
    fn failed(result: SyncResult) -> Self {
        Self {
            result,
            pairs: Vec::new(),
            orphans: Vec::new(),
        }
    }
}

/// Applies remote state to the store, one branch at a time.
pub struct SyncExecutor {
    store: Arc<dyn DataStore>,
    locks: Arc<EntityLocks>,
    sink: Arc<dyn EventSink>,
}

impl SyncExecutor {
    pub fn new(store: Arc<dyn DataStore>, locks: Arc<EntityLocks>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, locks, sink }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Reconcile the children of `branch` with `remote`.
    pub async fn sync_branch<R: Descriptor>(
        &self,
        ctx: &PassContext,
        branch: &Branch,
        remote: Vec<Remote<R>>,
    ) -> BranchSync<R> {
        let _guard = self.locks.acquire(&branch.parent.id).await;
        let mut result = SyncResult::new();

        let local = match self
            .store
            .list_children(branch.kind, &branch.parent.id)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                result.fail(SyncError::branch(branch, FailureKind::List, e));
                return BranchSync::failed(result);
            }
        };

        let remote = dedupe(branch, remote, &mut result);
        let partition = diff(local, remote);
        let mut pairs = Vec::with_capacity(partition.to_keep.len() + partition.to_add.len());
        let mut orphans = Vec::new();

        for row in partition.to_remove {
            if branch.kind.is_movable() {
                orphans.push(row);
            } else {
                self.remove(ctx, branch, row, &mut result).await;
            }
        }

        for (row, remote) in partition.to_keep {
            let row = self.update(ctx, branch, row, remote.projection, &mut result).await;
            pairs.push((row, remote.desc));
        }

        for remote in partition.to_add {
            if let Some(row) = self.add(ctx, branch, &remote.desc, remote.projection, &mut result).await {
                pairs.push((row, remote.desc));
            }
        }

        if !partition.untracked.is_empty() {
            debug!(
                branch = %branch,
                count = partition.untracked.len(),
                "Leaving rows without external id alone"
            );
        }

        BranchSync {
            result,
            pairs,
            orphans,
        }
    }

    /// Remove an orphan of `branch` unless another parent adopted it in
    /// the meantime.
    pub async fn remove_orphan(
        &self,
        ctx: &PassContext,
        branch: &Branch,
        orphan: ResourceRow,
        result: &mut SyncResult,
    ) {
        let _guard = self.locks.acquire(&branch.parent.id).await;
        let label = orphan.external_id.clone().unwrap_or_else(|| orphan.id.clone());

        match self.store.get_resource(&orphan.id).await {
            Ok(Some(current)) if current.parent_id == branch.parent.id => {
                self.remove(ctx, branch, current, result).await;
            }
            Ok(Some(current)) => {
                debug!(branch = %branch, id = %current.id, to = %current.parent_id, "Kept {label}, it moved");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(branch = %branch, id = %orphan.id, "Remove failed: {e}");
                result.delete_error(SyncError::item(branch, FailureKind::Delete, label, e));
            }
        }
    }

    async fn remove(&self, ctx: &PassContext, branch: &Branch, row: ResourceRow, result: &mut SyncResult) {
        let label = row.external_id.clone().unwrap_or_else(|| row.id.clone());
        match self.store.soft_delete(&row.id).await {
            Ok(_) => {
                debug!(branch = %branch, id = %row.id, "Removed {}", label);
                result.delete();
                self.sink.log_event(
                    &ctx.job_id,
                    &row.entity(),
                    Action::SyncDelete,
                    &format!("removed from {}", branch.parent),
                );
            }
            Err(e) => {
                warn!(branch = %branch, id = %row.id, "Remove failed: {e}");
                result.delete_error(SyncError::item(branch, FailureKind::Delete, label, e));
            }
        }
    }

    async fn update(
        &self,
        ctx: &PassContext,
        branch: &Branch,
        row: ResourceRow,
        projection: Projection,
        result: &mut SyncResult,
    ) -> ResourceRow {
        let label = row.external_id.clone().unwrap_or_default();
        let fields = match projection {
            Projection::Ready(fields) => fields,
            Projection::Skip(reason) => {
                debug!(branch = %branch, item = %label, "Skipping update: {reason}");
                return row;
            }
            Projection::Failed(cause) => {
                result.update_error(SyncError::item(branch, FailureKind::Resolve, label, cause));
                return row;
            }
        };

        let changes = row.changes(&fields);
        if changes.is_empty() {
            return row;
        }
        let diff = diff_string(&changes);

        match self
            .store
            .update_resource(&row.id, Box::new(move |r: &mut ResourceRow| r.apply(fields)))
            .await
        {
            Ok(updated) => {
                debug!(branch = %branch, id = %updated.id, "Updated {label}: {diff}");
                result.update();
                self.sink
                    .log_event(&ctx.job_id, &updated.entity(), Action::SyncUpdate, &diff);
                updated
            }
            Err(e) => {
                warn!(branch = %branch, id = %row.id, "Update failed: {e}");
                result.update_error(SyncError::item(branch, FailureKind::Update, label, e));
                row
            }
        }
    }

    async fn add<R: Descriptor>(
        &self,
        ctx: &PassContext,
        branch: &Branch,
        desc: &R,
        projection: Projection,
        result: &mut SyncResult,
    ) -> Option<ResourceRow> {
        let global_id = desc.global_id().to_string();
        let fields = match projection {
            Projection::Ready(fields) => fields,
            Projection::Skip(reason) => {
                debug!(branch = %branch, item = %global_id, "Not adding: {reason}");
                return None;
            }
            Projection::Failed(cause) => {
                result.add_error(SyncError::item(branch, FailureKind::Resolve, global_id, cause));
                return None;
            }
        };

        if branch.kind.is_movable() {
            match self
                .store
                .find_by_external_id(ctx.provider_id(), branch.kind, &global_id)
                .await
            {
                Ok(Some(existing)) => {
                    return self.adopt(ctx, branch, existing, fields, result).await;
                }
                Ok(None) => {}
                Err(e) => {
                    result.add_error(SyncError::item(branch, FailureKind::Insert, global_id, e));
                    return None;
                }
            }
        }

        let row = ResourceRow::new(
            branch.kind,
            ctx.provider_id(),
            &branch.parent.id,
            Some(global_id.clone()),
            fields,
        );
        match self.store.insert_resource(&row).await {
            Ok(()) => {
                debug!(branch = %branch, id = %row.id, "Added {global_id}");
                result.add();
                self.sink.log_event(
                    &ctx.job_id,
                    &row.entity(),
                    Action::SyncCreate,
                    &format!("created under {}", branch.parent),
                );
                Some(row)
            }
            Err(e) => {
                warn!(branch = %branch, "Add {global_id} failed: {e}");
                result.add_error(SyncError::item(branch, FailureKind::Insert, global_id, e));
                None
            }
        }
    }

    /// Move a row that the provider now reports under this parent.
    async fn adopt(
        &self,
        ctx: &PassContext,
        branch: &Branch,
        existing: ResourceRow,
        fields: RowFields,
        result: &mut SyncResult,
    ) -> Option<ResourceRow> {
        let label = existing.external_id.clone().unwrap_or_default();
        let old_parent = existing.parent_id.clone();
        let new_parent = branch.parent.id.clone();

        let mutator = {
            let new_parent = new_parent.clone();
            Box::new(move |r: &mut ResourceRow| {
                r.parent_id = new_parent;
                r.apply(fields);
            })
        };
        match self.store.update_resource(&existing.id, mutator).await {
            Ok(moved) => {
                debug!(branch = %branch, id = %moved.id, from = %old_parent, "Moved {label}");
                result.update();
                self.sink.log_event(
                    &ctx.job_id,
                    &moved.entity(),
                    Action::SyncUpdate,
                    &format!("parent_id: {old_parent} => {new_parent}"),
                );
                Some(moved)
            }
            Err(e) => {
                warn!(branch = %branch, id = %existing.id, "Move failed: {e}");
                result.add_error(SyncError::item(branch, FailureKind::Update, label, e));
                None
            }
        }
    }
}

/// Outcome of [`SyncExecutor::upsert_child`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Added(ResourceRow),
    Updated(ResourceRow),
    Unchanged(ResourceRow),
}

impl Upsert {
    pub fn row(&self) -> &ResourceRow {
        match self {
            Upsert::Added(row) | Upsert::Updated(row) | Upsert::Unchanged(row) => row,
        }
    }

    /// Count the outcome into `result`.
    pub fn count(&self, result: &mut SyncResult) {
        match self {
            Upsert::Added(_) => result.add(),
            Upsert::Updated(_) => result.update(),
            Upsert::Unchanged(_) => {}
        }
    }
}

impl SyncExecutor {
    /// Make sure a single child exists and matches `fields`, without
    /// touching its siblings. The row is looked up by external id across
    /// the whole provider.
    pub async fn upsert_child(
        &self,
        ctx: &PassContext,
        branch: &Branch,
        global_id: &str,
        fields: RowFields,
    ) -> Result<Upsert, StoreError> {
        let _guard = self.locks.acquire(&branch.parent.id).await;

        let existing = self
            .store
            .find_by_external_id(ctx.provider_id(), branch.kind, global_id)
            .await?;
        match existing {
            Some(row) => {
                let changes = row.changes(&fields);
                if changes.is_empty() {
                    return Ok(Upsert::Unchanged(row));
                }
                let diff = diff_string(&changes);
                let updated = self
                    .store
                    .update_resource(&row.id, Box::new(move |r: &mut ResourceRow| r.apply(fields)))
                    .await?;
                self.sink
                    .log_event(&ctx.job_id, &updated.entity(), Action::SyncUpdate, &diff);
                Ok(Upsert::Updated(updated))
            }
            None => {
                let row = ResourceRow::new(
                    branch.kind,
                    ctx.provider_id(),
                    &branch.parent.id,
                    Some(global_id.to_string()),
                    fields,
                );
                self.store.insert_resource(&row).await?;
                debug!(branch = %branch, id = %row.id, "Added {global_id}");
                self.sink.log_event(
                    &ctx.job_id,
                    &row.entity(),
                    Action::SyncCreate,
                    &format!("created under {}", branch.parent),
                );
                Ok(Upsert::Added(row))
            }
        }
    }

    /// Set one attribute on a row if it differs. Returns the updated row,
    /// or `None` when nothing changed.
    pub async fn set_attr(
        &self,
        ctx: &PassContext,
        row: &ResourceRow,
        key: &str,
        value: &str,
    ) -> Result<Option<ResourceRow>, StoreError> {
        let _guard = self.locks.acquire(&row.parent_id).await;

        let old = row.attr(key).unwrap_or("").to_string();
        if old == value {
            return Ok(None);
        }
        let (k, v) = (key.to_string(), value.to_string());
        let updated = self
            .store
            .update_resource(
                &row.id,
                Box::new(move |r: &mut ResourceRow| {
                    r.attrs.insert(k, v);
                }),
            )
            .await?;
        self.sink.log_event(
            &ctx.job_id,
            &updated.entity(),
            Action::SyncUpdate,
            &format!("{key}: {old} => {value}"),
        );
        Ok(Some(updated))
    }
}

/// Drop repeated global ids, keeping the first occurrence.
fn dedupe<R: Descriptor>(
    branch: &Branch,
    remote: Vec<Remote<R>>,
    result: &mut SyncResult,
) -> Vec<Remote<R>> {
    let mut seen = HashSet::with_capacity(remote.len());
    let mut unique = Vec::with_capacity(remote.len());
    for r in remote {
        if seen.insert(r.desc.global_id().to_string()) {
            unique.push(r);
        } else {
            warn!(branch = %branch, id = %r.desc.global_id(), "Provider listed id twice");
            result.item_error(SyncError::item(
                branch,
                FailureKind::Duplicate,
                r.desc.global_id(),
                "listed more than once",
            ));
        }
    }
    unique
}
