//! One sync pass over a provider account.
//!
//! The pass marks the start on the provider record, probes the account,
//! stores its sys info, walks the tree if the range asks for it, and
//! finally marks the provider connected. A failed probe marks it
//! disconnected and fails the job; nothing is walked in that case.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::aggregate::{ResultAggregator, SyncReport};
use crate::config::BranchPolicy;
use crate::error::TaskError;
use crate::events::{Action, EventSink};
use crate::executor::{PassContext, SyncExecutor};
use crate::lock::EntityLocks;
use crate::model::{EntityRef, ResourceKind};
use crate::provider::CloudProvider;
use crate::scope::SyncRange;
use crate::store::{DataStore, ProviderStatus};
use crate::walker::TreeWalker;

/// Runs sync passes against one store. Cheap to share; concurrent passes
/// serialize on the per-entity locks.
pub struct SyncEngine {
    store: Arc<dyn DataStore>,
    sink: Arc<dyn EventSink>,
    locks: Arc<EntityLocks>,
    policy: BranchPolicy,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn DataStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            sink,
            locks: Arc::new(EntityLocks::new()),
            policy: BranchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BranchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Run one pass. Always returns a report; precondition failures show
    /// up as [`crate::JobStatus::Failed`].
    pub async fn run(
        &self,
        provider: &dyn CloudProvider,
        provider_id: &str,
        range: SyncRange,
    ) -> SyncReport {
        let job_id = Uuid::new_v4().to_string();

        let entity = match self.store.get_provider(provider_id).await {
            Ok(Some(record)) => EntityRef::new(ResourceKind::Provider, record.id, record.name),
            Ok(None) => {
                let err = TaskError::UnknownProvider(provider_id.to_string());
                return self.fail_early(&job_id, provider_id, &range, err);
            }
            Err(e) => return self.fail_early(&job_id, provider_id, &range, e.into()),
        };

        let ctx = PassContext { job_id, provider: entity };
        let agg = ResultAggregator::new(
            ctx.job_id.clone(),
            ctx.provider.clone(),
            range.full_sync,
            Arc::clone(&self.sink),
        );
        info!(job = %ctx.job_id, provider = %ctx.provider.name, full = range.full_sync, "Sync pass started");

        if let Err(e) = self.probe(provider, &ctx).await {
            error!(job = %ctx.job_id, provider = %ctx.provider.id, "Sync precondition failed: {e}");
            self.set_status(&ctx, ProviderStatus::Disconnected, &e.to_string())
                .await;
            return agg.finish(Some(e.to_string()));
        }

        let mut range = range;
        let agg = if range.needs_sync_info() {
            if let Err(e) = range.normalize(self.store.as_ref(), ctx.provider_id()).await {
                return agg.finish(Some(TaskError::from(e).to_string()));
            }
            let executor = SyncExecutor::new(
                Arc::clone(&self.store),
                Arc::clone(&self.locks),
                Arc::clone(&self.sink),
            );
            TreeWalker::new(provider, &executor, &ctx, &range, self.policy, agg)
                .walk()
                .await
        } else {
            agg
        };

        self.set_status(&ctx, ProviderStatus::Connected, "").await;
        if let Err(e) = self.store.mark_sync_finished(ctx.provider_id()).await {
            error!(job = %ctx.job_id, "Failed to record sync finish: {e}");
        }

        agg.finish(None)
    }

    async fn probe(&self, provider: &dyn CloudProvider, ctx: &PassContext) -> Result<(), TaskError> {
        self.store.mark_sync_started(ctx.provider_id()).await?;
        let info = provider.sys_info().await?;
        self.store.save_sys_info(ctx.provider_id(), &info).await?;
        Ok(())
    }

    /// Record a provider status, auditing actual changes only.
    async fn set_status(&self, ctx: &PassContext, status: ProviderStatus, reason: &str) {
        let previous = match self.store.get_provider(ctx.provider_id()).await {
            Ok(Some(record)) => Some((record.status, record.status_reason)),
            _ => None,
        };
        if previous.as_ref().is_some_and(|(s, r)| *s == status && r == reason) {
            return;
        }

        if let Err(e) = self
            .store
            .set_provider_status(ctx.provider_id(), status, reason)
            .await
        {
            error!(job = %ctx.job_id, "Failed to set provider status {status}: {e}");
            return;
        }

        let detail = if reason.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {reason}")
        };
        self.sink.log_action_audit(
            &ctx.job_id,
            &ctx.provider,
            Action::SetStatus,
            &detail,
            status != ProviderStatus::Disconnected,
        );
    }

    fn fail_early(
        &self,
        job_id: &str,
        provider_id: &str,
        range: &SyncRange,
        err: TaskError,
    ) -> SyncReport {
        error!(job = %job_id, provider = %provider_id, "Sync precondition failed: {err}");
        let entity = EntityRef::new(ResourceKind::Provider, provider_id, provider_id);
        ResultAggregator::new(job_id, entity, range.full_sync, Arc::clone(&self.sink))
            .finish(Some(err.to_string()))
    }
}
