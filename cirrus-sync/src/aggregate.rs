//! Pass-level result aggregation.
//!
//! The walker hands every branch result to a [`ResultAggregator`], which
//! keeps an append-only event list, running totals, and forwards one event
//! per branch to the [`EventSink`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SyncError;
use crate::events::{Action, EventSink};
use crate::model::{Branch, EntityRef, ResourceKind};
use crate::result::SyncResult;

/// Final state of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    /// The pass ran, but some branches or items failed.
    CompletedWithErrors,
    /// A precondition failed; no branch ran.
    Failed { reason: String },
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => f.write_str("completed"),
            JobStatus::CompletedWithErrors => f.write_str("completed with errors"),
            JobStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Entry in a pass's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    PassStarted {
        job_id: String,
        provider_id: String,
        full_sync: bool,
    },
    BranchSynced {
        branch: Branch,
        summary: String,
    },
    BranchFailed {
        error: SyncError,
    },
    ItemFailed {
        error: SyncError,
    },
    PassFinished {
        status: JobStatus,
        totals: SyncTotals,
    },
}

/// Running totals over all branches of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTotals {
    pub branches_ok: u32,
    pub branches_failed: u32,
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub errors: u32,
    /// Added, updated and deleted rows per resource kind.
    #[serde(default)]
    pub changes_by_kind: BTreeMap<ResourceKind, u32>,
}

impl SyncTotals {
    /// Fold one branch result into the totals.
    pub fn merge(&mut self, kind: ResourceKind, result: &SyncResult) {
        if result.is_error() {
            self.branches_failed += 1;
        } else {
            self.branches_ok += 1;
        }
        self.added += result.added;
        self.updated += result.updated;
        self.deleted += result.deleted;
        self.errors += result.error_count() as u32;

        let changes = result.added + result.updated + result.deleted;
        if changes > 0 {
            *self.changes_by_kind.entry(kind).or_insert(0) += changes;
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "branches {} ok {} failed, added {} updated {} removed {}, {} errors",
            self.branches_ok,
            self.branches_failed,
            self.added,
            self.updated,
            self.deleted,
            self.errors
        )
    }
}

/// Report of one finished pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: String,
    pub provider_id: String,
    pub full_sync: bool,
    pub status: JobStatus,
    pub totals: SyncTotals,
    pub events: Vec<SyncEvent>,
    pub started_at: String,
    pub finished_at: String,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!("{}: {}", self.status, self.totals.summary())
    }

    /// Branch-level failures in the order they happened.
    pub fn failed_branches(&self) -> Vec<&SyncError> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::BranchFailed { error } => Some(error),
                _ => None,
            })
            .collect()
    }
}

/// Collects branch results of one pass.
pub struct ResultAggregator {
    job_id: String,
    provider: EntityRef,
    full_sync: bool,
    sink: Arc<dyn EventSink>,
    events: Vec<SyncEvent>,
    totals: SyncTotals,
    started_at: String,
}

impl ResultAggregator {
    pub fn new(
        job_id: impl Into<String>,
        provider: EntityRef,
        full_sync: bool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let job_id = job_id.into();
        sink.log_event(
            &job_id,
            &provider,
            Action::SyncStart,
            if full_sync { "full sync started" } else { "sync started" },
        );
        let events = vec![SyncEvent::PassStarted {
            job_id: job_id.clone(),
            provider_id: provider.id.clone(),
            full_sync,
        }];
        Self {
            job_id,
            provider,
            full_sync,
            sink,
            events,
            totals: SyncTotals::default(),
            started_at: Utc::now().to_rfc3339(),
        }
    }

    fn pass_action(&self) -> Action {
        if self.full_sync {
            Action::CloudFullSync
        } else {
            Action::CloudSync
        }
    }

    /// Record a finished branch. The result is consumed; it is final once
    /// handed over.
    pub fn record(&mut self, branch: &Branch, result: SyncResult) {
        self.totals.merge(branch.kind, &result);

        for error in &result.errors {
            warn!(job = %self.job_id, "{error}");
            self.events.push(SyncEvent::ItemFailed {
                error: error.clone(),
            });
        }

        match &result.fatal {
            Some(error) => {
                warn!(job = %self.job_id, "{error}");
                let detail = error.to_string();
                self.sink
                    .log_event(&self.job_id, &self.provider, Action::SyncComplete, &detail);
                self.sink.log_action_audit(
                    &self.job_id,
                    &self.provider,
                    self.pass_action(),
                    &detail,
                    false,
                );
                self.events.push(SyncEvent::BranchFailed {
                    error: error.clone(),
                });
            }
            None => {
                let summary = result.summary();
                let detail = format!("{branch} result: {summary}");
                info!(job = %self.job_id, "{detail}");
                self.sink
                    .log_event(&self.job_id, &self.provider, Action::SyncComplete, &detail);
                if !result.is_noop() {
                    self.sink.log_action_audit(
                        &self.job_id,
                        &self.provider,
                        self.pass_action(),
                        &detail,
                        result.errors.is_empty(),
                    );
                }
                self.events.push(SyncEvent::BranchSynced {
                    branch: branch.clone(),
                    summary,
                });
            }
        }
    }

    /// Record a branch that failed before it could run.
    pub fn record_failure(&mut self, error: SyncError) {
        let branch = error.branch.clone();
        let mut result = SyncResult::new();
        result.fail(error);
        self.record(&branch, result);
    }

    /// Close the pass. `failure` is set when a precondition failed.
    pub fn finish(mut self, failure: Option<String>) -> SyncReport {
        let status = match failure {
            Some(reason) => JobStatus::Failed { reason },
            None if self.totals.branches_failed > 0 || self.totals.errors > 0 => {
                JobStatus::CompletedWithErrors
            }
            None => JobStatus::Completed,
        };

        let detail = format!("{}: {}", status, self.totals.summary());
        self.sink.log_action_audit(
            &self.job_id,
            &self.provider,
            self.pass_action(),
            &detail,
            !status.is_failed(),
        );
        info!(job = %self.job_id, provider = %self.provider.id, "Sync pass {detail}");

        self.events.push(SyncEvent::PassFinished {
            status: status.clone(),
            totals: self.totals.clone(),
        });

        SyncReport {
            job_id: self.job_id,
            provider_id: self.provider.id,
            full_sync: self.full_sync,
            status,
            totals: self.totals,
            events: self.events,
            started_at: self.started_at,
            finished_at: Utc::now().to_rfc3339(),
        }
    }
}
