//! Operator-visible events emitted during a pass.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::EntityRef;

/// Action recorded with an event or audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A pass started for a provider.
    SyncStart,
    /// A branch finished, successfully or not.
    SyncComplete,
    /// Pass-level audit of a scoped pass.
    CloudSync,
    /// Pass-level audit of a full pass.
    CloudFullSync,
    SyncCreate,
    SyncUpdate,
    SyncDelete,
    SetStatus,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SyncStart => "sync_start",
            Action::SyncComplete => "sync_complete",
            Action::CloudSync => "cloud_sync",
            Action::CloudFullSync => "cloud_fullsync",
            Action::SyncCreate => "sync_create",
            Action::SyncUpdate => "sync_update",
            Action::SyncDelete => "sync_delete",
            Action::SetStatus => "set_status",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for events and action audits.
///
/// Implementations must not block and must not fail: a broken sink never
/// stops a sync.
pub trait EventSink: Send + Sync {
    /// Informational event about `entity`.
    fn log_event(&self, job_id: &str, entity: &EntityRef, action: Action, detail: &str);

    /// Audit record of an action and its outcome.
    fn log_action_audit(
        &self,
        job_id: &str,
        entity: &EntityRef,
        action: Action,
        detail: &str,
        success: bool,
    );
}
